//! Duplicate-course and schedule-overlap checks for a candidate enrollment.

use crate::db::{CatalogTx, DbOffering, DbSession};
use crate::error::RegistrarError;
use crate::schedule::{first_overlap, SessionTime};
use tracing::debug;

/// Decides whether a student may take a seat in a candidate offering.
///
/// The guard only reads. It must run on the same transaction as the seat
/// reservation that follows it; otherwise a concurrent enrollment could slip
/// in between the check and the write.
pub struct ConflictGuard;

impl ConflictGuard {
    /// Checks a (student, offering) pair, loading the offering first.
    pub fn check(
        tx: &CatalogTx<'_>,
        student_id: &str,
        offering_id: i64,
    ) -> Result<(), RegistrarError> {
        let offering = tx.get_offering(offering_id)?;
        Self::check_offering(tx, student_id, &offering)
    }

    /// Checks a (student, offering) pair for an already loaded offering.
    ///
    /// Fails with `DuplicateCourse` if the student holds an active enrollment
    /// in any offering of the same course, and with `ScheduleConflict` if a
    /// session of the candidate overlaps a session of an active enrollment in
    /// the same semester.
    pub fn check_offering(
        tx: &CatalogTx<'_>,
        student_id: &str,
        offering: &DbOffering,
    ) -> Result<(), RegistrarError> {
        let active = tx.get_active_enrollments(student_id)?;

        if let Some(held) = active.iter().find(|e| e.course_id == offering.course_id) {
            debug!(
                student_id = %student_id,
                offering_id = offering.offering_id,
                held_offering_id = held.offering_id,
                "Rejecting duplicate course"
            );
            return Err(RegistrarError::DuplicateCourse {
                student_id: student_id.to_string(),
                course_id: offering.course_id.clone(),
                held_offering_id: held.offering_id,
            });
        }

        let candidate = session_times(&tx.get_sessions(offering.offering_id)?)?;
        if candidate.is_empty() {
            return Ok(());
        }

        // Past terms never collide with this one.
        for enrollment in active.iter().filter(|e| e.semester == offering.semester) {
            let existing = session_times(&tx.get_sessions(enrollment.offering_id)?)?;
            if let Some((c, e)) = first_overlap(&candidate, &existing) {
                debug!(
                    student_id = %student_id,
                    offering_id = offering.offering_id,
                    conflicting_offering_id = enrollment.offering_id,
                    "Rejecting schedule conflict"
                );
                return Err(RegistrarError::ScheduleConflict {
                    conflicting_offering_id: enrollment.offering_id,
                    candidate: c.to_string(),
                    existing: e.to_string(),
                });
            }
        }

        Ok(())
    }
}

fn session_times(rows: &[DbSession]) -> Result<Vec<SessionTime>, RegistrarError> {
    rows.iter().map(SessionTime::from_row).collect()
}
