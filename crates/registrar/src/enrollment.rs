//! Student-facing enroll and drop.

use crate::capacity::CapacityTracker;
use crate::conflict::ConflictGuard;
use crate::db::{
    BiddingStatus, CatalogStore, CatalogTx, EnrollmentRow, EnrollmentStatus, EnrollmentView,
    OfferingFill, OfferingStatus, RosterEntry, StudentStatus,
};
use crate::error::RegistrarError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// How many offerings `semester_statistics` lists.
const TOP_OFFERINGS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct SemesterStatistics {
    pub semester: String,
    pub active_enrollments: i64,
    pub most_filled: Vec<OfferingFill>,
}

/// Composes the conflict guard and the capacity tracker into one unit of
/// work per request. The only writer of enrollment rows.
pub struct EnrollmentService {
    store: Arc<CatalogStore>,
}

impl EnrollmentService {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    /// Enrolls a student in an offering. Returns the enrollment id.
    pub fn enroll(&self, student_id: &str, offering_id: i64) -> Result<i64, RegistrarError> {
        let enrollment_id = self
            .store
            .transaction("enroll", |tx| Self::enroll_in(tx, student_id, offering_id))?;
        info!(
            student_id = %student_id,
            offering_id = offering_id,
            enrollment_id = enrollment_id,
            "Student enrolled"
        );
        Ok(enrollment_id)
    }

    /// Drops a student's active enrollment in an offering.
    pub fn drop(&self, student_id: &str, offering_id: i64) -> Result<(), RegistrarError> {
        self.store
            .transaction("drop", |tx| Self::drop_in(tx, student_id, offering_id))?;
        info!(student_id = %student_id, offering_id = offering_id, "Student dropped");
        Ok(())
    }

    /// The admit path, run on the caller's transaction.
    ///
    /// Settlement calls this directly so the bid's status change commits
    /// with the seat.
    pub(crate) fn enroll_in(
        tx: &CatalogTx<'_>,
        student_id: &str,
        offering_id: i64,
    ) -> Result<i64, RegistrarError> {
        let student = tx.get_student(student_id)?;
        if student.status != StudentStatus::Active {
            return Err(RegistrarError::StudentInactive {
                student_id: student.student_id,
                status: student.status,
            });
        }

        let offering = tx.get_offering(offering_id)?;
        if offering.status == OfferingStatus::Closed {
            return Err(RegistrarError::OfferingClosed { offering_id });
        }
        if offering.bidding_status == BiddingStatus::Open {
            return Err(RegistrarError::BiddingInProgress { offering_id });
        }

        ConflictGuard::check_offering(tx, student_id, &offering)?;
        let seats = CapacityTracker::reserve(tx, offering_id)?;

        // A dropped row for the same pair is reused in place.
        let enrollment_id = tx.upsert_enrollment(&EnrollmentRow {
            student_id: student_id.to_string(),
            offering_id,
            semester: offering.semester,
            status: EnrollmentStatus::Enrolled,
        })?;
        debug!(
            enrollment_id = enrollment_id,
            current_students = seats,
            "Enrollment row written"
        );
        Ok(enrollment_id)
    }

    pub(crate) fn drop_in(
        tx: &CatalogTx<'_>,
        student_id: &str,
        offering_id: i64,
    ) -> Result<(), RegistrarError> {
        tx.get_student(student_id)?;
        let enrollment = tx
            .find_enrollment(student_id, offering_id)?
            .filter(|e| e.status.is_active())
            .ok_or_else(|| RegistrarError::NotEnrolled {
                student_id: student_id.to_string(),
                offering_id,
            })?;

        if enrollment.status == EnrollmentStatus::Completed {
            return Err(RegistrarError::EnrollmentCompleted {
                enrollment_id: enrollment.enrollment_id,
            });
        }

        tx.set_enrollment_status(enrollment.enrollment_id, EnrollmentStatus::Dropped)?;
        CapacityTracker::release(tx, offering_id)?;
        Ok(())
    }

    /// A student's enrollments, newest semester first.
    pub fn student_enrollments(
        &self,
        student_id: &str,
        semester: Option<&str>,
        status: Option<EnrollmentStatus>,
    ) -> Result<Vec<EnrollmentView>, RegistrarError> {
        self.store.read("student_enrollments", |tx| {
            tx.get_student(student_id)?;
            tx.student_enrollments(student_id, semester, status)
        })
    }

    pub fn offering_roster(&self, offering_id: i64) -> Result<Vec<RosterEntry>, RegistrarError> {
        self.store.read("offering_roster", |tx| {
            tx.get_offering(offering_id)?;
            tx.offering_roster(offering_id)
        })
    }

    pub fn semester_statistics(&self, semester: &str) -> Result<SemesterStatistics, RegistrarError> {
        self.store.read("semester_statistics", |tx| {
            Ok(SemesterStatistics {
                semester: semester.to_string(),
                active_enrollments: tx.count_semester_enrollments(semester)?,
                most_filled: tx.most_filled_offerings(semester, TOP_OFFERINGS)?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbEnrollment;
    use crate::test_support::Fixture;

    fn enrollment_rows(fx: &Fixture, student_id: &str, offering_id: i64) -> Option<DbEnrollment> {
        fx.store()
            .read("test", |tx| tx.find_enrollment(student_id, offering_id))
            .unwrap()
    }

    #[test]
    fn test_enroll_takes_a_seat() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 2, &["Tue 10:00-11:40"]);
        fx.student("S1");

        let id = fx.registrar.enroll("S1", o).unwrap();
        let row = enrollment_rows(&fx, "S1", o).unwrap();
        assert_eq!(row.enrollment_id, id);
        assert_eq!(row.status, EnrollmentStatus::Enrolled);
        assert_eq!(row.semester, "2024-2025-1");
        assert_eq!(fx.offering_row(o).current_students, 1);
    }

    #[test]
    fn test_no_overbooking_under_concurrency() {
        let fx = Fixture::new();
        fx.course("CS101");
        let capacity = 3;
        let o = fx.offering("CS101", capacity, &[]);
        let students: Vec<String> = (0..8).map(|i| format!("S{i}")).collect();
        for s in &students {
            fx.student(s);
        }

        let registrar = &fx.registrar;
        let results: Vec<Result<i64, RegistrarError>> = std::thread::scope(|scope| {
            let handles: Vec<_> = students
                .iter()
                .map(|s| scope.spawn(move || registrar.enroll(s, o)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let admitted = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(RegistrarError::CapacityExceeded { .. })))
            .count();
        assert_eq!(admitted, capacity as usize);
        assert_eq!(full, students.len() - capacity as usize);

        let row = fx.offering_row(o);
        assert_eq!(row.current_students, capacity);
        assert_eq!(row.status, OfferingStatus::Full);
        let active = fx
            .store()
            .read("test", |tx| tx.count_active_enrollments(o))
            .unwrap();
        assert_eq!(active, capacity);
    }

    #[test]
    fn test_drop_and_reenroll_race_keeps_counter() {
        let fx = Fixture::new();
        fx.student("S1");
        fx.student("S2");
        let registrar = &fx.registrar;

        for round in 0..10 {
            let course = format!("C{round}");
            fx.course(&course);
            let o = fx.offering(&course, 1, &[]);
            registrar.enroll("S1", o).unwrap();

            let (dropped, s1, s2) = std::thread::scope(|scope| {
                let dropper = scope.spawn(move || registrar.drop("S1", o));
                let s1 = scope.spawn(move || registrar.enroll("S1", o));
                let s2 = scope.spawn(move || registrar.enroll("S2", o));
                (
                    dropper.join().unwrap(),
                    s1.join().unwrap().map(|_| ()),
                    s2.join().unwrap().map(|_| ()),
                )
            });
            for result in [&dropped, &s1, &s2] {
                if let Err(e) = result {
                    assert!(e.is_semantic(), "round {round}: {e}");
                }
            }

            let row = fx.offering_row(o);
            let active = fx
                .store()
                .read("test", |tx| tx.count_active_enrollments(o))
                .unwrap();
            assert_eq!(row.current_students, active, "round {round}");
            assert!(row.current_students <= 1, "round {round}");
            let holders = ["S1", "S2"]
                .iter()
                .filter(|s| {
                    enrollment_rows(&fx, s, o).is_some_and(|e| e.status.is_active())
                })
                .count() as i64;
            assert_eq!(holders, active, "round {round}");
        }
    }

    #[test]
    fn test_drop_then_reenroll_reuses_row() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 1, &[]);
        fx.student("S1");

        let first = fx.registrar.enroll("S1", o).unwrap();
        assert_eq!(fx.offering_row(o).status, OfferingStatus::Full);

        fx.registrar.drop("S1", o).unwrap();
        let dropped = fx.offering_row(o);
        assert_eq!(dropped.current_students, 0);
        assert_eq!(dropped.status, OfferingStatus::Open);
        assert_eq!(
            enrollment_rows(&fx, "S1", o).unwrap().status,
            EnrollmentStatus::Dropped
        );

        let second = fx.registrar.enroll("S1", o).unwrap();
        assert_eq!(first, second);
        assert_eq!(fx.offering_row(o).current_students, 1);
        let total = fx
            .store()
            .read("test", |tx| tx.count_rows("enrollments"))
            .unwrap();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_reenroll_reruns_conflict_check() {
        let fx = Fixture::new();
        fx.course("CS101");
        fx.course("MA201");
        let cs = fx.offering("CS101", 5, &["Wed 14:00-15:40"]);
        let ma = fx.offering("MA201", 5, &["Wed 15:00-16:40"]);
        fx.student("S1");

        fx.registrar.enroll("S1", cs).unwrap();
        fx.registrar.drop("S1", cs).unwrap();
        fx.registrar.enroll("S1", ma).unwrap();

        let err = fx.registrar.enroll("S1", cs).unwrap_err();
        assert!(matches!(
            err,
            RegistrarError::ScheduleConflict { conflicting_offering_id, .. } if conflicting_offering_id == ma
        ));
        assert_eq!(fx.offering_row(cs).current_students, 0);
    }

    #[test]
    fn test_duplicate_course_leaves_count_unchanged() {
        let fx = Fixture::new();
        fx.course("CS101");
        let a = fx.offering("CS101", 5, &[]);
        let b = fx.offering("CS101", 5, &[]);
        fx.student("S1");

        fx.registrar.enroll("S1", a).unwrap();
        let err = fx.registrar.enroll("S1", b).unwrap_err();
        assert!(matches!(err, RegistrarError::DuplicateCourse { held_offering_id, .. } if held_offering_id == a));
        assert_eq!(fx.offering_row(b).current_students, 0);
        assert!(enrollment_rows(&fx, "S1", b).is_none());
    }

    #[test]
    fn test_schedule_conflict_and_touching_sessions() {
        let fx = Fixture::new();
        fx.course("CS101");
        fx.course("MA201");
        fx.course("PH301");
        let o1 = fx.offering("CS101", 5, &["Mon 08:00-09:40"]);
        let o2 = fx.offering("MA201", 5, &["Mon 09:00-10:40"]);
        let o3 = fx.offering("PH301", 5, &["Mon 09:40-11:20"]);
        fx.student("S1");

        fx.registrar.enroll("S1", o1).unwrap();
        let err = fx.registrar.enroll("S1", o2).unwrap_err();
        assert!(matches!(err, RegistrarError::ScheduleConflict { .. }));
        assert_eq!(fx.offering_row(o2).current_students, 0);
        fx.registrar.enroll("S1", o3).unwrap();
    }

    #[test]
    fn test_closed_offering_and_bidding_block_enroll() {
        let fx = Fixture::new();
        fx.course("CS101");
        fx.course("MA201");
        let closed = fx.offering("CS101", 5, &[]);
        let bidding = fx.offering("MA201", 5, &[]);
        fx.student("S1");
        fx.registrar.close_offering(closed).unwrap();
        fx.registrar.open_bidding(bidding, None).unwrap();

        assert_eq!(
            fx.registrar.enroll("S1", closed).unwrap_err(),
            RegistrarError::OfferingClosed { offering_id: closed }
        );
        assert_eq!(
            fx.registrar.enroll("S1", bidding).unwrap_err(),
            RegistrarError::BiddingInProgress { offering_id: bidding }
        );

        fx.registrar.close_bidding(bidding).unwrap();
        fx.registrar.enroll("S1", bidding).unwrap();
    }

    #[test]
    fn test_inactive_student_rejected() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 5, &[]);
        fx.student("S1");
        fx.registrar
            .set_student_status("S1", StudentStatus::Suspended)
            .unwrap();

        let err = fx.registrar.enroll("S1", o).unwrap_err();
        assert!(matches!(err, RegistrarError::StudentInactive { .. }));
        assert_eq!(fx.offering_row(o).current_students, 0);
    }

    #[test]
    fn test_drop_without_enrollment() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 5, &[]);
        fx.student("S1");

        assert_eq!(
            fx.registrar.drop("S1", o).unwrap_err(),
            RegistrarError::NotEnrolled {
                student_id: "S1".to_string(),
                offering_id: o,
            }
        );

        fx.registrar.enroll("S1", o).unwrap();
        fx.registrar.drop("S1", o).unwrap();
        assert!(matches!(
            fx.registrar.drop("S1", o).unwrap_err(),
            RegistrarError::NotEnrolled { .. }
        ));
        assert_eq!(fx.offering_row(o).current_students, 0);
    }

    #[test]
    fn test_completed_enrollment_cannot_be_dropped() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 5, &[]);
        fx.student("S1");
        let id = fx.registrar.enroll("S1", o).unwrap();
        fx.store()
            .transaction("grade", |tx| tx.set_enrollment_status(id, EnrollmentStatus::Completed))
            .unwrap();

        assert_eq!(
            fx.registrar.drop("S1", o).unwrap_err(),
            RegistrarError::EnrollmentCompleted { enrollment_id: id }
        );
        assert_eq!(fx.offering_row(o).current_students, 1);
    }

    #[test]
    fn test_unknown_references() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 5, &[]);
        fx.student("S1");

        assert!(matches!(
            fx.registrar.enroll("nobody", o).unwrap_err(),
            RegistrarError::NotFound { entity: "student", .. }
        ));
        assert!(matches!(
            fx.registrar.enroll("S1", 999).unwrap_err(),
            RegistrarError::NotFound { entity: "offering", .. }
        ));
    }

    #[test]
    fn test_capacity_invariant_after_mixed_operations() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 4, &[]);
        for s in ["S1", "S2", "S3", "S4", "S5"] {
            fx.student(s);
        }

        fx.registrar.enroll("S1", o).unwrap();
        fx.registrar.enroll("S2", o).unwrap();
        fx.registrar.drop("S1", o).unwrap();
        fx.registrar.enroll("S3", o).unwrap();
        fx.registrar.enroll("S4", o).unwrap();
        fx.registrar.enroll("S5", o).unwrap();
        fx.registrar.drop("S4", o).unwrap();
        fx.registrar.enroll("S1", o).unwrap();

        let row = fx.offering_row(o);
        let active = fx
            .store()
            .read("test", |tx| tx.count_active_enrollments(o))
            .unwrap();
        assert_eq!(row.current_students, active);
        assert_eq!(row.current_students, 4);
        assert_eq!(row.status, OfferingStatus::Full);
    }

    #[test]
    fn test_queries() {
        let fx = Fixture::new();
        fx.course("CS101");
        fx.course("MA201");
        let cs = fx.offering("CS101", 2, &[]);
        let ma = fx.offering("MA201", 5, &[]);
        fx.student("S1");
        fx.student("S2");
        fx.registrar.enroll("S1", cs).unwrap();
        fx.registrar.enroll("S2", cs).unwrap();
        fx.registrar.enroll("S1", ma).unwrap();
        fx.registrar.drop("S1", ma).unwrap();

        let service = EnrollmentService::new(fx.store_arc());
        let all = service.student_enrollments("S1", None, None).unwrap();
        assert_eq!(all.len(), 2);
        let active = service
            .student_enrollments("S1", Some("2024-2025-1"), Some(EnrollmentStatus::Enrolled))
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].course_id, "CS101");

        let roster = service.offering_roster(cs).unwrap();
        let ids: Vec<&str> = roster.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2"]);

        let stats = service.semester_statistics("2024-2025-1").unwrap();
        assert_eq!(stats.active_enrollments, 2);
        assert_eq!(stats.most_filled[0].offering_id, cs);
        assert_eq!(stats.most_filled.len(), 2);
    }
}
