//! Error types for enrollment, capacity and bidding operations.

use crate::db::{BiddingStatus, StudentStatus};
use rusqlite::ErrorCode;
use thiserror::Error;

/// Errors that can occur while operating on the catalog.
///
/// Most variants describe business state (a full offering, a duplicate
/// course) and are surfaced to the caller as-is. Only
/// [`RegistrarError::TransientStoreFailure`] is retried internally.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistrarError {
    /// Unknown student, offering, enrollment or bid reference
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The student already holds an active seat in another (or the same)
    /// offering of this course
    #[error("Student {student_id} already holds a seat in course {course_id} (offering {held_offering_id})")]
    DuplicateCourse {
        student_id: String,
        course_id: String,
        held_offering_id: i64,
    },

    /// A session of the candidate offering overlaps an active enrollment
    #[error("Schedule conflict with offering {conflicting_offering_id}: {candidate} overlaps {existing}")]
    ScheduleConflict {
        conflicting_offering_id: i64,
        candidate: String,
        existing: String,
    },

    /// No seat was left at reservation time
    #[error("Offering {offering_id} has no seats available")]
    CapacityExceeded { offering_id: i64 },

    /// The offering has been closed administratively
    #[error("Offering {offering_id} is closed for registration")]
    OfferingClosed { offering_id: i64 },

    /// Seats of this offering are awarded through bidding right now
    #[error("Offering {offering_id} is accepting bids; direct enrollment is disabled")]
    BiddingInProgress { offering_id: i64 },

    /// Drop requested without an active enrollment
    #[error("Student {student_id} is not enrolled in offering {offering_id}")]
    NotEnrolled { student_id: String, offering_id: i64 },

    /// Suspended or graduated students cannot register or bid
    #[error("Student {student_id} is {status} and cannot register")]
    StudentInactive {
        student_id: String,
        status: StudentStatus,
    },

    /// A completed enrollment is part of the transcript and cannot be dropped
    #[error("Enrollment {enrollment_id} is completed and cannot be dropped")]
    EnrollmentCompleted { enrollment_id: i64 },

    /// Bids can only be placed, changed or withdrawn while bidding is open
    #[error("Bidding for offering {offering_id} is not open")]
    BiddingNotOpen { offering_id: i64 },

    /// Bidding is still open but its deadline has passed
    #[error("Bidding for offering {offering_id} closed at {deadline}")]
    BiddingDeadlinePassed { offering_id: i64, deadline: String },

    /// The bidding lifecycle does not allow this step from the current phase
    #[error("Cannot {action} bidding for offering {offering_id} while it is {from}")]
    InvalidBiddingTransition {
        offering_id: i64,
        from: BiddingStatus,
        action: &'static str,
    },

    /// Bid rejected by validation (range, balance, duplicate)
    #[error("Invalid bid: {reason}")]
    InvalidBid { reason: String },

    /// Manual balance change refused (zero change, empty reason, negative result)
    #[error("Invalid points adjustment: {reason}")]
    InvalidPointsAdjustment { reason: String },

    /// Session notation could not be parsed
    #[error("Invalid session '{input}': {reason}")]
    InvalidSchedule { input: String, reason: String },

    /// Lock timeout or write conflict in the store
    #[error("Transient store failure after {attempts} attempt(s): {message}")]
    TransientStoreFailure { message: String, attempts: u32 },

    /// Any other storage failure
    #[error("Store error: {message}")]
    Store { message: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl RegistrarError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RegistrarError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true if retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegistrarError::TransientStoreFailure { .. })
    }

    /// Returns true if this error reflects business state rather than an
    /// internal fault.
    pub fn is_semantic(&self) -> bool {
        !matches!(
            self,
            RegistrarError::TransientStoreFailure { .. }
                | RegistrarError::Store { .. }
                | RegistrarError::Config { .. }
        )
    }
}

impl From<rusqlite::Error> for RegistrarError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                RegistrarError::TransientStoreFailure {
                    message: err.to_string(),
                    attempts: 1,
                }
            }
            _ => RegistrarError::Store {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for RegistrarError {
    fn from(err: serde_json::Error) -> Self {
        RegistrarError::Config {
            message: err.to_string(),
        }
    }
}
