/// Database types for students, offerings, enrollments and bids
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements the text round trip used for status columns.
macro_rules! sql_text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    Active,
    Suspended,
    Graduated,
}

sql_text_enum!(StudentStatus {
    Active => "active",
    Suspended => "suspended",
    Graduated => "graduated",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferingStatus {
    Open,
    Full,
    Closed,
}

sql_text_enum!(OfferingStatus {
    Open => "open",
    Full => "full",
    Closed => "closed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiddingStatus {
    None,
    Open,
    Closed,
    Settled,
}

sql_text_enum!(BiddingStatus {
    None => "none",
    Open => "open",
    Closed => "closed",
    Settled => "settled",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Enrolled,
    Dropped,
    Completed,
}

sql_text_enum!(EnrollmentStatus {
    Enrolled => "enrolled",
    Dropped => "dropped",
    Completed => "completed",
});

impl EnrollmentStatus {
    /// Active enrollments hold a seat and count towards course uniqueness.
    pub fn is_active(&self) -> bool {
        matches!(self, EnrollmentStatus::Enrolled | EnrollmentStatus::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    /// Accepted earlier, but the seat it won was dropped before a reopen
    Released,
}

sql_text_enum!(BidStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Cancelled => "cancelled",
    Released => "released",
});

#[derive(Debug, Clone, Serialize)]
pub struct DbStudent {
    pub student_id: String,
    pub name: String,
    pub status: StudentStatus,
    pub course_points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbOffering {
    pub offering_id: i64,
    pub course_id: String,
    pub teacher_id: String,
    pub semester: String,
    pub max_students: i64,
    pub current_students: i64,
    pub status: OfferingStatus,
    pub bidding_status: BiddingStatus,
    pub bidding_deadline: Option<String>,
}

/// Input for provisioning a new offering
#[derive(Debug, Clone, Deserialize)]
pub struct NewOffering {
    pub course_id: String,
    pub teacher_id: String,
    pub semester: String,
    pub max_students: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbSession {
    pub session_id: i64,
    pub offering_id: i64,
    pub day_of_week: u8,
    pub start_minute: u16,
    pub end_minute: u16,
    pub room: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbEnrollment {
    pub enrollment_id: i64,
    pub student_id: String,
    pub offering_id: i64,
    pub semester: String,
    pub status: EnrollmentStatus,
    pub enrolled_at: String,
    pub updated_at: String,
}

/// An active enrollment joined with the course and semester of its offering
#[derive(Debug, Clone, Serialize)]
pub struct ActiveEnrollment {
    pub enrollment_id: i64,
    pub offering_id: i64,
    pub course_id: String,
    pub semester: String,
    pub status: EnrollmentStatus,
}

/// Row written by `upsert_enrollment`
#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub student_id: String,
    pub offering_id: i64,
    pub semester: String,
    pub status: EnrollmentStatus,
}

/// Enrollment listing entry for a student
#[derive(Debug, Clone, Serialize)]
pub struct EnrollmentView {
    pub enrollment_id: i64,
    pub offering_id: i64,
    pub course_id: String,
    pub course_name: String,
    pub credits: f64,
    pub teacher_id: String,
    pub semester: String,
    pub status: EnrollmentStatus,
    pub enrolled_at: String,
}

/// Roster entry for an offering
#[derive(Debug, Clone, Serialize)]
pub struct RosterEntry {
    pub enrollment_id: i64,
    pub student_id: String,
    pub student_name: String,
    pub status: EnrollmentStatus,
    pub enrolled_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbBid {
    pub bid_id: i64,
    pub student_id: String,
    pub offering_id: i64,
    pub points: i64,
    pub bid_time: String,
    pub status: BidStatus,
}

/// One entry of a student's points ledger
#[derive(Debug, Clone, Serialize)]
pub struct PointsTransaction {
    pub transaction_id: i64,
    pub student_id: String,
    pub points_change: i64,
    pub balance_after: i64,
    pub reason: String,
    pub created_at: String,
}

/// Aggregates over the pending bids of an offering
#[derive(Debug, Clone, Default, Serialize)]
pub struct BidStats {
    pub pending_bids: i64,
    pub max_points: Option<i64>,
    pub min_points: Option<i64>,
    pub avg_points: Option<f64>,
}

/// Offering fill level used by semester statistics
#[derive(Debug, Clone, Serialize)]
pub struct OfferingFill {
    pub offering_id: i64,
    pub course_id: String,
    pub course_name: String,
    pub current_students: i64,
    pub max_students: i64,
}
