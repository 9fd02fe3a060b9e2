//! Read/write primitives that run inside a caller-supplied transaction.

use super::types::*;
use super::now_timestamp;
use crate::error::RegistrarError;
use crate::schedule::SessionTime;
use rusqlite::{params, Connection, OptionalExtension, Row};

const OFFERING_COLUMNS: &str = "offering_id, course_id, teacher_id, semester, max_students,
     current_students, status, bidding_status, bidding_deadline";

const ENROLLMENT_COLUMNS: &str =
    "enrollment_id, student_id, offering_id, semester, status, enrolled_at, updated_at";

const BID_COLUMNS: &str = "bid_id, student_id, offering_id, points, bid_time, status";

/// Bids in settlement order: most points first, earlier bids win ties.
const BID_RANK_ORDER: &str = "ORDER BY points DESC, bid_time ASC, bid_id ASC";

fn offering_from_row(row: &Row<'_>) -> rusqlite::Result<DbOffering> {
    Ok(DbOffering {
        offering_id: row.get(0)?,
        course_id: row.get(1)?,
        teacher_id: row.get(2)?,
        semester: row.get(3)?,
        max_students: row.get(4)?,
        current_students: row.get(5)?,
        status: row.get(6)?,
        bidding_status: row.get(7)?,
        bidding_deadline: row.get(8)?,
    })
}

fn enrollment_from_row(row: &Row<'_>) -> rusqlite::Result<DbEnrollment> {
    Ok(DbEnrollment {
        enrollment_id: row.get(0)?,
        student_id: row.get(1)?,
        offering_id: row.get(2)?,
        semester: row.get(3)?,
        status: row.get(4)?,
        enrolled_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn bid_from_row(row: &Row<'_>) -> rusqlite::Result<DbBid> {
    Ok(DbBid {
        bid_id: row.get(0)?,
        student_id: row.get(1)?,
        offering_id: row.get(2)?,
        points: row.get(3)?,
        bid_time: row.get(4)?,
        status: row.get(5)?,
    })
}

/// Handle to the catalog inside one open transaction.
pub struct CatalogTx<'conn> {
    conn: &'conn Connection,
}

impl<'conn> CatalogTx<'conn> {
    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Runs `work` inside a savepoint, undoing only its writes on error.
    pub fn within_savepoint<T>(
        &self,
        name: &str,
        work: impl FnOnce(&Self) -> Result<T, RegistrarError>,
    ) -> Result<T, RegistrarError> {
        self.conn.execute_batch(&format!("SAVEPOINT {name}"))?;
        match work(self) {
            Ok(value) => {
                self.conn.execute_batch(&format!("RELEASE {name}"))?;
                Ok(value)
            }
            Err(e) => {
                self.conn
                    .execute_batch(&format!("ROLLBACK TO {name}; RELEASE {name}"))?;
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Students
    // ---------------------------------------------------------------------

    pub fn get_student(&self, student_id: &str) -> Result<DbStudent, RegistrarError> {
        self.conn
            .query_row(
                "SELECT student_id, name, status, course_points FROM students WHERE student_id = ?",
                [student_id],
                |row| {
                    Ok(DbStudent {
                        student_id: row.get(0)?,
                        name: row.get(1)?,
                        status: row.get(2)?,
                        course_points: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| RegistrarError::not_found("student", student_id))
    }

    pub fn insert_student(
        &self,
        student_id: &str,
        name: &str,
        status: StudentStatus,
    ) -> Result<(), RegistrarError> {
        self.conn.execute(
            "INSERT INTO students (student_id, name, status, course_points, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![student_id, name, status, now_timestamp()],
        )?;
        Ok(())
    }

    pub fn set_student_status(
        &self,
        student_id: &str,
        status: StudentStatus,
    ) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE students SET status = ?2 WHERE student_id = ?1",
            params![student_id, status],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("student", student_id));
        }
        Ok(())
    }

    /// Adds points to a balance and records the transaction. Returns the new balance.
    pub fn grant_points(
        &self,
        student_id: &str,
        points: i64,
        reason: &str,
    ) -> Result<i64, RegistrarError> {
        let balance: i64 = self
            .conn
            .query_row(
                "UPDATE students SET course_points = course_points + ?2
                 WHERE student_id = ?1 RETURNING course_points",
                params![student_id, points],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| RegistrarError::not_found("student", student_id))?;
        self.record_points(student_id, points, balance, reason)?;
        Ok(balance)
    }

    /// Deducts points if the balance covers them.
    ///
    /// Returns the new balance, or `None` when the balance is insufficient.
    pub fn deduct_points(
        &self,
        student_id: &str,
        points: i64,
        reason: &str,
    ) -> Result<Option<i64>, RegistrarError> {
        let balance: Option<i64> = self
            .conn
            .query_row(
                "UPDATE students SET course_points = course_points - ?2
                 WHERE student_id = ?1 AND course_points >= ?2 RETURNING course_points",
                params![student_id, points],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(balance) = balance {
            self.record_points(student_id, -points, balance, reason)?;
        }
        Ok(balance)
    }

    /// Ledger entries of a student, newest first.
    pub fn points_history(&self, student_id: &str) -> Result<Vec<PointsTransaction>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_id, student_id, points_change, balance_after, reason, created_at
             FROM points_transactions
             WHERE student_id = ?
             ORDER BY created_at DESC, transaction_id DESC",
        )?;
        let rows = stmt.query_map([student_id], |row| {
            Ok(PointsTransaction {
                transaction_id: row.get(0)?,
                student_id: row.get(1)?,
                points_change: row.get(2)?,
                balance_after: row.get(3)?,
                reason: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_points(
        &self,
        student_id: &str,
        change: i64,
        balance_after: i64,
        reason: &str,
    ) -> Result<(), RegistrarError> {
        self.conn.execute(
            "INSERT INTO points_transactions (student_id, points_change, balance_after, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![student_id, change, balance_after, reason, now_timestamp()],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Teachers, courses, offerings, sessions
    // ---------------------------------------------------------------------

    pub fn insert_teacher(&self, teacher_id: &str, name: &str) -> Result<(), RegistrarError> {
        self.conn.execute(
            "INSERT INTO teachers (teacher_id, name) VALUES (?1, ?2)",
            (teacher_id, name),
        )?;
        Ok(())
    }

    pub fn insert_course(
        &self,
        course_id: &str,
        course_name: &str,
        credits: f64,
    ) -> Result<(), RegistrarError> {
        self.conn.execute(
            "INSERT INTO courses (course_id, course_name, credits) VALUES (?1, ?2, ?3)",
            (course_id, course_name, credits),
        )?;
        Ok(())
    }

    /// Inserts an offering with no enrollments. Returns its id.
    pub fn insert_offering(&self, offering: &NewOffering) -> Result<i64, RegistrarError> {
        let now = now_timestamp();
        let status = if offering.max_students == 0 {
            OfferingStatus::Full
        } else {
            OfferingStatus::Open
        };
        self.conn.execute(
            "INSERT INTO course_offerings (
                course_id, teacher_id, semester, max_students, current_students,
                status, bidding_status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, 'none', ?6, ?6)",
            params![
                offering.course_id,
                offering.teacher_id,
                offering.semester,
                offering.max_students,
                status,
                now
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_offering(&self, offering_id: i64) -> Result<DbOffering, RegistrarError> {
        self.conn
            .query_row(
                &format!("SELECT {OFFERING_COLUMNS} FROM course_offerings WHERE offering_id = ?"),
                [offering_id],
                offering_from_row,
            )
            .optional()?
            .ok_or_else(|| RegistrarError::not_found("offering", offering_id))
    }

    /// Offering ids, optionally restricted to one semester.
    pub fn list_offering_ids(&self, semester: Option<&str>) -> Result<Vec<i64>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT offering_id FROM course_offerings
             WHERE (?1 IS NULL OR semester = ?1)
             ORDER BY offering_id",
        )?;
        let ids = stmt.query_map([semester], |row| row.get(0))?;
        Ok(ids.collect::<rusqlite::Result<Vec<i64>>>()?)
    }

    pub fn insert_session(
        &self,
        offering_id: i64,
        time: &SessionTime,
        room: Option<&str>,
    ) -> Result<i64, RegistrarError> {
        self.conn.execute(
            "INSERT INTO offering_sessions (offering_id, day_of_week, start_minute, end_minute, room)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                offering_id,
                time.day.number(),
                time.start_minute,
                time.end_minute,
                room
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_sessions(&self, offering_id: i64) -> Result<Vec<DbSession>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT session_id, offering_id, day_of_week, start_minute, end_minute, room
             FROM offering_sessions
             WHERE offering_id = ?
             ORDER BY day_of_week, start_minute",
        )?;
        let sessions = stmt.query_map([offering_id], |row| {
            Ok(DbSession {
                session_id: row.get(0)?,
                offering_id: row.get(1)?,
                day_of_week: row.get(2)?,
                start_minute: row.get(3)?,
                end_minute: row.get(4)?,
                room: row.get(5)?,
            })
        })?;
        Ok(sessions.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_bidding_status(
        &self,
        offering_id: i64,
        status: BiddingStatus,
    ) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE course_offerings SET bidding_status = ?2, updated_at = ?3 WHERE offering_id = ?1",
            params![offering_id, status, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("offering", offering_id));
        }
        Ok(())
    }

    /// Sets or clears the bidding deadline, stored as a fixed-width
    /// timestamp (see [`now_timestamp`]).
    pub fn set_bidding_deadline(
        &self,
        offering_id: i64,
        deadline: Option<&str>,
    ) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE course_offerings SET bidding_deadline = ?2, updated_at = ?3 WHERE offering_id = ?1",
            params![offering_id, deadline, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("offering", offering_id));
        }
        Ok(())
    }

    /// Unsettled offerings (`open` or `closed`) whose bidding deadline is at
    /// or before `now`, with their bidding status.
    pub fn expired_bidding_offerings(
        &self,
        now: &str,
    ) -> Result<Vec<(i64, BiddingStatus)>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT offering_id, bidding_status FROM course_offerings
             WHERE bidding_status IN ('open', 'closed')
               AND bidding_deadline IS NOT NULL AND bidding_deadline <= ?
             ORDER BY bidding_deadline, offering_id",
        )?;
        let rows = stmt.query_map([now], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---------------------------------------------------------------------
    // Seat counters. Only the capacity tracker calls these.
    // ---------------------------------------------------------------------

    /// Compare-and-increment guarded by capacity. Returns the new count, or
    /// `None` when the offering is full, closed or missing.
    pub(crate) fn increment_if_below_capacity(
        &self,
        offering_id: i64,
    ) -> Result<Option<i64>, RegistrarError> {
        Ok(self
            .conn
            .query_row(
                "UPDATE course_offerings
                 SET current_students = current_students + 1,
                     status = CASE WHEN current_students + 1 >= max_students THEN 'full' ELSE 'open' END,
                     updated_at = ?2
                 WHERE offering_id = ?1
                   AND status != 'closed'
                   AND current_students < max_students
                 RETURNING current_students",
                params![offering_id, now_timestamp()],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Decrements the count without going below zero. Returns the new count,
    /// or `None` when the offering is missing.
    pub(crate) fn decrement_clamped(&self, offering_id: i64) -> Result<Option<i64>, RegistrarError> {
        Ok(self
            .conn
            .query_row(
                "UPDATE course_offerings
                 SET current_students = MAX(current_students - 1, 0),
                     status = CASE
                         WHEN status = 'closed' THEN 'closed'
                         WHEN MAX(current_students - 1, 0) >= max_students THEN 'full'
                         ELSE 'open'
                     END,
                     updated_at = ?2
                 WHERE offering_id = ?1
                 RETURNING current_students",
                params![offering_id, now_timestamp()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub(crate) fn update_offering_counts(
        &self,
        offering_id: i64,
        current_students: i64,
        status: OfferingStatus,
    ) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE course_offerings
             SET current_students = ?2, status = ?3, updated_at = ?4
             WHERE offering_id = ?1",
            params![offering_id, current_students, status, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("offering", offering_id));
        }
        Ok(())
    }

    pub fn count_active_enrollments(&self, offering_id: i64) -> Result<i64, RegistrarError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM enrollments
             WHERE offering_id = ? AND status IN ('enrolled', 'completed')",
            [offering_id],
            |row| row.get(0),
        )?)
    }

    // ---------------------------------------------------------------------
    // Enrollments
    // ---------------------------------------------------------------------

    /// Active enrollments of a student joined with the course of each offering.
    pub fn get_active_enrollments(
        &self,
        student_id: &str,
    ) -> Result<Vec<ActiveEnrollment>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.enrollment_id, e.offering_id, o.course_id, o.semester, e.status
             FROM enrollments e
             JOIN course_offerings o ON e.offering_id = o.offering_id
             WHERE e.student_id = ? AND e.status IN ('enrolled', 'completed')
             ORDER BY e.enrollment_id",
        )?;
        let rows = stmt.query_map([student_id], |row| {
            Ok(ActiveEnrollment {
                enrollment_id: row.get(0)?,
                offering_id: row.get(1)?,
                course_id: row.get(2)?,
                semester: row.get(3)?,
                status: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// The enrollment row for a (student, offering) pair, in any status.
    pub fn find_enrollment(
        &self,
        student_id: &str,
        offering_id: i64,
    ) -> Result<Option<DbEnrollment>, RegistrarError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
                     WHERE student_id = ?1 AND offering_id = ?2"
                ),
                params![student_id, offering_id],
                enrollment_from_row,
            )
            .optional()?)
    }

    /// Inserts the row, or updates the existing row for the same
    /// (student, offering) pair in place. Returns the enrollment id.
    pub fn upsert_enrollment(&self, row: &EnrollmentRow) -> Result<i64, RegistrarError> {
        let now = now_timestamp();
        Ok(self.conn.query_row(
            "INSERT INTO enrollments (student_id, offering_id, semester, status, enrolled_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (student_id, offering_id) DO UPDATE SET
                 semester = excluded.semester,
                 status = excluded.status,
                 enrolled_at = CASE
                     WHEN excluded.status = 'enrolled' AND enrollments.status = 'dropped'
                     THEN excluded.enrolled_at
                     ELSE enrollments.enrolled_at
                 END,
                 updated_at = excluded.updated_at
             RETURNING enrollment_id",
            params![row.student_id, row.offering_id, row.semester, row.status, now],
            |r| r.get(0),
        )?)
    }

    pub fn set_enrollment_status(
        &self,
        enrollment_id: i64,
        status: EnrollmentStatus,
    ) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE enrollments SET status = ?2, updated_at = ?3 WHERE enrollment_id = ?1",
            params![enrollment_id, status, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("enrollment", enrollment_id));
        }
        Ok(())
    }

    pub fn student_enrollments(
        &self,
        student_id: &str,
        semester: Option<&str>,
        status: Option<EnrollmentStatus>,
    ) -> Result<Vec<EnrollmentView>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.enrollment_id, e.offering_id, o.course_id, c.course_name, c.credits,
                    o.teacher_id, e.semester, e.status, e.enrolled_at
             FROM enrollments e
             JOIN course_offerings o ON e.offering_id = o.offering_id
             JOIN courses c ON o.course_id = c.course_id
             WHERE e.student_id = ?1
               AND (?2 IS NULL OR e.semester = ?2)
               AND (?3 IS NULL OR e.status = ?3)
             ORDER BY e.semester DESC, o.course_id",
        )?;
        let rows = stmt.query_map(params![student_id, semester, status], |row| {
            Ok(EnrollmentView {
                enrollment_id: row.get(0)?,
                offering_id: row.get(1)?,
                course_id: row.get(2)?,
                course_name: row.get(3)?,
                credits: row.get(4)?,
                teacher_id: row.get(5)?,
                semester: row.get(6)?,
                status: row.get(7)?,
                enrolled_at: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Students holding an active seat in the offering.
    pub fn offering_roster(&self, offering_id: i64) -> Result<Vec<RosterEntry>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT e.enrollment_id, e.student_id, s.name, e.status, e.enrolled_at
             FROM enrollments e
             JOIN students s ON e.student_id = s.student_id
             WHERE e.offering_id = ? AND e.status IN ('enrolled', 'completed')
             ORDER BY e.student_id",
        )?;
        let rows = stmt.query_map([offering_id], |row| {
            Ok(RosterEntry {
                enrollment_id: row.get(0)?,
                student_id: row.get(1)?,
                student_name: row.get(2)?,
                status: row.get(3)?,
                enrolled_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_semester_enrollments(&self, semester: &str) -> Result<i64, RegistrarError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM enrollments
             WHERE semester = ? AND status IN ('enrolled', 'completed')",
            [semester],
            |row| row.get(0),
        )?)
    }

    /// The most-filled offerings of a semester.
    pub fn most_filled_offerings(
        &self,
        semester: &str,
        limit: usize,
    ) -> Result<Vec<OfferingFill>, RegistrarError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.offering_id, o.course_id, c.course_name, o.current_students, o.max_students
             FROM course_offerings o
             JOIN courses c ON o.course_id = c.course_id
             WHERE o.semester = ?1
             ORDER BY o.current_students DESC, o.offering_id ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![semester, limit as i64], |row| {
            Ok(OfferingFill {
                offering_id: row.get(0)?,
                course_id: row.get(1)?,
                course_name: row.get(2)?,
                current_students: row.get(3)?,
                max_students: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---------------------------------------------------------------------
    // Bids
    // ---------------------------------------------------------------------

    pub fn insert_bid(
        &self,
        student_id: &str,
        offering_id: i64,
        points: i64,
    ) -> Result<i64, RegistrarError> {
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO course_biddings (student_id, offering_id, points, bid_time, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'pending', ?4)",
            params![student_id, offering_id, points, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_bid(&self, bid_id: i64) -> Result<DbBid, RegistrarError> {
        self.conn
            .query_row(
                &format!("SELECT {BID_COLUMNS} FROM course_biddings WHERE bid_id = ?"),
                [bid_id],
                bid_from_row,
            )
            .optional()?
            .ok_or_else(|| RegistrarError::not_found("bid", bid_id))
    }

    /// The pending or accepted bid of a student for an offering.
    pub fn find_live_bid(
        &self,
        student_id: &str,
        offering_id: i64,
    ) -> Result<Option<DbBid>, RegistrarError> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {BID_COLUMNS} FROM course_biddings
                     WHERE student_id = ?1 AND offering_id = ?2
                       AND status IN ('pending', 'accepted')"
                ),
                params![student_id, offering_id],
                bid_from_row,
            )
            .optional()?)
    }

    /// Points a student has committed to pending bids, optionally ignoring
    /// one offering.
    pub fn pending_points(
        &self,
        student_id: &str,
        excluding_offering: Option<i64>,
    ) -> Result<i64, RegistrarError> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(SUM(points), 0) FROM course_biddings
             WHERE student_id = ?1 AND status = 'pending'
               AND (?2 IS NULL OR offering_id != ?2)",
            params![student_id, excluding_offering],
            |row| row.get(0),
        )?)
    }

    pub fn update_bid_points(&self, bid_id: i64, points: i64) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE course_biddings SET points = ?2, updated_at = ?3 WHERE bid_id = ?1",
            params![bid_id, points, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("bid", bid_id));
        }
        Ok(())
    }

    pub fn set_bid_status(&self, bid_id: i64, status: BidStatus) -> Result<(), RegistrarError> {
        let changed = self.conn.execute(
            "UPDATE course_biddings SET status = ?2, updated_at = ?3 WHERE bid_id = ?1",
            params![bid_id, status, now_timestamp()],
        )?;
        if changed == 0 {
            return Err(RegistrarError::not_found("bid", bid_id));
        }
        Ok(())
    }

    /// Rejects every pending bid of an offering. Returns how many changed.
    pub fn reject_pending_bids(&self, offering_id: i64) -> Result<usize, RegistrarError> {
        Ok(self.conn.execute(
            "UPDATE course_biddings SET status = 'rejected', updated_at = ?2
             WHERE offering_id = ?1 AND status = 'pending'",
            params![offering_id, now_timestamp()],
        )?)
    }

    /// Marks accepted bids whose seat is no longer held as `released`, so
    /// the student may bid again. Returns how many changed.
    pub fn release_dropped_bids(&self, offering_id: i64) -> Result<usize, RegistrarError> {
        Ok(self.conn.execute(
            "UPDATE course_biddings SET status = 'released', updated_at = ?2
             WHERE offering_id = ?1 AND status = 'accepted'
               AND NOT EXISTS (
                   SELECT 1 FROM enrollments e
                   WHERE e.student_id = course_biddings.student_id
                     AND e.offering_id = course_biddings.offering_id
                     AND e.status IN ('enrolled', 'completed')
               )",
            params![offering_id, now_timestamp()],
        )?)
    }

    /// Pending bids in settlement order.
    pub fn pending_bids_ranked(&self, offering_id: i64) -> Result<Vec<DbBid>, RegistrarError> {
        self.bids_ranked(offering_id, true)
    }

    /// All non-cancelled bids in settlement order.
    pub fn all_bids_ranked(&self, offering_id: i64) -> Result<Vec<DbBid>, RegistrarError> {
        self.bids_ranked(offering_id, false)
    }

    fn bids_ranked(&self, offering_id: i64, pending_only: bool) -> Result<Vec<DbBid>, RegistrarError> {
        let filter = if pending_only {
            "status = 'pending'"
        } else {
            "status != 'cancelled'"
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {BID_COLUMNS} FROM course_biddings
             WHERE offering_id = ? AND {filter}
             {BID_RANK_ORDER}"
        ))?;
        let rows = stmt.query_map([offering_id], bid_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn pending_bid_stats(&self, offering_id: i64) -> Result<BidStats, RegistrarError> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*), MAX(points), MIN(points), AVG(points)
             FROM course_biddings
             WHERE offering_id = ? AND status = 'pending'",
            [offering_id],
            |row| {
                Ok(BidStats {
                    pending_bids: row.get(0)?,
                    max_points: row.get(1)?,
                    min_points: row.get(2)?,
                    avg_points: row.get(3)?,
                })
            },
        )?)
    }

    #[cfg(test)]
    pub(crate) fn count_rows(&self, table: &str) -> Result<i64, RegistrarError> {
        Ok(self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
    }

    /// Writes a raw counter value, bypassing the capacity tracker. Used to
    /// simulate drift in tests.
    #[cfg(test)]
    pub(crate) fn force_offering_counts(
        &self,
        offering_id: i64,
        current_students: i64,
        status: OfferingStatus,
    ) -> Result<(), RegistrarError> {
        self.update_offering_counts(offering_id, current_students, status)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::db::*;
    use crate::error::RegistrarError;

    fn seeded_store(dir: &tempfile::TempDir) -> CatalogStore {
        let store = CatalogStore::open(dir.path().join("catalog.db"), StoreConfig::default()).unwrap();
        store
            .transaction("seed", |tx| {
                tx.insert_teacher("T001", "Grace")?;
                tx.insert_course("CS101", "Programming", 3.0)?;
                tx.insert_student("2024000001", "Lin", StudentStatus::Active)?;
                tx.insert_offering(&NewOffering {
                    course_id: "CS101".to_string(),
                    teacher_id: "T001".to_string(),
                    semester: "2024-2025-1".to_string(),
                    max_students: 2,
                })
            })
            .unwrap();
        store
    }

    #[test]
    fn test_increment_guarded_by_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        store
            .transaction("test", |tx| {
                assert_eq!(tx.increment_if_below_capacity(1)?, Some(1));
                assert_eq!(tx.get_offering(1)?.status, OfferingStatus::Open);
                assert_eq!(tx.increment_if_below_capacity(1)?, Some(2));
                assert_eq!(tx.get_offering(1)?.status, OfferingStatus::Full);
                assert_eq!(tx.increment_if_below_capacity(1)?, None);
                assert_eq!(tx.increment_if_below_capacity(99)?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_decrement_never_below_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        store
            .transaction("test", |tx| {
                assert_eq!(tx.decrement_clamped(1)?, Some(0));
                assert_eq!(tx.get_offering(1)?.status, OfferingStatus::Open);
                assert_eq!(tx.decrement_clamped(99)?, None);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_upsert_reuses_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        store
            .transaction("test", |tx| {
                let row = EnrollmentRow {
                    student_id: "2024000001".to_string(),
                    offering_id: 1,
                    semester: "2024-2025-1".to_string(),
                    status: EnrollmentStatus::Enrolled,
                };
                let first = tx.upsert_enrollment(&row)?;
                tx.set_enrollment_status(first, EnrollmentStatus::Dropped)?;
                let second = tx.upsert_enrollment(&row)?;
                assert_eq!(first, second);
                assert_eq!(tx.count_rows("enrollments")?, 1);
                assert_eq!(tx.count_active_enrollments(1)?, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_savepoint_rolls_back_inner_writes_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        store
            .transaction("test", |tx| {
                tx.insert_teacher("T002", "Alan")?;
                let inner: Result<(), _> = tx.within_savepoint("inner", |tx| {
                    tx.insert_teacher("T003", "Edsger")?;
                    Err(RegistrarError::CapacityExceeded { offering_id: 1 })
                });
                assert!(inner.is_err());
                Ok(())
            })
            .unwrap();

        let teachers = store.read("test", |tx| tx.count_rows("teachers")).unwrap();
        assert_eq!(teachers, 2);
    }

    #[test]
    fn test_points_deduction_requires_balance() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&dir);

        store
            .transaction("test", |tx| {
                assert_eq!(tx.grant_points("2024000001", 30, "init")?, 30);
                assert_eq!(tx.deduct_points("2024000001", 50, "bid")?, None);
                assert_eq!(tx.deduct_points("2024000001", 20, "bid")?, Some(10));
                assert_eq!(tx.count_rows("points_transactions")?, 2);
                Ok(())
            })
            .unwrap();
    }
}
