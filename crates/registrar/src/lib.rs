//! Enrollment, seat capacity and bidding management for course offerings.
//!
//! [`Registrar`] is the entry point. Every operation runs as one SQLite
//! transaction; see [`db::CatalogStore`] for the transaction model.

pub mod bidding;
pub mod capacity;
pub mod config;
pub mod conflict;
pub mod db;
pub mod enrollment;
pub mod error;
pub mod points;
pub mod schedule;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::bidding::{
    BiddingController, BiddingSummary, ExpiredSettlementReport, RankedBid, SettlementReport,
};
use crate::capacity::{CapacityTracker, ReconcileReport, Recount};
use crate::config::RegistrarConfig;
use crate::db::{
    CatalogStore, DbBid, DbOffering, DbStudent, EnrollmentStatus, EnrollmentView, NewOffering,
    PointsTransaction, RosterEntry, StudentStatus,
};
use crate::enrollment::{EnrollmentService, SemesterStatistics};
use crate::error::RegistrarError;
use crate::points::PointsLedger;
use crate::schedule::parse_session;

/// In-process facade over the catalog and its services.
pub struct Registrar {
    store: Arc<CatalogStore>,
    initial_points: i64,
    enrollment: EnrollmentService,
    capacity: CapacityTracker,
    bidding: BiddingController,
    points: PointsLedger,
}

impl Registrar {
    /// Opens the catalog named by the configuration.
    pub fn open(config: &RegistrarConfig) -> Result<Self, RegistrarError> {
        let store = Arc::new(CatalogStore::open(
            &config.database_path,
            config.store.clone(),
        )?);
        info!(path = %config.database_path.display(), "Registrar ready");
        Ok(Self {
            enrollment: EnrollmentService::new(store.clone()),
            capacity: CapacityTracker::new(store.clone()),
            bidding: BiddingController::new(store.clone(), config.bidding.clone()),
            points: PointsLedger::new(store.clone()),
            initial_points: config.bidding.initial_points,
            store,
        })
    }

    pub fn store(&self) -> &Arc<CatalogStore> {
        &self.store
    }

    // Enrollment

    pub fn enroll(&self, student_id: &str, offering_id: i64) -> Result<i64, RegistrarError> {
        self.enrollment.enroll(student_id, offering_id)
    }

    pub fn drop(&self, student_id: &str, offering_id: i64) -> Result<(), RegistrarError> {
        self.enrollment.drop(student_id, offering_id)
    }

    pub fn student_enrollments(
        &self,
        student_id: &str,
        semester: Option<&str>,
        status: Option<EnrollmentStatus>,
    ) -> Result<Vec<EnrollmentView>, RegistrarError> {
        self.enrollment
            .student_enrollments(student_id, semester, status)
    }

    pub fn offering_roster(&self, offering_id: i64) -> Result<Vec<RosterEntry>, RegistrarError> {
        self.enrollment.offering_roster(offering_id)
    }

    pub fn semester_statistics(&self, semester: &str) -> Result<SemesterStatistics, RegistrarError> {
        self.enrollment.semester_statistics(semester)
    }

    // Reconciliation

    pub fn reconcile(&self, offering_id: i64) -> Result<Recount, RegistrarError> {
        self.capacity.recompute(offering_id)
    }

    pub fn reconcile_all(&self) -> ReconcileReport {
        self.capacity.recompute_all()
    }

    pub fn reconcile_semester(&self, semester: &str) -> ReconcileReport {
        self.capacity.recompute_semester(semester)
    }

    // Bidding

    pub fn open_bidding(
        &self,
        offering_id: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), RegistrarError> {
        self.bidding.open_bidding(offering_id, deadline)
    }

    pub fn close_bidding(&self, offering_id: i64) -> Result<(), RegistrarError> {
        self.bidding.close_bidding(offering_id)
    }

    pub fn settle(&self, offering_id: i64) -> Result<SettlementReport, RegistrarError> {
        self.bidding.settle(offering_id)
    }

    pub fn settle_expired(&self) -> Result<ExpiredSettlementReport, RegistrarError> {
        self.bidding.settle_expired()
    }

    pub fn place_bid(
        &self,
        student_id: &str,
        offering_id: i64,
        points: i64,
    ) -> Result<i64, RegistrarError> {
        self.bidding.place_bid(student_id, offering_id, points)
    }

    pub fn modify_bid(
        &self,
        student_id: &str,
        offering_id: i64,
        points: i64,
    ) -> Result<DbBid, RegistrarError> {
        self.bidding.modify_bid(student_id, offering_id, points)
    }

    pub fn cancel_bid(&self, student_id: &str, offering_id: i64) -> Result<(), RegistrarError> {
        self.bidding.cancel_bid(student_id, offering_id)
    }

    pub fn bidding_ranking(&self, offering_id: i64) -> Result<Vec<RankedBid>, RegistrarError> {
        self.bidding.bidding_ranking(offering_id)
    }

    pub fn bidding_summary(&self, offering_id: i64) -> Result<BiddingSummary, RegistrarError> {
        self.bidding.bidding_summary(offering_id)
    }

    // Points

    pub fn points_history(&self, student_id: &str) -> Result<Vec<PointsTransaction>, RegistrarError> {
        self.points.history(student_id)
    }

    /// Manual balance correction; see [`PointsLedger::adjust`].
    pub fn adjust_points(
        &self,
        student_id: &str,
        delta: i64,
        reason: &str,
    ) -> Result<i64, RegistrarError> {
        self.points.adjust(student_id, delta, reason)
    }

    // Provisioning and lookups

    /// Registers an active student with the starting point balance.
    pub fn add_student(&self, student_id: &str, name: &str) -> Result<DbStudent, RegistrarError> {
        let initial_points = self.initial_points;
        self.store.transaction("add_student", |tx| {
            tx.insert_student(student_id, name, StudentStatus::Active)?;
            if initial_points > 0 {
                tx.grant_points(student_id, initial_points, "initial allocation")?;
            }
            tx.get_student(student_id)
        })
    }

    pub fn set_student_status(
        &self,
        student_id: &str,
        status: StudentStatus,
    ) -> Result<(), RegistrarError> {
        self.store
            .transaction("set_student_status", |tx| tx.set_student_status(student_id, status))
    }

    pub fn get_student(&self, student_id: &str) -> Result<DbStudent, RegistrarError> {
        self.store.read("get_student", |tx| tx.get_student(student_id))
    }

    pub fn add_teacher(&self, teacher_id: &str, name: &str) -> Result<(), RegistrarError> {
        self.store
            .transaction("add_teacher", |tx| tx.insert_teacher(teacher_id, name))
    }

    pub fn add_course(
        &self,
        course_id: &str,
        course_name: &str,
        credits: f64,
    ) -> Result<(), RegistrarError> {
        self.store.transaction("add_course", |tx| {
            tx.insert_course(course_id, course_name, credits)
        })
    }

    /// Creates an offering with no enrollments. Returns its id.
    pub fn add_offering(&self, offering: &NewOffering) -> Result<i64, RegistrarError> {
        self.store
            .transaction("add_offering", |tx| tx.insert_offering(offering))
    }

    /// Adds a weekly session written as `"Mon 08:00-09:40 @ Room 101"`.
    pub fn add_session(&self, offering_id: i64, notation: &str) -> Result<i64, RegistrarError> {
        let (time, room) = parse_session(notation)?;
        self.store.transaction("add_session", |tx| {
            tx.get_offering(offering_id)?;
            tx.insert_session(offering_id, &time, room.as_deref())
        })
    }

    pub fn get_offering(&self, offering_id: i64) -> Result<DbOffering, RegistrarError> {
        self.store.read("get_offering", |tx| tx.get_offering(offering_id))
    }

    /// Closes an offering to new enrollments.
    pub fn close_offering(&self, offering_id: i64) -> Result<(), RegistrarError> {
        self.store
            .transaction("close_offering", |tx| CapacityTracker::close(tx, offering_id))
    }

    pub fn reopen_offering(&self, offering_id: i64) -> Result<(), RegistrarError> {
        self.store
            .transaction("reopen_offering", |tx| CapacityTracker::reopen(tx, offering_id))
    }
}
