//! Seat counting per offering.
//!
//! `current_students` and `status` on an offering are written only here:
//! atomic reserve/release on the enrollment path, and recompute on the
//! reconciliation path.

use crate::db::{CatalogStore, CatalogTx, OfferingStatus};
use crate::error::RegistrarError;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Derives the offering status from its counters.
pub fn derive_status(current_students: i64, max_students: i64, closed: bool) -> OfferingStatus {
    if closed {
        OfferingStatus::Closed
    } else if current_students >= max_students {
        OfferingStatus::Full
    } else {
        OfferingStatus::Open
    }
}

/// Result of recounting one offering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recount {
    pub offering_id: i64,
    pub previous_count: i64,
    pub actual_count: i64,
    pub previous_status: OfferingStatus,
    pub status: OfferingStatus,
}

impl Recount {
    /// True if the stored counters had drifted from the enrollment rows.
    pub fn corrected(&self) -> bool {
        self.previous_count != self.actual_count || self.previous_status != self.status
    }
}

/// Summary of a reconciliation pass over many offerings.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub corrected: Vec<Recount>,
    pub failed: Vec<ReconcileFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileFailure {
    pub offering_id: i64,
    pub error: String,
}

pub struct CapacityTracker {
    store: Arc<CatalogStore>,
}

impl CapacityTracker {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    /// Takes one seat. Returns the new count.
    ///
    /// A single conditional update, so two transactions racing for the last
    /// seat cannot both succeed.
    pub fn reserve(tx: &CatalogTx<'_>, offering_id: i64) -> Result<i64, RegistrarError> {
        match tx.increment_if_below_capacity(offering_id)? {
            Some(count) => {
                debug!(offering_id = offering_id, current_students = count, "Seat reserved");
                Ok(count)
            }
            None => {
                let offering = tx.get_offering(offering_id)?;
                if offering.status == OfferingStatus::Closed {
                    Err(RegistrarError::OfferingClosed { offering_id })
                } else {
                    Err(RegistrarError::CapacityExceeded { offering_id })
                }
            }
        }
    }

    /// Frees one seat. Returns the new count, never below zero.
    pub fn release(tx: &CatalogTx<'_>, offering_id: i64) -> Result<i64, RegistrarError> {
        let count = tx
            .decrement_clamped(offering_id)?
            .ok_or_else(|| RegistrarError::not_found("offering", offering_id))?;
        debug!(offering_id = offering_id, current_students = count, "Seat released");
        Ok(count)
    }

    /// Overwrites the counters of one offering from its enrollment rows.
    pub fn recount(tx: &CatalogTx<'_>, offering_id: i64) -> Result<Recount, RegistrarError> {
        let offering = tx.get_offering(offering_id)?;
        let actual = tx.count_active_enrollments(offering_id)?;
        let status = derive_status(
            actual,
            offering.max_students,
            offering.status == OfferingStatus::Closed,
        );

        if actual > offering.max_students {
            warn!(
                offering_id = offering_id,
                actual = actual,
                max_students = offering.max_students,
                "Offering holds more active enrollments than seats"
            );
        }

        if actual != offering.current_students || status != offering.status {
            tx.update_offering_counts(offering_id, actual, status)?;
        }

        Ok(Recount {
            offering_id,
            previous_count: offering.current_students,
            actual_count: actual,
            previous_status: offering.status,
            status,
        })
    }

    /// Closes an offering to new enrollments. Existing seats are kept.
    pub fn close(tx: &CatalogTx<'_>, offering_id: i64) -> Result<(), RegistrarError> {
        let offering = tx.get_offering(offering_id)?;
        tx.update_offering_counts(offering_id, offering.current_students, OfferingStatus::Closed)
    }

    /// Reopens a closed offering, deriving `open`/`full` from its count.
    pub fn reopen(tx: &CatalogTx<'_>, offering_id: i64) -> Result<(), RegistrarError> {
        let offering = tx.get_offering(offering_id)?;
        let status = derive_status(offering.current_students, offering.max_students, false);
        tx.update_offering_counts(offering_id, offering.current_students, status)
    }

    /// Reconciles one offering in its own transaction.
    pub fn recompute(&self, offering_id: i64) -> Result<Recount, RegistrarError> {
        let recount = self
            .store
            .transaction("recompute", |tx| Self::recount(tx, offering_id))?;
        if recount.corrected() {
            info!(
                offering_id = offering_id,
                previous = recount.previous_count,
                actual = recount.actual_count,
                status = %recount.status,
                "Corrected drifted seat count"
            );
        }
        Ok(recount)
    }

    /// Reconciles every offering.
    pub fn recompute_all(&self) -> ReconcileReport {
        self.recompute_scope(None)
    }

    /// Reconciles the offerings of one semester.
    pub fn recompute_semester(&self, semester: &str) -> ReconcileReport {
        self.recompute_scope(Some(semester))
    }

    /// Each offering is recounted in a separate short transaction so live
    /// traffic is only blocked briefly. Failures are logged and skipped.
    fn recompute_scope(&self, semester: Option<&str>) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let ids = match self
            .store
            .read("recompute.list", |tx| tx.list_offering_ids(semester))
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Could not list offerings for reconciliation");
                return report;
            }
        };

        for offering_id in ids {
            report.checked += 1;
            match self.recompute(offering_id) {
                Ok(recount) if recount.corrected() => report.corrected.push(recount),
                Ok(_) => {}
                Err(e) => {
                    warn!(offering_id = offering_id, error = %e, "Reconciliation failed");
                    report.failed.push(ReconcileFailure {
                        offering_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            checked = report.checked,
            corrected = report.corrected.len(),
            failed = report.failed.len(),
            "Reconciliation finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;

    #[test]
    fn test_derive_status() {
        assert_eq!(derive_status(3, 3, false), OfferingStatus::Full);
        assert_eq!(derive_status(2, 3, false), OfferingStatus::Open);
        assert_eq!(derive_status(3, 3, true), OfferingStatus::Closed);
    }

    #[test]
    fn test_reserve_until_full() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 2, &[]);

        let counts = fx
            .store()
            .transaction("test", |tx| {
                Ok((CapacityTracker::reserve(tx, o)?, CapacityTracker::reserve(tx, o)?))
            })
            .unwrap();
        assert_eq!(counts, (1, 2));
        assert_eq!(fx.offering_row(o).status, OfferingStatus::Full);

        let err = fx
            .store()
            .transaction("test", |tx| CapacityTracker::reserve(tx, o))
            .unwrap_err();
        assert_eq!(err, RegistrarError::CapacityExceeded { offering_id: o });
    }

    #[test]
    fn test_release_reopens_full_offering() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 1, &[]);

        fx.store()
            .transaction("test", |tx| CapacityTracker::reserve(tx, o))
            .unwrap();
        assert_eq!(fx.offering_row(o).status, OfferingStatus::Full);

        let count = fx
            .store()
            .transaction("test", |tx| CapacityTracker::release(tx, o))
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(fx.offering_row(o).status, OfferingStatus::Open);
    }

    #[test]
    fn test_closed_offering_rejects_reserve_and_stays_closed() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 5, &[]);
        fx.store()
            .transaction("test", |tx| {
                CapacityTracker::reserve(tx, o)?;
                CapacityTracker::close(tx, o)
            })
            .unwrap();

        let err = fx
            .store()
            .transaction("test", |tx| CapacityTracker::reserve(tx, o))
            .unwrap_err();
        assert_eq!(err, RegistrarError::OfferingClosed { offering_id: o });

        fx.store()
            .transaction("test", |tx| CapacityTracker::release(tx, o))
            .unwrap();
        let row = fx.offering_row(o);
        assert_eq!(row.status, OfferingStatus::Closed);
        assert_eq!(row.current_students, 0);

        fx.store()
            .transaction("test", |tx| CapacityTracker::reopen(tx, o))
            .unwrap();
        assert_eq!(fx.offering_row(o).status, OfferingStatus::Open);
    }

    #[test]
    fn test_recompute_corrects_drift_and_is_idempotent() {
        let fx = Fixture::new();
        fx.course("CS101");
        let o = fx.offering("CS101", 3, &[]);
        for s in ["S1", "S2", "S3"] {
            fx.student(s);
            fx.registrar.enroll(s, o).unwrap();
        }
        fx.store()
            .transaction("drift", |tx| tx.force_offering_counts(o, 1, OfferingStatus::Open))
            .unwrap();

        let tracker = CapacityTracker::new(fx.store_arc());
        let first = tracker.recompute(o).unwrap();
        assert!(first.corrected());
        assert_eq!(first.actual_count, 3);
        assert_eq!(first.status, OfferingStatus::Full);

        let second = tracker.recompute(o).unwrap();
        assert!(!second.corrected());
        let row = fx.offering_row(o);
        assert_eq!(row.current_students, 3);
        assert_eq!(row.status, OfferingStatus::Full);
    }

    #[test]
    fn test_recompute_all_reports_only_drift() {
        let fx = Fixture::new();
        fx.course("CS101");
        fx.course("MA201");
        let clean = fx.offering("CS101", 3, &[]);
        let drifted = fx.offering("MA201", 3, &[]);
        fx.student("S1");
        fx.registrar.enroll("S1", clean).unwrap();
        fx.store()
            .transaction("drift", |tx| tx.force_offering_counts(drifted, 2, OfferingStatus::Open))
            .unwrap();

        let report = CapacityTracker::new(fx.store_arc()).recompute_all();
        assert_eq!(report.checked, 2);
        assert_eq!(report.corrected.len(), 1);
        assert_eq!(report.corrected[0].offering_id, drifted);
        assert_eq!(report.corrected[0].actual_count, 0);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn test_recompute_semester_scope() {
        let fx = Fixture::new();
        fx.course("CS101");
        let current = fx.offering("CS101", 3, &[]);
        let next = fx.offering_in("CS101", "2025-2026-1", 3, &[]);
        fx.store()
            .transaction("drift", |tx| {
                tx.force_offering_counts(current, 2, OfferingStatus::Open)?;
                tx.force_offering_counts(next, 2, OfferingStatus::Open)
            })
            .unwrap();

        let report = CapacityTracker::new(fx.store_arc()).recompute_semester("2025-2026-1");
        assert_eq!(report.checked, 1);
        assert_eq!(fx.offering_row(next).current_students, 0);
        assert_eq!(fx.offering_row(current).current_students, 2);
    }

    #[test]
    fn test_recompute_unknown_offering() {
        let fx = Fixture::new();
        let err = CapacityTracker::new(fx.store_arc()).recompute(404).unwrap_err();
        assert!(matches!(err, RegistrarError::NotFound { .. }));
    }
}
