//! Student point balances and the ledger behind them.
//!
//! Every balance change goes through `grant_points` / `deduct_points`, which
//! write a `points_transactions` row in the same transaction.

use crate::db::{CatalogStore, PointsTransaction};
use crate::error::RegistrarError;
use std::sync::Arc;
use tracing::info;

pub struct PointsLedger {
    store: Arc<CatalogStore>,
}

impl PointsLedger {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self { store }
    }

    /// Ledger entries of a student, newest first.
    pub fn history(&self, student_id: &str) -> Result<Vec<PointsTransaction>, RegistrarError> {
        self.store.read("points_history", |tx| {
            tx.get_student(student_id)?;
            tx.points_history(student_id)
        })
    }

    /// Applies a manual correction. Returns the new balance.
    ///
    /// A deduction larger than the balance is refused; the balance never
    /// goes negative.
    pub fn adjust(
        &self,
        student_id: &str,
        delta: i64,
        reason: &str,
    ) -> Result<i64, RegistrarError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RegistrarError::InvalidPointsAdjustment {
                reason: "a reason is required".to_string(),
            });
        }
        if delta == 0 {
            return Err(RegistrarError::InvalidPointsAdjustment {
                reason: "change must not be zero".to_string(),
            });
        }

        let balance = self.store.transaction("adjust_points", |tx| {
            let student = tx.get_student(student_id)?;
            if delta > 0 {
                return tx.grant_points(student_id, delta, reason);
            }
            tx.deduct_points(student_id, -delta, reason)?
                .ok_or_else(|| RegistrarError::InvalidPointsAdjustment {
                    reason: format!(
                        "balance {} cannot cover a deduction of {}",
                        student.course_points, -delta
                    ),
                })
        })?;

        info!(
            student_id = %student_id,
            delta = delta,
            balance = balance,
            reason = %reason,
            "Points adjusted"
        );
        Ok(balance)
    }
}
