//! Point-bid admission for offerings.
//!
//! Lifecycle per offering: `none -> open -> closed -> settled`, with
//! `closed | settled -> open` for reopening. While bidding is open, direct
//! enrollment is refused and students place point bids instead; `settle`
//! then admits pending bids in rank order through the enrollment admit
//! path. An optional deadline stops bids once it passes;
//! [`BiddingController::settle_expired`] closes and settles those offerings.

use crate::config::BiddingConfig;
use crate::db::{
    format_timestamp, now_timestamp, BidStats, BidStatus, BiddingStatus, CatalogStore, CatalogTx,
    DbBid, DbOffering, StudentStatus,
};
use crate::enrollment::EnrollmentService;
use crate::error::RegistrarError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of a settlement run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettlementReport {
    pub offering_id: i64,
    /// Bids that won a seat in this run
    pub admitted: usize,
    /// Bids whose student already held the seat from an interrupted run
    pub already_seated: usize,
    /// Bids rejected individually (conflict, balance, inactive student)
    pub rejected: usize,
    /// Pending bids rejected once no seat was left
    pub rejected_unplaced: usize,
}

/// Outcome of a pass over offerings whose bidding deadline has passed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExpiredSettlementReport {
    pub settled: Vec<SettlementReport>,
    pub failed: Vec<SettlementFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementFailure {
    pub offering_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedBid {
    pub rank: usize,
    #[serde(flatten)]
    pub bid: DbBid,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiddingSummary {
    pub offering_id: i64,
    pub bidding_status: BiddingStatus,
    pub bidding_deadline: Option<String>,
    pub max_students: i64,
    pub current_students: i64,
    #[serde(flatten)]
    pub stats: BidStats,
}

/// What happened to one bid during settlement.
#[derive(Debug, PartialEq)]
enum Admission {
    Admitted,
    AlreadySeated,
    Rejected,
    /// No seat left; the bid stays pending until the final sweep
    NoSeat,
    /// Already processed by an earlier run
    Skipped,
}

pub struct BiddingController {
    store: Arc<CatalogStore>,
    config: BiddingConfig,
    /// One settlement per offering at a time
    settle_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl BiddingController {
    pub fn new(store: Arc<CatalogStore>, config: BiddingConfig) -> Self {
        Self {
            store,
            config,
            settle_locks: DashMap::new(),
        }
    }

    fn settle_lock(&self, offering_id: i64) -> Arc<Mutex<()>> {
        self.settle_locks
            .entry(offering_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Starts (or restarts) bidding for an offering. With a deadline, bids
    /// are refused from that instant on; reopening replaces the deadline.
    ///
    /// On a reopen, accepted bids whose seat was dropped since are marked
    /// `released` so those students may bid again.
    pub fn open_bidding(
        &self,
        offering_id: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<(), RegistrarError> {
        let deadline = deadline.map(format_timestamp);
        let (from, released) = self.store.transaction("bidding.open", |tx| {
            let offering = tx.get_offering(offering_id)?;
            let from = offering.bidding_status;
            if !matches!(
                from,
                BiddingStatus::None | BiddingStatus::Closed | BiddingStatus::Settled
            ) {
                return Err(RegistrarError::InvalidBiddingTransition {
                    offering_id,
                    from,
                    action: "open",
                });
            }
            let released = match from {
                BiddingStatus::None => 0,
                _ => tx.release_dropped_bids(offering_id)?,
            };
            tx.set_bidding_status(offering_id, BiddingStatus::Open)?;
            tx.set_bidding_deadline(offering_id, deadline.as_deref())?;
            Ok((from, released))
        })?;
        info!(
            offering_id = offering_id,
            from = %from,
            deadline = deadline.as_deref().unwrap_or("none"),
            released_bids = released,
            "Bidding opened"
        );
        Ok(())
    }

    /// Freezes bids ahead of settlement.
    pub fn close_bidding(&self, offering_id: i64) -> Result<(), RegistrarError> {
        self.transition(offering_id, "close", BiddingStatus::Closed, |from| {
            from == BiddingStatus::Open
        })
    }

    fn transition(
        &self,
        offering_id: i64,
        action: &'static str,
        to: BiddingStatus,
        allowed: impl Fn(BiddingStatus) -> bool,
    ) -> Result<(), RegistrarError> {
        let from = self.store.transaction("bidding.transition", |tx| {
            let offering = tx.get_offering(offering_id)?;
            if !allowed(offering.bidding_status) {
                return Err(RegistrarError::InvalidBiddingTransition {
                    offering_id,
                    from: offering.bidding_status,
                    action,
                });
            }
            tx.set_bidding_status(offering_id, to)?;
            Ok(offering.bidding_status)
        })?;
        info!(
            offering_id = offering_id,
            from = %from,
            to = %to,
            "Bidding status changed"
        );
        Ok(())
    }

    fn validate_points(&self, points: i64) -> Result<(), RegistrarError> {
        if points < 1 || points > self.config.max_bid_points {
            return Err(RegistrarError::InvalidBid {
                reason: format!(
                    "points must be between 1 and {}",
                    self.config.max_bid_points
                ),
            });
        }
        Ok(())
    }

    /// Records a pending bid. Returns the bid id. No seat is reserved.
    pub fn place_bid(
        &self,
        student_id: &str,
        offering_id: i64,
        points: i64,
    ) -> Result<i64, RegistrarError> {
        self.validate_points(points)?;

        let bid_id = self.store.transaction("place_bid", |tx| {
            require_open(tx, offering_id)?;
            let balance = active_balance(tx, student_id)?;

            if tx.find_live_bid(student_id, offering_id)?.is_some() {
                return Err(RegistrarError::InvalidBid {
                    reason: "a bid for this offering already exists; modify it instead".to_string(),
                });
            }

            let available = balance - tx.pending_points(student_id, None)?;
            if points > available {
                return Err(insufficient(available));
            }
            tx.insert_bid(student_id, offering_id, points)
        })?;

        info!(
            student_id = %student_id,
            offering_id = offering_id,
            bid_id = bid_id,
            points = points,
            "Bid placed"
        );
        Ok(bid_id)
    }

    /// Changes the points of a pending bid.
    pub fn modify_bid(
        &self,
        student_id: &str,
        offering_id: i64,
        points: i64,
    ) -> Result<DbBid, RegistrarError> {
        self.validate_points(points)?;

        let bid = self.store.transaction("modify_bid", |tx| {
            require_open(tx, offering_id)?;
            let balance = active_balance(tx, student_id)?;
            let bid = pending_bid(tx, student_id, offering_id)?;

            let available = balance - tx.pending_points(student_id, Some(offering_id))?;
            if points > available {
                return Err(insufficient(available));
            }
            tx.update_bid_points(bid.bid_id, points)?;
            tx.get_bid(bid.bid_id)
        })?;

        info!(
            student_id = %student_id,
            offering_id = offering_id,
            bid_id = bid.bid_id,
            points = points,
            "Bid modified"
        );
        Ok(bid)
    }

    /// Withdraws a pending bid. Its points were never charged.
    pub fn cancel_bid(&self, student_id: &str, offering_id: i64) -> Result<(), RegistrarError> {
        let bid_id = self.store.transaction("cancel_bid", |tx| {
            require_open(tx, offering_id)?;
            tx.get_student(student_id)?;
            let bid = pending_bid(tx, student_id, offering_id)?;
            tx.set_bid_status(bid.bid_id, BidStatus::Cancelled)?;
            Ok(bid.bid_id)
        })?;

        info!(
            student_id = %student_id,
            offering_id = offering_id,
            bid_id = bid_id,
            "Bid cancelled"
        );
        Ok(())
    }

    /// Awards seats to pending bids in rank order.
    ///
    /// Valid only while bidding is `closed`. Each bid is admitted in its own
    /// transaction, so an interrupted run leaves the offering `closed` with
    /// some bids still pending and can simply be run again: a student who
    /// already got the seat is detected through the duplicate-course check
    /// and marked accepted without a second seat or charge.
    pub fn settle(&self, offering_id: i64) -> Result<SettlementReport, RegistrarError> {
        let result = {
            let lock = self.settle_lock(offering_id);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.settle_locked(offering_id)
        };
        // Keep the entry only while another settlement holds or awaits it.
        self.settle_locks
            .remove_if(&offering_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn settle_locked(&self, offering_id: i64) -> Result<SettlementReport, RegistrarError> {
        let bids = self.store.read("settle.rank", |tx| {
            require_closed(tx, offering_id)?;
            tx.pending_bids_ranked(offering_id)
        })?;
        info!(
            offering_id = offering_id,
            pending_bids = bids.len(),
            "Settling bids"
        );

        let mut report = SettlementReport {
            offering_id,
            ..SettlementReport::default()
        };

        for bid in &bids {
            let admission = self
                .store
                .transaction("settle.admit", |tx| Self::admit_bid(tx, bid, offering_id))?;
            match admission {
                Admission::Admitted => report.admitted += 1,
                Admission::AlreadySeated => report.already_seated += 1,
                Admission::Rejected => report.rejected += 1,
                Admission::Skipped => {}
                Admission::NoSeat => break,
            }
        }

        report.rejected_unplaced = self.store.transaction("settle.finish", |tx| {
            require_closed(tx, offering_id)?;
            let swept = tx.reject_pending_bids(offering_id)?;
            tx.set_bidding_status(offering_id, BiddingStatus::Settled)?;
            Ok(swept)
        })?;

        info!(
            offering_id = offering_id,
            admitted = report.admitted,
            already_seated = report.already_seated,
            rejected = report.rejected + report.rejected_unplaced,
            "Bidding settled"
        );
        Ok(report)
    }

    /// Closes and settles every offering whose bidding deadline has passed.
    ///
    /// Offerings left `closed` by an interrupted pass are picked up again.
    /// A failure is logged and the pass moves on to the next offering.
    pub fn settle_expired(&self) -> Result<ExpiredSettlementReport, RegistrarError> {
        let now = now_timestamp();
        let expired = self
            .store
            .read("settle_expired.list", |tx| tx.expired_bidding_offerings(&now))?;
        let mut report = ExpiredSettlementReport::default();

        for (offering_id, status) in expired {
            let settled = match status {
                BiddingStatus::Open => self
                    .close_bidding(offering_id)
                    .and_then(|()| self.settle(offering_id)),
                _ => self.settle(offering_id),
            };
            match settled {
                Ok(settlement) => report.settled.push(settlement),
                Err(e) => {
                    warn!(offering_id = offering_id, error = %e, "Deadline settlement failed");
                    report.failed.push(SettlementFailure {
                        offering_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            settled = report.settled.len(),
            failed = report.failed.len(),
            "Expired bidding processed"
        );
        Ok(report)
    }

    /// Admits a single bid. The seat, the point charge and the bid status
    /// commit together.
    fn admit_bid(
        tx: &CatalogTx<'_>,
        bid: &DbBid,
        offering_id: i64,
    ) -> Result<Admission, RegistrarError> {
        // Re-read: an earlier run may have processed it already.
        if tx.get_bid(bid.bid_id)?.status != BidStatus::Pending {
            return Ok(Admission::Skipped);
        }
        require_closed(tx, offering_id)?;

        let seated = tx.within_savepoint("admit_bid", |tx| {
            let enrollment_id = EnrollmentService::enroll_in(tx, &bid.student_id, offering_id)?;
            let reason = format!("bid {} accepted for offering {}", bid.bid_id, offering_id);
            tx.deduct_points(&bid.student_id, bid.points, &reason)?
                .ok_or_else(|| RegistrarError::InvalidBid {
                    reason: "insufficient points at settlement".to_string(),
                })?;
            Ok(enrollment_id)
        });

        match seated {
            Ok(enrollment_id) => {
                tx.set_bid_status(bid.bid_id, BidStatus::Accepted)?;
                debug!(
                    bid_id = bid.bid_id,
                    student_id = %bid.student_id,
                    enrollment_id = enrollment_id,
                    "Bid admitted"
                );
                Ok(Admission::Admitted)
            }
            Err(RegistrarError::DuplicateCourse {
                held_offering_id, ..
            }) if held_offering_id == offering_id => {
                tx.set_bid_status(bid.bid_id, BidStatus::Accepted)?;
                debug!(
                    bid_id = bid.bid_id,
                    student_id = %bid.student_id,
                    "Student already seated by an earlier run"
                );
                Ok(Admission::AlreadySeated)
            }
            Err(RegistrarError::CapacityExceeded { .. }) | Err(RegistrarError::OfferingClosed { .. }) => {
                Ok(Admission::NoSeat)
            }
            Err(e) if e.is_semantic() => {
                tx.set_bid_status(bid.bid_id, BidStatus::Rejected)?;
                warn!(
                    bid_id = bid.bid_id,
                    student_id = %bid.student_id,
                    error = %e,
                    "Bid rejected"
                );
                Ok(Admission::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// All non-cancelled bids in settlement order, ranked from 1.
    pub fn bidding_ranking(&self, offering_id: i64) -> Result<Vec<RankedBid>, RegistrarError> {
        let bids = self.store.read("bidding_ranking", |tx| {
            tx.get_offering(offering_id)?;
            tx.all_bids_ranked(offering_id)
        })?;
        Ok(bids
            .into_iter()
            .enumerate()
            .map(|(i, bid)| RankedBid { rank: i + 1, bid })
            .collect())
    }

    pub fn bidding_summary(&self, offering_id: i64) -> Result<BiddingSummary, RegistrarError> {
        self.store.read("bidding_summary", |tx| {
            let offering = tx.get_offering(offering_id)?;
            Ok(BiddingSummary {
                offering_id,
                bidding_status: offering.bidding_status,
                bidding_deadline: offering.bidding_deadline,
                max_students: offering.max_students,
                current_students: offering.current_students,
                stats: tx.pending_bid_stats(offering_id)?,
            })
        })
    }
}

fn require_open(tx: &CatalogTx<'_>, offering_id: i64) -> Result<DbOffering, RegistrarError> {
    let offering = tx.get_offering(offering_id)?;
    if offering.bidding_status != BiddingStatus::Open {
        return Err(RegistrarError::BiddingNotOpen { offering_id });
    }
    if let Some(deadline) = &offering.bidding_deadline {
        if *deadline <= now_timestamp() {
            return Err(RegistrarError::BiddingDeadlinePassed {
                offering_id,
                deadline: deadline.clone(),
            });
        }
    }
    Ok(offering)
}

fn require_closed(tx: &CatalogTx<'_>, offering_id: i64) -> Result<(), RegistrarError> {
    let offering = tx.get_offering(offering_id)?;
    if offering.bidding_status != BiddingStatus::Closed {
        return Err(RegistrarError::InvalidBiddingTransition {
            offering_id,
            from: offering.bidding_status,
            action: "settle",
        });
    }
    Ok(())
}

/// Point balance of a student allowed to bid.
fn active_balance(tx: &CatalogTx<'_>, student_id: &str) -> Result<i64, RegistrarError> {
    let student = tx.get_student(student_id)?;
    if student.status != StudentStatus::Active {
        return Err(RegistrarError::StudentInactive {
            student_id: student.student_id,
            status: student.status,
        });
    }
    Ok(student.course_points)
}

fn pending_bid(
    tx: &CatalogTx<'_>,
    student_id: &str,
    offering_id: i64,
) -> Result<DbBid, RegistrarError> {
    let bid = tx
        .find_live_bid(student_id, offering_id)?
        .ok_or_else(|| RegistrarError::not_found("bid", format!("{student_id}/{offering_id}")))?;
    if bid.status != BidStatus::Pending {
        return Err(RegistrarError::InvalidBid {
            reason: format!("bid {} is already {}", bid.bid_id, bid.status),
        });
    }
    Ok(bid)
}

fn insufficient(available: i64) -> RegistrarError {
    RegistrarError::InvalidBid {
        reason: format!("insufficient points: {available} available"),
    }
}
