use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::server::util::run_blocking;
use crate::types::RegistrarState;

#[derive(Debug, Deserialize)]
pub struct BidRequest {
    pub student_id: String,
    pub offering_id: i64,
    pub points: i64,
}

/// Optional body of the open request. The deadline is an RFC 3339 timestamp.
#[derive(Debug, Default, Deserialize)]
pub struct OpenBiddingRequest {
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct CancelBidRequest {
    pub student_id: String,
    pub offering_id: i64,
}

/// POST /offerings/:offering_id/bidding/open
pub async fn post_open_bidding(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
    body: Option<Json<OpenBiddingRequest>>,
) -> Response {
    info!("POST /offerings/{}/bidding/open", offering_id);
    let req = body.map(|Json(req)| req).unwrap_or_default();

    run_blocking(s, move |r| {
        r.open_bidding(offering_id, req.deadline)?;
        Ok(json!({
            "offering_id": offering_id,
            "bidding_status": "open",
            "deadline": req.deadline,
        }))
    })
    .await
}

/// POST /offerings/:offering_id/bidding/close
pub async fn post_close_bidding(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("POST /offerings/{}/bidding/close", offering_id);

    run_blocking(s, move |r| {
        r.close_bidding(offering_id)?;
        Ok(json!({ "offering_id": offering_id, "bidding_status": "closed" }))
    })
    .await
}

/// POST /offerings/:offering_id/bidding/settle
pub async fn post_settle(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("POST /offerings/{}/bidding/settle", offering_id);
    run_blocking(s, move |r| r.settle(offering_id)).await
}

/// POST /bidding/settle_expired
pub async fn post_settle_expired(State(s): State<Arc<RegistrarState>>) -> Response {
    info!("POST /bidding/settle_expired");
    run_blocking(s, |r| r.settle_expired()).await
}

/// GET /offerings/:offering_id/bidding/ranking
pub async fn get_ranking(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /offerings/{}/bidding/ranking", offering_id);
    run_blocking(s, move |r| r.bidding_ranking(offering_id)).await
}

/// GET /offerings/:offering_id/bidding/summary
pub async fn get_summary(
    Path(offering_id): Path<i64>,
    State(s): State<Arc<RegistrarState>>,
) -> Response {
    info!("GET /offerings/{}/bidding/summary", offering_id);
    run_blocking(s, move |r| r.bidding_summary(offering_id)).await
}

/// POST /bids
pub async fn post_place_bid(
    State(s): State<Arc<RegistrarState>>,
    Json(req): Json<BidRequest>,
) -> Response {
    info!("POST /bids {} -> {}", req.student_id, req.offering_id);

    run_blocking(s, move |r| {
        let bid_id = r.place_bid(&req.student_id, req.offering_id, req.points)?;
        Ok(json!({ "bid_id": bid_id, "points": req.points }))
    })
    .await
}

/// PUT /bids
pub async fn put_modify_bid(
    State(s): State<Arc<RegistrarState>>,
    Json(req): Json<BidRequest>,
) -> Response {
    info!("PUT /bids {} -> {}", req.student_id, req.offering_id);
    run_blocking(s, move |r| {
        r.modify_bid(&req.student_id, req.offering_id, req.points)
    })
    .await
}

/// POST /bids/cancel
pub async fn post_cancel_bid(
    State(s): State<Arc<RegistrarState>>,
    Json(req): Json<CancelBidRequest>,
) -> Response {
    info!("POST /bids/cancel {} -> {}", req.student_id, req.offering_id);

    run_blocking(s, move |r| {
        r.cancel_bid(&req.student_id, req.offering_id)?;
        Ok(json!({ "message": "Bid cancelled" }))
    })
    .await
}
