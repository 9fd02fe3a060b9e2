use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::server::endpoints::{bidding, enrollment, points, reconcile, status};
use crate::types::RegistrarState;

mod endpoints;
mod types;
mod util;

/// Creates a router that can be used by `axum`.
///
/// # Parameters
/// - `app_state`: The app server state.
///
/// # Returns
/// The router.
pub fn create_router(app_state: Arc<RegistrarState>) -> Router {
    let enrollment_router = Router::new()
        .route("/enrollments", post(enrollment::post_enroll))
        .route("/enrollments/drop", post(enrollment::post_drop))
        .route(
            "/students/:student_id/enrollments",
            get(enrollment::get_student_enrollments),
        )
        .route("/offerings/:offering_id", get(enrollment::get_offering))
        .route("/offerings/:offering_id/roster", get(enrollment::get_roster))
        .route(
            "/semesters/:semester/statistics",
            get(enrollment::get_semester_statistics),
        );

    let bidding_router = Router::new()
        .route(
            "/offerings/:offering_id/bidding/open",
            post(bidding::post_open_bidding),
        )
        .route(
            "/offerings/:offering_id/bidding/close",
            post(bidding::post_close_bidding),
        )
        .route(
            "/offerings/:offering_id/bidding/settle",
            post(bidding::post_settle),
        )
        .route(
            "/offerings/:offering_id/bidding/ranking",
            get(bidding::get_ranking),
        )
        .route(
            "/offerings/:offering_id/bidding/summary",
            get(bidding::get_summary),
        )
        .route(
            "/bids",
            post(bidding::post_place_bid).put(bidding::put_modify_bid),
        )
        .route("/bids/cancel", post(bidding::post_cancel_bid))
        .route("/bidding/settle_expired", post(bidding::post_settle_expired));

    let points_router = Router::new()
        .route("/students/:student_id/points", get(points::get_points))
        .route(
            "/students/:student_id/points/adjust",
            post(points::post_adjust_points),
        );

    // Maintenance
    let reconcile_router = Router::new()
        .route("/reconcile", post(reconcile::post_reconcile_all))
        .route(
            "/reconcile/offerings/:offering_id",
            post(reconcile::post_reconcile_offering),
        )
        .route(
            "/reconcile/semesters/:semester",
            post(reconcile::post_reconcile_semester),
        );

    Router::new()
        .route("/health", get(status::get_health))
        .merge(enrollment_router)
        .merge(bidding_router)
        .merge(points_router)
        .merge(reconcile_router)
        .with_state(app_state)
}
