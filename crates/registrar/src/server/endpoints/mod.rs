pub mod bidding;
pub mod enrollment;
pub mod points;
pub mod reconcile;
pub mod status;
