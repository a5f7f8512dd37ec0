pub mod handlers;
pub mod identity;
pub mod rate_limit;
pub mod requests;
pub mod responses;
pub mod routes;

pub use rate_limit::RateLimiter;
pub use routes::{create_router, AppState};
