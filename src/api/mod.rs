pub mod admin;
pub mod admin_auth;
pub mod client;
pub mod health;
pub mod metrics_route;
pub mod rate_limit;
pub mod request_id;
pub mod status;
