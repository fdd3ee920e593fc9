pub mod auth;
pub mod connection_limit;

// Re-export middleware functions
pub use auth::{ACCESS_TOKEN_ONLY, authorize_request};
pub use connection_limit::{ClientIp, connection_limit_middleware};
