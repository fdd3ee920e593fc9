//! Credential issuance and authorization.
//!
//! - [`tokens`]: rotating access tokens and on-demand session tokens
//! - [`policy`]: maps presented credentials to an allow/deny decision
//! - [`clock`]: time source shared by both

pub mod clock;
pub mod policy;
pub mod tokens;

pub use clock::{Clock, FAR_FUTURE_MS, ManualClock, SystemClock, format_expiry};
pub use policy::{AuthenticationPolicy, AuthorizationResult, Credentials, Identity};
pub use tokens::{IssuedToken, TokenSettings, TokenStore};
