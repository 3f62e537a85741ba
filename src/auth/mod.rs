//! Authentication boundary
//!
//! Token verification for the chat core. Handles:
//! - HMAC-signed principal tokens (verification + minting helper)
//! - Authentication extractor for HTTP routes
//!
//! Credential issuance (signup, login, password storage) lives with an
//! external identity service that shares the token secret.

mod middleware;
pub mod session;

pub use middleware::CurrentUser;
pub use session::{Principal, create_token, verify_token};
