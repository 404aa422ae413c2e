//! Request extractors.
//!
//! - [`auth::AuthUser`] -- the authenticated caller, from a JWT.

pub mod auth;
