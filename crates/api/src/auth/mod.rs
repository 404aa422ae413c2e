//! Authentication primitives.
//!
//! - [`jwt`] -- access-token validation.

pub mod jwt;
