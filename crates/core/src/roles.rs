//! Role names carried in access-token claims.

/// Administrators may view and cancel any owner's jobs.
pub const ROLE_ADMIN: &str = "admin";

/// Regular journal creators.
pub const ROLE_CREATOR: &str = "creator";
