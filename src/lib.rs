//! Rolegate - role-based access control backend
//!
//! Permission rules keyed by role keyword, route template and HTTP method,
//! kept in step with role and API edits, enforced per request and recorded
//! in an operation log.

pub mod engine;
