//! Palisade - authorization decision service
//!
//! Context-expression evaluation, short-circuit policy chains, and ACL
//! grant/deny resolution over sea-orm persistence, served through axum.

pub mod authz;
pub mod entities;
pub mod errors;
pub mod settings;
pub mod storage;
pub mod web;
