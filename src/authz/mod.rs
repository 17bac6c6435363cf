//! Authorization resolution core: context expressions, policy chains, and
//! ACL decisions.
//!
//! Every check follows the same path: a caller builds a [`chain::PolicyChain`]
//! naming registered [`handlers`], a handler may [`context::RequestContext::fetch`]
//! a context expression to turn request state into a concrete id, and the
//! ACL handler hands that id to the [`acl::AclResolver`]. Denial anywhere
//! surfaces uniformly as [`errors::AuthzError::Forbidden`].

pub mod acl;
pub mod chain;
pub mod context;
pub mod errors;
pub mod eval;
pub mod expr;
pub mod handlers;
pub mod models;
pub mod plan;
pub mod web;
