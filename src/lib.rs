//! Identity-governance connector for Google BigQuery
//!
//! Discovers projects, datasets, IAM roles, users and service accounts and
//! translates BigQuery's three authorization surfaces (legacy dataset ACLs,
//! project IAM bindings, special-group ACL entities) into a normalized
//! entitlement/grant model, consumed page by page through an opaque
//! resumable page token.
//!
//! # Module Structure
//!
//! - [`gcp`] - authentication, typed API client, error classification
//! - [`pagination`] - the resumable nested page-token bag
//! - [`mapping`] - role tables and principal parsing
//! - [`sync`] - the resource builders and the connector façade
//! - [`config`] - configuration surface

pub mod config;
pub mod gcp;
pub mod mapping;
pub mod pagination;
pub mod sync;
