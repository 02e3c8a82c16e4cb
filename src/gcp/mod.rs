//! GCP API interaction module
//!
//! This module provides the remote half of the connector: authentication,
//! the HTTP wrapper, typed endpoints for the Resource Manager and BigQuery
//! APIs, and the error classification every builder relies on.
//!
//! # Module Structure
//!
//! - [`auth`] - service-account key loading and token caching
//! - [`client`] - typed GCP client (project search, IAM policy, datasets)
//! - [`error`] - [`error::ApiError`] and recoverability classification
//! - [`http`] - HTTP utilities for REST API calls

pub mod auth;
pub mod client;
pub mod error;
pub mod http;
