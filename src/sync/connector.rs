//! Connector façade
//!
//! One-time construction of the shared GCP client from a credentials
//! artifact, plus the operations the governance host drives: the list of
//! resource builders, a cheap credential validation read, static metadata,
//! and a deliberately empty asset fetch.

use super::datasets::DatasetBuilder;
use super::projects::ProjectBuilder;
use super::roles::RoleBuilder;
use super::service_accounts::ServiceAccountBuilder;
use super::users::UserBuilder;
use super::{ProjectScope, ResourceSyncer};
use crate::gcp::auth::GcpCredentials;
use crate::gcp::client::GcpClient;
use crate::mapping::RoleCatalog;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Credentials artifact supplied by the host configuration
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Path to a service-account JSON key file
    KeyFile(PathBuf),
    /// Raw service-account JSON key bytes
    KeyJson(Vec<u8>),
}

/// Static display information about this connector
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectorMetadata {
    pub display_name: &'static str,
    pub description: &'static str,
}

/// The connector instance: shared clients plus the sync scope
pub struct Connector {
    client: Arc<GcpClient>,
    catalog: Arc<RoleCatalog>,
    scope: ProjectScope,
}

impl Connector {
    /// Construct the remote clients once; they are shared read-only by the
    /// builders for the lifetime of the connector.
    pub fn new(credentials: Credentials, scope: ProjectScope) -> Result<Self> {
        let credentials = match credentials {
            Credentials::KeyFile(path) => GcpCredentials::from_key_file(path)?,
            Credentials::KeyJson(bytes) => GcpCredentials::from_key_json(&bytes)?,
        };

        let client = GcpClient::new(credentials).context("bqsync: failed to create GCP client")?;

        Ok(Self::with_client(Arc::new(client), scope))
    }

    /// Assemble a connector around an existing client (test seam)
    pub fn with_client(client: Arc<GcpClient>, scope: ProjectScope) -> Self {
        Self {
            client,
            catalog: Arc::new(RoleCatalog::builtin()),
            scope,
        }
    }

    /// The resource builders, one per synced resource kind
    pub fn resource_syncers(&self) -> Vec<Box<dyn ResourceSyncer>> {
        vec![
            Box::new(UserBuilder::new(self.client.clone(), self.scope.clone())),
            Box::new(ServiceAccountBuilder::new(
                self.client.clone(),
                self.scope.clone(),
            )),
            Box::new(RoleBuilder::new(self.client.clone(), self.scope.clone())),
            Box::new(DatasetBuilder::new(
                self.client.clone(),
                self.catalog.clone(),
                self.scope.clone(),
            )),
            Box::new(ProjectBuilder::new(
                self.client.clone(),
                self.scope.clone(),
            )),
        ]
    }

    /// One cheap read to fail fast on bad credentials: the first page of
    /// the project search must succeed and show at least one project.
    pub async fn validate(&self) -> Result<()> {
        let page = self
            .client
            .search_projects("", "")
            .await
            .context("bqsync: credential validation failed")?;

        if page.projects.is_empty() {
            anyhow::bail!("bqsync: credentials are valid but no project is visible");
        }

        Ok(())
    }

    /// Static display information
    pub fn metadata(&self) -> ConnectorMetadata {
        ConnectorMetadata {
            display_name: "Google BigQuery",
            description: "Syncs BigQuery projects, datasets, roles and principals \
                          into entitlements and grants",
        }
    }

    /// Binary-asset fetch is not supported by this connector
    pub async fn asset(&self, _asset_ref: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
