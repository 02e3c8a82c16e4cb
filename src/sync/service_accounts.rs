//! Service-account resource builder
//!
//! Mirror of the user builder for `serviceAccount:` IAM members. Service
//! accounts are leaf principals discovered through binding membership only.

use super::{
    search_projects_page, service_account_resource, Entitlement, Grant, ListResult, ProjectScope,
    Resource, ResourceId, ResourceKind, ResourceSyncer, ResourceType,
    SERVICE_ACCOUNT_RESOURCE_TYPE,
};
use crate::gcp::client::GcpClient;
use crate::mapping::PrincipalRef;
use crate::pagination::{Bag, PageFrame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ServiceAccountBuilder {
    client: Arc<GcpClient>,
    scope: ProjectScope,
}

impl ServiceAccountBuilder {
    pub fn new(client: Arc<GcpClient>, scope: ProjectScope) -> Self {
        Self { client, scope }
    }
}

#[async_trait]
impl ResourceSyncer for ServiceAccountBuilder {
    fn resource_type(&self) -> &'static ResourceType {
        &SERVICE_ACCOUNT_RESOURCE_TYPE
    }

    async fn list(&self, _parent: Option<&ResourceId>, page_token: &str) -> Result<ListResult> {
        let mut bag = Bag::unmarshal(page_token)?;
        if bag.current().is_none() {
            bag.push(PageFrame::new(ResourceKind::Project));
        }

        let Some(page) = search_projects_page(&self.client, &mut bag).await? else {
            return Ok(ListResult {
                resources: Vec::new(),
                next_page_token: bag.marshal()?,
            });
        };

        let mut resources = Vec::new();
        for project in &page.projects {
            if !self.scope.permits(&project.project_id) {
                tracing::debug!(project_id = %project.project_id, "project out of scope, skipping");
                continue;
            }

            let policy = match self.client.get_iam_policy(&project.project_id).await {
                Ok(policy) => policy,
                Err(e) if e.is_permission_denied() => continue,
                Err(e) => return Err(e).context("bqsync: failed to get IAM policy"),
            };

            let parent = ResourceId::new(ResourceKind::Project, &project.project_id);
            for binding in &policy.bindings {
                for member in &binding.members {
                    if let PrincipalRef::ServiceAccount(email) = PrincipalRef::parse(member) {
                        resources.push(service_account_resource(&email, Some(parent.clone())));
                    }
                }
            }
        }

        bag.next(Some(page.next_page_token));

        Ok(ListResult {
            resources,
            next_page_token: bag.marshal()?,
        })
    }

    /// Always empty: service accounts are leaf principals
    async fn entitlements(&self, _resource: &Resource) -> Result<Vec<Entitlement>> {
        Ok(Vec::new())
    }

    /// Always empty: service accounts hold entitlements, they do not grant them
    async fn grants(&self, _resource: &Resource) -> Result<Vec<Grant>> {
        Ok(Vec::new())
    }
}
