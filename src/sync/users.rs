//! User resource builder
//!
//! Users are never enumerated directly; they surface by appearing as
//! `user:` members of a project's IAM bindings. The same email legitimately
//! shows up once per project it has access to, so no cross-project
//! deduplication is performed. Users are leaf principals: they hold no
//! entitlements of their own.

use super::{
    search_projects_page, user_resource, Entitlement, Grant, ListResult, ProjectScope, Resource,
    ResourceId, ResourceKind, ResourceSyncer, ResourceType, USER_RESOURCE_TYPE,
};
use crate::gcp::client::GcpClient;
use crate::mapping::PrincipalRef;
use crate::pagination::{Bag, PageFrame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct UserBuilder {
    client: Arc<GcpClient>,
    scope: ProjectScope,
}

impl UserBuilder {
    pub fn new(client: Arc<GcpClient>, scope: ProjectScope) -> Self {
        Self { client, scope }
    }
}

#[async_trait]
impl ResourceSyncer for UserBuilder {
    fn resource_type(&self) -> &'static ResourceType {
        &USER_RESOURCE_TYPE
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
                Err(e) => return Err(e).context("bqsync: listing users failed"),
            };

            let parent = ResourceId::new(ResourceKind::Project, &project.project_id);
            for binding in &policy.bindings {
                for member in &binding.members {
                    if let PrincipalRef::User(email) = PrincipalRef::parse(member) {
                        resources.push(user_resource(&email, Some(parent.clone())));
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

    /// Always empty: users are leaf principals
    async fn entitlements(&self, _resource: &Resource) -> Result<Vec<Entitlement>> {
        Ok(Vec::new())
    }

    /// Always empty: users hold entitlements, they do not grant them
    async fn grants(&self, _resource: &Resource) -> Result<Vec<Grant>> {
        Ok(Vec::new())
    }
}
