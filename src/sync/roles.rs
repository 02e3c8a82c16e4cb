//! Role resource builder
//!
//! Roles are not enumerable on their own; they are whatever role names
//! appear in each project's IAM policy bindings, scoped under that project.
//! Grants read the one binding matching the role and fan out to its user
//! and service-account members.

use super::{
    role_resource, search_projects_page, Entitlement, Grant, ListResult, ProjectScope, Resource,
    ResourceId, ResourceKind, ResourceSyncer, ResourceType, ROLE_RESOURCE_TYPE,
};
use crate::gcp::client::GcpClient;
use crate::mapping::{PrincipalRef, ASSIGNED_ENTITLEMENT};
use crate::pagination::{Bag, PageFrame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

pub struct RoleBuilder {
    client: Arc<GcpClient>,
    scope: ProjectScope,
}

impl RoleBuilder {
    pub fn new(client: Arc<GcpClient>, scope: ProjectScope) -> Self {
        Self { client, scope }
    }
}

#[async_trait]
impl ResourceSyncer for RoleBuilder {
    fn resource_type(&self) -> &'static ResourceType {
        &ROLE_RESOURCE_TYPE
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

            // bindings repeat a role only with distinct conditions; dedupe
            // so each role surfaces once per project
            let mut seen = HashSet::new();
            for binding in &policy.bindings {
                if seen.insert(binding.role.as_str()) {
                    resources.push(role_resource(&binding.role, &project.project_id));
                }
            }
        }

        bag.next(Some(page.next_page_token));

        Ok(ListResult {
            resources,
            next_page_token: bag.marshal()?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> Result<Vec<Entitlement>> {
        if self.scope.excludes_resource(resource) {
            return Ok(Vec::new());
        }

        Ok(vec![Entitlement::assignment(
            &resource.id,
            ASSIGNED_ENTITLEMENT,
            format!("{} role {}", resource.display_name, ASSIGNED_ENTITLEMENT),
            format!("Assigned to {} role", resource.display_name),
            vec![ResourceKind::User, ResourceKind::ServiceAccount],
        )])
    }

    async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>> {
        if self.scope.excludes_resource(resource) {
            return Ok(Vec::new());
        }

        let project_id = resource
            .parent
            .as_ref()
            .map(|p| p.id.as_str())
            .context("bqsync: role resource has no parent project")?;

        let policy = match self.client.get_iam_policy(project_id).await {
            Ok(policy) => policy,
            Err(e) if e.is_permission_denied() => return Ok(Vec::new()),
            Err(e) => return Err(e).context("bqsync: listing grants for roles failed"),
        };

        let mut grants = Vec::new();
        for binding in &policy.bindings {
            if binding.role != resource.id.id {
                continue;
            }

            for member in &binding.members {
                match PrincipalRef::parse(member) {
                    PrincipalRef::User(email) => {
                        grants.push(Grant::new(
                            &resource.id,
                            ASSIGNED_ENTITLEMENT,
                            ResourceId::new(ResourceKind::User, email),
                        ));
                    }
                    PrincipalRef::ServiceAccount(email) => {
                        grants.push(Grant::new(
                            &resource.id,
                            ASSIGNED_ENTITLEMENT,
                            ResourceId::new(ResourceKind::ServiceAccount, email),
                        ));
                    }
                    PrincipalRef::Unrecognized(raw) => {
                        // TODO: expand group: members once the directory API
                        // client lands
                        tracing::debug!(member = %raw, "unrecognized member prefix, skipping");
                    }
                }
            }
        }

        Ok(grants)
    }
}
