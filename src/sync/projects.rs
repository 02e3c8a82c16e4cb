//! Project resource builder
//!
//! Projects are the roots of the dataset namespace. Listing pages through
//! the Resource Manager project search; grants attach each of the project's
//! datasets to its `member` entitlement so the traversal hierarchy is
//! visible to the governance host.

use super::{
    dataset_resource, project_resource, search_projects_page, Entitlement, Grant, ListResult,
    ProjectScope, Resource, ResourceId, ResourceKind, ResourceSyncer, ResourceType,
    PROJECT_RESOURCE_TYPE,
};
use crate::gcp::client::GcpClient;
use crate::gcp::error::ErrorClass;
use crate::mapping::MEMBER_ENTITLEMENT;
use crate::pagination::{Bag, PageFrame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct ProjectBuilder {
    client: Arc<GcpClient>,
    scope: ProjectScope,
}

impl ProjectBuilder {
    pub fn new(client: Arc<GcpClient>, scope: ProjectScope) -> Self {
        Self { client, scope }
    }
}

#[async_trait]
impl ResourceSyncer for ProjectBuilder {
    fn resource_type(&self) -> &'static ResourceType {
        &PROJECT_RESOURCE_TYPE
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
            resources.push(project_resource(project));
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
            MEMBER_ENTITLEMENT,
            format!("{} project {}", resource.display_name, MEMBER_ENTITLEMENT),
            format!("Member of {} project", resource.display_name),
            vec![ResourceKind::User],
        )])
    }

    /// Emits one `member` grant per dataset in the project, so datasets hang
    /// off their project in the entitlement graph.
    async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>> {
        if self.scope.excludes_resource(resource) {
            return Ok(Vec::new());
        }

        let project_id = resource.id.id.as_str();
        let mut grants = Vec::new();
        let mut page_token = String::new();

        loop {
            let page = match self.client.list_datasets(project_id, &page_token).await {
                Ok(page) => page,
                Err(e)
                    if matches!(
                        e.classify(),
                        ErrorClass::PermissionDenied | ErrorClass::NotFound
                    ) =>
                {
                    tracing::warn!(project_id, error = %e, "skipping dataset listing");
                    break;
                }
                Err(e) => {
                    return Err(e).context("bqsync: unable to fetch datasets for project grants")
                }
            };

            for dataset in &page.datasets {
                let principal = dataset_resource(&dataset.dataset_reference.dataset_id, project_id);
                grants.push(Grant::new(&resource.id, MEMBER_ENTITLEMENT, principal.id));
            }

            if page.next_page_token.is_empty() {
                break;
            }
            page_token = page.next_page_token;
        }

        Ok(grants)
    }
}
