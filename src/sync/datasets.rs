//! Dataset resource builder
//!
//! The hardest builder in the connector. Listing is a resumable two-level
//! crawl (every project, every page of datasets within it) threaded through
//! the pagination bag, so a sync can be interrupted and resumed mid-project.
//! Grants reconcile the dataset's legacy ACL with the enclosing project's
//! IAM policy:
//!
//! - a user-email entry with the OWNER role short-circuits to an `owner`
//!   grant for that principal;
//! - other user-email entries map their role through the legacy table, then
//!   the IAM table, and are skipped with a warning when neither matches;
//! - special-group entries (`projectOwners` and friends) have no enumerable
//!   membership, so the group is resolved to a basic IAM role and the grant
//!   fans out to the members of that role's binding;
//! - group, domain, view and routine entries are unhandled and skipped.
//!
//! Permission gaps on any remote call degrade to "no data here" instead of
//! aborting the sync.

use super::{
    dataset_resource, principal_for_email, search_projects_page, Entitlement, Grant, ListResult,
    ProjectScope, Resource, ResourceId, ResourceKind, ResourceSyncer, ResourceType,
    DATASET_RESOURCE_TYPE,
};
use crate::gcp::client::{AccessEntity, AccessEntry, DatasetMetadata, GcpClient, IamPolicy};
use crate::gcp::error::ErrorClass;
use crate::mapping::{
    PrincipalRef, RoleCatalog, DATASET_ENTITLEMENTS, DATASET_IAM_ENTITLEMENTS, LEGACY_OWNER,
    OWNER_ENTITLEMENT,
};
use crate::pagination::{Bag, PageFrame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct DatasetBuilder {
    client: Arc<GcpClient>,
    catalog: Arc<RoleCatalog>,
    scope: ProjectScope,
}

impl DatasetBuilder {
    pub fn new(client: Arc<GcpClient>, catalog: Arc<RoleCatalog>, scope: ProjectScope) -> Self {
        Self {
            client,
            catalog,
            scope,
        }
    }

    /// Grants derived from one legacy ACL entry, folded against the
    /// project's IAM policy. Per-entry anomalies are logged and skipped so
    /// one bad entry never sinks the whole call.
    fn entry_grants(
        &self,
        resource: &ResourceId,
        policy: &IamPolicy,
        entry: &AccessEntry,
    ) -> Vec<Grant> {
        let legacy_role = entry.role.as_deref().unwrap_or("");

        match entry.entity() {
            AccessEntity::UserEmail(email) => {
                if legacy_role == LEGACY_OWNER {
                    // owner short-circuit: the ACL is authoritative here,
                    // whatever the IAM policy says
                    let principal = principal_for_email(policy, email);
                    return vec![Grant::new(resource, OWNER_ENTITLEMENT, principal)];
                }

                let entitlement = self
                    .catalog
                    .legacy_role_entitlement(legacy_role)
                    .or_else(|| self.catalog.iam_role_entitlement(legacy_role));
                let Some(entitlement) = entitlement else {
                    tracing::warn!(
                        role = legacy_role,
                        "role is neither a legacy nor a mapped IAM role, skipping access entry"
                    );
                    return Vec::new();
                };

                let principal = principal_for_email(policy, email);
                vec![Grant::new(resource, entitlement, principal)]
            }
            AccessEntity::SpecialGroup(group) => {
                let Some(entitlement) = self.catalog.legacy_role_entitlement(legacy_role) else {
                    tracing::warn!(
                        role = legacy_role,
                        group,
                        "entitlement for legacy role not found, skipping access entry"
                    );
                    return Vec::new();
                };

                let Some(binding_role) = self.catalog.special_group_role(group) else {
                    tracing::warn!(group, "special group not found, skipping access entry");
                    return Vec::new();
                };

                let mut grants = Vec::new();
                for binding in &policy.bindings {
                    if binding.role != binding_role {
                        continue;
                    }

                    for member in &binding.members {
                        match PrincipalRef::parse(member) {
                            PrincipalRef::User(email) => {
                                let principal = ResourceId::new(ResourceKind::User, email);
                                grants.push(Grant::new(resource, entitlement, principal));
                            }
                            PrincipalRef::ServiceAccount(email) => {
                                let principal =
                                    ResourceId::new(ResourceKind::ServiceAccount, email);
                                grants.push(Grant::new(resource, entitlement, principal));
                            }
                            PrincipalRef::Unrecognized(raw) => {
                                tracing::debug!(member = %raw, "unrecognized member prefix, skipping");
                            }
                        }
                    }
                }
                grants
            }
            other => {
                // groupByEmail, domain, view, routine, linked dataset
                tracing::info!(entity = ?other, "skipping access entry for unhandled entity type");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl ResourceSyncer for DatasetBuilder {
    fn resource_type(&self) -> &'static ResourceType {
        &DATASET_RESOURCE_TYPE
    }

    /// One crawl step per call: either a page of the project search (which
    /// descends into each discovered project) or a page of one project's
    /// datasets. The bag keeps the position between calls.
    async fn list(&self, _parent: Option<&ResourceId>, page_token: &str) -> Result<ListResult> {
        let mut bag = Bag::unmarshal(page_token)?;
        if bag.current().is_none() {
            bag.push(PageFrame::new(ResourceKind::Project));
        }

        let mut resources = Vec::new();
        let frame = bag.current().cloned().context("bqsync: empty page state")?;

        match frame.kind {
            ResourceKind::Project => {
                if let Some(page) = search_projects_page(&self.client, &mut bag).await? {
                    bag.next(Some(page.next_page_token));

                    for project in &page.projects {
                        if !self.scope.permits(&project.project_id) {
                            tracing::debug!(
                                project_id = %project.project_id,
                                "project out of scope, skipping"
                            );
                            continue;
                        }
                        bag.push(PageFrame::scoped(
                            ResourceKind::Dataset,
                            &project.project_id,
                        ));
                    }
                }
            }
            ResourceKind::Dataset => {
                let project_id = frame
                    .resource_id
                    .as_deref()
                    .context("bqsync: dataset page state missing its project")?;

                match self.client.list_datasets(project_id, bag.page_token()).await {
                    Ok(page) => {
                        for dataset in &page.datasets {
                            resources.push(dataset_resource(
                                &dataset.dataset_reference.dataset_id,
                                &dataset.dataset_reference.project_id,
                            ));
                        }
                        bag.next(Some(page.next_page_token));
                    }
                    Err(e)
                        if matches!(
                            e.classify(),
                            ErrorClass::PermissionDenied | ErrorClass::NotFound
                        ) =>
                    {
                        tracing::warn!(project_id, error = %e, "skipping datasets of inaccessible project");
                        bag.next(None);
                    }
                    Err(e) => return Err(e).context("bqsync: unable to fetch datasets"),
                }
            }
            other => {
                anyhow::bail!("bqsync: unexpected page state kind {other} in dataset crawl");
            }
        }

        Ok(ListResult {
            resources,
            next_page_token: bag.marshal()?,
        })
    }

    /// Statically enumerated: the three legacy entitlements plus one per
    /// recognized IAM-mapped role. No remote calls.
    async fn entitlements(&self, resource: &Resource) -> Result<Vec<Entitlement>> {
        if self.scope.excludes_resource(resource) {
            return Ok(Vec::new());
        }

        let verb = |slug: &str| match slug {
            "owner" => "Owns",
            "writer" => "Can write to",
            _ => "Can view",
        };

        let mut entitlements = Vec::new();
        for slug in DATASET_ENTITLEMENTS {
            entitlements.push(Entitlement::permission(
                &resource.id,
                slug,
                format!("{} dataset {}", resource.display_name, slug),
                format!("{} {} dataset", verb(slug), resource.display_name),
                vec![ResourceKind::User],
            ));
        }

        for slug in DATASET_IAM_ENTITLEMENTS {
            entitlements.push(Entitlement::permission(
                &resource.id,
                slug,
                format!("{} dataset {}", resource.display_name, slug),
                format!("Has role {} in {} dataset", slug, resource.display_name),
                vec![ResourceKind::User],
            ));
        }

        Ok(entitlements)
    }

    async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>> {
        if self.scope.excludes_resource(resource) {
            return Ok(Vec::new());
        }

        let dataset_id = resource.id.id.as_str();
        let project_id = resource
            .parent
            .as_ref()
            .map(|p| p.id.as_str())
            .context("bqsync: dataset resource has no parent project")?;

        let metadata: DatasetMetadata =
            match self.client.get_dataset(project_id, dataset_id).await {
                Ok(metadata) => metadata,
                Err(e) if e.is_not_found() => {
                    // deleted between listing and grant expansion
                    tracing::debug!(project_id, dataset_id, "dataset not found");
                    return Ok(Vec::new());
                }
                Err(e) if e.is_permission_denied() => {
                    tracing::warn!(project_id, dataset_id, error = %e, "dataset metadata not accessible");
                    return Ok(Vec::new());
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!(
                            "bqsync: unable to fetch dataset metadata (projectId:{} datasetId:{})",
                            project_id, dataset_id
                        )
                    })
                }
            };

        let policy = match self.client.get_iam_policy(project_id).await {
            Ok(policy) => Some(policy),
            Err(e) if e.is_permission_denied() => None,
            Err(e) => return Err(e).context("bqsync: failed to get IAM policy"),
        };

        let Some(policy) = policy else {
            return Ok(Vec::new());
        };

        let mut grants = Vec::new();
        for entry in &metadata.access {
            grants.extend(self.entry_grants(&resource.id, &policy, entry));
        }

        Ok(grants)
    }
}
