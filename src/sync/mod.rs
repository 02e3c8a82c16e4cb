//! Normalized entitlement/grant model and the resource-builder contract
//!
//! Every resource kind the connector syncs is driven through the same
//! three-operation [`ResourceSyncer`] contract: enumerate resources page by
//! page, enumerate the entitlements grantable on one resource, and
//! materialize the grants currently held against it. The orchestrator owns
//! the loop; builders own nothing between calls except what is folded into
//! the opaque page token.
//!
//! # Module Structure
//!
//! - [`projects`] - project builder (resource roots)
//! - [`datasets`] - dataset builder (two-level crawl, ACL x IAM grants)
//! - [`roles`] - role builder (one role per distinct IAM binding)
//! - [`users`] / [`service_accounts`] - principal builders (leaves)
//! - [`connector`] - the façade handed to the host

pub mod connector;
pub mod datasets;
pub mod projects;
pub mod roles;
pub mod service_accounts;
pub mod users;

use crate::gcp::client::{GcpClient, IamPolicy, Project, ProjectPage};
use crate::mapping::{strip_role_prefix, PrincipalRef};
use crate::pagination::Bag;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// The resource kinds this connector syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Project,
    Dataset,
    Role,
    User,
    ServiceAccount,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Project => "project",
            ResourceKind::Dataset => "dataset",
            ResourceKind::Role => "role",
            ResourceKind::User => "user",
            ResourceKind::ServiceAccount => "service_account",
        };
        f.write_str(s)
    }
}

/// Static descriptor for one resource kind
#[derive(Debug, Clone, Copy)]
pub struct ResourceType {
    pub kind: ResourceKind,
    pub display_name: &'static str,
    pub description: &'static str,
}

pub const USER_RESOURCE_TYPE: ResourceType = ResourceType {
    kind: ResourceKind::User,
    display_name: "User",
    description: "User of Google Cloud Platform",
};

pub const SERVICE_ACCOUNT_RESOURCE_TYPE: ResourceType = ResourceType {
    kind: ResourceKind::ServiceAccount,
    display_name: "Service Account",
    description: "Service account of Google Cloud Platform",
};

pub const ROLE_RESOURCE_TYPE: ResourceType = ResourceType {
    kind: ResourceKind::Role,
    display_name: "Role",
    description: "IAM role bound within a Google BigQuery project",
};

pub const DATASET_RESOURCE_TYPE: ResourceType = ResourceType {
    kind: ResourceKind::Dataset,
    display_name: "Dataset",
    description: "Dataset of Google BigQuery",
};

pub const PROJECT_RESOURCE_TYPE: ResourceType = ResourceType {
    kind: ResourceKind::Project,
    display_name: "Project",
    description: "Project of Google BigQuery",
};

/// Unique identifier of a synced resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One synced resource
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: ResourceId,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<ResourceId>,
    /// Free-form trait profile (email for principals)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<serde_json::Value>,
}

impl Resource {
    /// Project id this resource is scoped under: its own id for a project,
    /// the parent's id for everything project-scoped.
    pub fn scoping_project(&self) -> Option<&str> {
        match self.id.kind {
            ResourceKind::Project => Some(&self.id.id),
            _ => self
                .parent
                .as_ref()
                .filter(|p| p.kind == ResourceKind::Project)
                .map(|p| p.id.as_str()),
        }
    }
}

/// Build a project resource from a search result
pub fn project_resource(project: &Project) -> Resource {
    let display_name = if project.display_name.is_empty() {
        project.project_id.clone()
    } else {
        project.display_name.clone()
    };

    Resource {
        id: ResourceId::new(ResourceKind::Project, &project.project_id),
        display_name,
        parent: None,
        profile: None,
    }
}

/// Build a dataset resource scoped under its project
pub fn dataset_resource(dataset_id: &str, project_id: &str) -> Resource {
    Resource {
        id: ResourceId::new(ResourceKind::Dataset, dataset_id),
        display_name: dataset_id.to_string(),
        parent: Some(ResourceId::new(ResourceKind::Project, project_id)),
        profile: None,
    }
}

/// Build a role resource scoped under its project. The full role string is
/// the identity; the prefix is stripped for display only.
pub fn role_resource(role: &str, project_id: &str) -> Resource {
    Resource {
        id: ResourceId::new(ResourceKind::Role, role),
        display_name: strip_role_prefix(role).to_string(),
        parent: Some(ResourceId::new(ResourceKind::Project, project_id)),
        profile: None,
    }
}

/// Build a user resource from a bare email
pub fn user_resource(email: &str, parent: Option<ResourceId>) -> Resource {
    Resource {
        id: ResourceId::new(ResourceKind::User, email),
        display_name: email.to_string(),
        parent,
        profile: Some(serde_json::json!({ "email": email, "login": email })),
    }
}

/// Build a service-account resource from a bare email
pub fn service_account_resource(email: &str, parent: Option<ResourceId>) -> Resource {
    Resource {
        id: ResourceId::new(ResourceKind::ServiceAccount, email),
        display_name: email.to_string(),
        parent,
        profile: Some(serde_json::json!({ "email": email })),
    }
}

/// Whether an entitlement models membership or a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementPurpose {
    Assignment,
    Permission,
}

/// A named grantable capability attached to one resource
#[derive(Debug, Clone, Serialize)]
pub struct Entitlement {
    /// Stable id, `<kind>:<resource>:<slug>`
    pub id: String,
    pub resource: ResourceId,
    pub slug: String,
    pub display_name: String,
    pub description: String,
    pub purpose: EntitlementPurpose,
    pub grantable_to: Vec<ResourceKind>,
}

impl Entitlement {
    fn build(
        purpose: EntitlementPurpose,
        resource: &ResourceId,
        slug: &str,
        display_name: String,
        description: String,
        grantable_to: Vec<ResourceKind>,
    ) -> Self {
        Self {
            id: format!("{}:{}", resource, slug),
            resource: resource.clone(),
            slug: slug.to_string(),
            display_name,
            description,
            purpose,
            grantable_to,
        }
    }

    pub fn assignment(
        resource: &ResourceId,
        slug: &str,
        display_name: String,
        description: String,
        grantable_to: Vec<ResourceKind>,
    ) -> Self {
        Self::build(
            EntitlementPurpose::Assignment,
            resource,
            slug,
            display_name,
            description,
            grantable_to,
        )
    }

    pub fn permission(
        resource: &ResourceId,
        slug: &str,
        display_name: String,
        description: String,
        grantable_to: Vec<ResourceKind>,
    ) -> Self {
        Self::build(
            EntitlementPurpose::Permission,
            resource,
            slug,
            display_name,
            description,
            grantable_to,
        )
    }
}

/// A materialized (resource, entitlement, principal) triple
#[derive(Debug, Clone, Serialize)]
pub struct Grant {
    /// Stable id, `<entitlement id>:<principal>`
    pub id: String,
    pub resource: ResourceId,
    pub entitlement: String,
    pub principal: ResourceId,
}

impl Grant {
    pub fn new(resource: &ResourceId, entitlement: &str, principal: ResourceId) -> Self {
        Self {
            id: format!("{}:{}:{}", resource, entitlement, principal),
            resource: resource.clone(),
            entitlement: entitlement.to_string(),
            principal,
        }
    }
}

/// One page of a List call
#[derive(Debug, Clone, Default)]
pub struct ListResult {
    pub resources: Vec<Resource>,
    /// Opaque token for the next page, `""` when the enumeration is done
    pub next_page_token: String,
}

/// Uniform three-operation contract each resource builder implements
#[async_trait]
pub trait ResourceSyncer: Send + Sync {
    /// Fixed type descriptor, no I/O
    fn resource_type(&self) -> &'static ResourceType;

    /// Enumerate one page of resources
    async fn list(&self, parent: Option<&ResourceId>, page_token: &str) -> Result<ListResult>;

    /// Statically enumerate the entitlements grantable on `resource`
    async fn entitlements(&self, resource: &Resource) -> Result<Vec<Entitlement>>;

    /// Materialize the grants currently held against `resource`
    async fn grants(&self, resource: &Resource) -> Result<Vec<Grant>>;
}

/// Restriction on which projects a sync pass ever visits.
///
/// Supplied at connector construction and immutable for the lifetime of a
/// sync. Out-of-scope projects are skipped during listing, and grants or
/// entitlements for resources scoped under them resolve to empty without
/// error.
#[derive(Debug, Clone, Default)]
pub enum ProjectScope {
    #[default]
    All,
    Allow(HashSet<String>),
    Deny(HashSet<String>),
}

impl ProjectScope {
    pub fn allow(ids: impl IntoIterator<Item = String>) -> Self {
        ProjectScope::Allow(ids.into_iter().collect())
    }

    pub fn deny(ids: impl IntoIterator<Item = String>) -> Self {
        ProjectScope::Deny(ids.into_iter().collect())
    }

    pub fn permits(&self, project_id: &str) -> bool {
        match self {
            ProjectScope::All => true,
            ProjectScope::Allow(ids) => ids.contains(project_id),
            ProjectScope::Deny(ids) => !ids.contains(project_id),
        }
    }

    /// True when `resource` is scoped under a project this scope excludes
    pub fn excludes_resource(&self, resource: &Resource) -> bool {
        match resource.scoping_project() {
            Some(project_id) => !self.permits(project_id),
            None => false,
        }
    }
}

/// Find the principal kind for a bare ACL email by scanning the policy
/// bindings: an email bound as `serviceAccount:` anywhere in the project is
/// a service account, otherwise it is treated as a user. The legacy ACL
/// carries no kind of its own.
pub(crate) fn principal_for_email(policy: &IamPolicy, email: &str) -> ResourceId {
    for binding in &policy.bindings {
        for member in &binding.members {
            if let PrincipalRef::ServiceAccount(sa) = PrincipalRef::parse(member) {
                if sa == email {
                    return ResourceId::new(ResourceKind::ServiceAccount, email);
                }
            }
        }
    }

    ResourceId::new(ResourceKind::User, email)
}

/// One page of the project search, shared by every builder that walks the
/// project namespace. A permission-denied search is an empty namespace, not
/// an error: the frame is popped so the enumeration finishes cleanly, and
/// `None` tells the caller there is nothing to walk.
pub(crate) async fn search_projects_page(
    client: &GcpClient,
    bag: &mut Bag,
) -> Result<Option<ProjectPage>> {
    match client.search_projects("", bag.page_token()).await {
        Ok(page) => Ok(Some(page)),
        Err(e) if e.is_permission_denied() => {
            tracing::warn!(error = %e, "project search not permitted, treating as empty");
            bag.next(None);
            Ok(None)
        }
        Err(e) => Err(e).context("bqsync: unable to fetch projects"),
    }
}
