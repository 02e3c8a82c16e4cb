//! GCP Client
//!
//! Typed client for the two API surfaces the connector reads from:
//! Cloud Resource Manager (project search, IAM policy) and BigQuery
//! (dataset listing and metadata). Base URLs are injectable so tests can
//! point the client at a mock server.

use super::auth::GcpCredentials;
use super::error::ApiError;
use super::http::GcpHttpClient;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

/// Default Cloud Resource Manager endpoint
pub const RESOURCEMANAGER_BASE: &str = "https://cloudresourcemanager.googleapis.com";
/// Default BigQuery endpoint
pub const BIGQUERY_BASE: &str = "https://bigquery.googleapis.com";

/// Where the client gets its bearer tokens from.
///
/// `Static` exists for tests; production always uses `Credentials`.
#[derive(Clone)]
enum TokenSource {
    Credentials(GcpCredentials),
    Static(String),
}

/// Main GCP client, shared read-only across builders
#[derive(Clone)]
pub struct GcpClient {
    http: GcpHttpClient,
    token_source: TokenSource,
    resourcemanager_base: String,
    bigquery_base: String,
}

impl GcpClient {
    /// Create a new GCP client against the production endpoints
    pub fn new(credentials: GcpCredentials) -> Result<Self, ApiError> {
        Ok(Self {
            http: GcpHttpClient::new()?,
            token_source: TokenSource::Credentials(credentials),
            resourcemanager_base: RESOURCEMANAGER_BASE.to_string(),
            bigquery_base: BIGQUERY_BASE.to_string(),
        })
    }

    /// Create a client with a fixed token and custom base URLs (test seam)
    pub fn with_static_token(
        token: &str,
        resourcemanager_base: &str,
        bigquery_base: &str,
    ) -> Result<Self, ApiError> {
        Ok(Self {
            http: GcpHttpClient::new()?,
            token_source: TokenSource::Static(token.to_string()),
            resourcemanager_base: resourcemanager_base.trim_end_matches('/').to_string(),
            bigquery_base: bigquery_base.trim_end_matches('/').to_string(),
        })
    }

    async fn get_token(&self) -> Result<String, ApiError> {
        match &self.token_source {
            TokenSource::Credentials(credentials) => {
                credentials.get_token().await.map_err(|e| ApiError::Api {
                    http_status: 401,
                    message: format!("failed to obtain access token: {e}"),
                    payload: None,
                })
            }
            TokenSource::Static(token) => Ok(token.clone()),
        }
    }

    /// Drop the cached token and fetch a fresh one
    async fn refresh_token(&self) -> Result<String, ApiError> {
        match &self.token_source {
            TokenSource::Credentials(credentials) => {
                credentials.refresh_token().await.map_err(|e| ApiError::Api {
                    http_status: 401,
                    message: format!("failed to refresh access token: {e}"),
                    payload: None,
                })
            }
            TokenSource::Static(token) => Ok(token.clone()),
        }
    }

    /// GET with a one-shot token refresh when the API rejects the bearer.
    /// A cached token can go stale within its expected TTL; one refresh and
    /// retry covers that without masking a real authorization failure.
    async fn get_json(&self, url: &str) -> Result<Value, ApiError> {
        let token = self.get_token().await?;
        match self.http.get(url, &token).await {
            Err(e) if is_token_rejection(&e) => {
                tracing::debug!("bearer token rejected, refreshing and retrying");
                let token = self.refresh_token().await?;
                self.http.get(url, &token).await
            }
            result => result,
        }
    }

    /// POST counterpart of [`Self::get_json`]
    async fn post_json(&self, url: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let token = self.get_token().await?;
        match self.http.post(url, &token, body).await {
            Err(e) if is_token_rejection(&e) => {
                tracing::debug!("bearer token rejected, refreshing and retrying");
                let token = self.refresh_token().await?;
                self.http.post(url, &token, body).await
            }
            result => result,
        }
    }

    /// Build a Resource Manager API URL
    fn resourcemanager_url(&self, path: &str) -> String {
        format!("{}/v3/{}", self.resourcemanager_base, path)
    }

    /// Build a BigQuery API URL
    fn bigquery_url(&self, path: &str) -> String {
        format!("{}/bigquery/v2/{}", self.bigquery_base, path)
    }

    /// Search all projects visible to the credentials, one page at a time
    pub async fn search_projects(
        &self,
        query: &str,
        page_token: &str,
    ) -> Result<ProjectPage, ApiError> {
        let mut url = Url::parse(&self.resourcemanager_url("projects:search"))?;
        if !query.is_empty() {
            url.query_pairs_mut().append_pair("query", query);
        }
        if !page_token.is_empty() {
            url.query_pairs_mut().append_pair("pageToken", page_token);
        }

        let response = self.get_json(url.as_str()).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Fetch the IAM policy of one project (unpaginated)
    pub async fn get_iam_policy(&self, project_id: &str) -> Result<IamPolicy, ApiError> {
        let url = self.resourcemanager_url(&format!("projects/{}:getIamPolicy", project_id));
        let response = self.post_json(&url, None).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// List datasets in one project, one page at a time
    pub async fn list_datasets(
        &self,
        project_id: &str,
        page_token: &str,
    ) -> Result<DatasetPage, ApiError> {
        let mut url = Url::parse(&self.bigquery_url(&format!("projects/{}/datasets", project_id)))?;
        if !page_token.is_empty() {
            url.query_pairs_mut().append_pair("pageToken", page_token);
        }

        let response = self.get_json(url.as_str()).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Fetch one dataset's metadata, including its legacy ACL (may 404)
    pub async fn get_dataset(
        &self,
        project_id: &str,
        dataset_id: &str,
    ) -> Result<DatasetMetadata, ApiError> {
        let url = self.bigquery_url(&format!(
            "projects/{}/datasets/{}",
            project_id, dataset_id
        ));
        let response = self.get_json(&url).await?;
        Ok(serde_json::from_value(response)?)
    }
}

fn is_token_rejection(error: &ApiError) -> bool {
    matches!(error, ApiError::Api { http_status: 401, .. })
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// One page of a project search
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPage {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub next_page_token: String,
}

/// A project from the Resource Manager search API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Resource name, e.g. `projects/415104041262`
    #[serde(default)]
    pub name: String,
    pub project_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub state: String,
}

/// A project's IAM policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IamPolicy {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// One role-to-members binding within an IAM policy
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Binding {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// One page of a dataset listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetPage {
    #[serde(default)]
    pub datasets: Vec<DatasetListing>,
    #[serde(default)]
    pub next_page_token: String,
}

/// A dataset as returned by the list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetListing {
    pub dataset_reference: DatasetReference,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetReference {
    pub dataset_id: String,
    pub project_id: String,
}

/// Full dataset metadata, carrying the legacy ACL
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMetadata {
    #[serde(default)]
    pub dataset_reference: DatasetReference,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub access: Vec<AccessEntry>,
}

/// One legacy ACL entry on a dataset.
///
/// The API identifies the entity kind by which field is populated, so the
/// struct mirrors that and [`AccessEntry::entity`] folds it back into a sum
/// type for exhaustive matching.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessEntry {
    /// Legacy role string: OWNER, WRITER or READER. The API accepts IAM role
    /// names on write but only ever returns the legacy format.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user_by_email: Option<String>,
    #[serde(default)]
    pub group_by_email: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub special_group: Option<String>,
    #[serde(default)]
    pub iam_member: Option<String>,
    #[serde(default)]
    pub view: Option<serde_json::Value>,
    #[serde(default)]
    pub routine: Option<serde_json::Value>,
    #[serde(default)]
    pub dataset: Option<serde_json::Value>,
}

/// Entity kind of an [`AccessEntry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessEntity<'a> {
    UserEmail(&'a str),
    GroupEmail(&'a str),
    Domain(&'a str),
    SpecialGroup(&'a str),
    IamMember(&'a str),
    View,
    Routine,
    Dataset,
    Unknown,
}

impl AccessEntry {
    /// Resolve which entity field this entry carries
    pub fn entity(&self) -> AccessEntity<'_> {
        if let Some(email) = self.user_by_email.as_deref() {
            AccessEntity::UserEmail(email)
        } else if let Some(group) = self.special_group.as_deref() {
            AccessEntity::SpecialGroup(group)
        } else if let Some(email) = self.group_by_email.as_deref() {
            AccessEntity::GroupEmail(email)
        } else if let Some(domain) = self.domain.as_deref() {
            AccessEntity::Domain(domain)
        } else if let Some(member) = self.iam_member.as_deref() {
            AccessEntity::IamMember(member)
        } else if self.view.is_some() {
            AccessEntity::View
        } else if self.routine.is_some() {
            AccessEntity::Routine
        } else if self.dataset.is_some() {
            AccessEntity::Dataset
        } else {
            AccessEntity::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_page_deserializes() {
        let page: ProjectPage = serde_json::from_value(json!({
            "projects": [
                {"name": "projects/111", "projectId": "proj-a", "displayName": "Project A", "state": "ACTIVE"},
                {"projectId": "proj-b"}
            ],
            "nextPageToken": "tok-1"
        }))
        .unwrap();

        assert_eq!(page.projects.len(), 2);
        assert_eq!(page.projects[0].project_id, "proj-a");
        assert_eq!(page.projects[1].display_name, "");
        assert_eq!(page.next_page_token, "tok-1");
    }

    #[test]
    fn test_empty_policy_deserializes() {
        let policy: IamPolicy = serde_json::from_value(json!({"etag": "abc="})).unwrap();
        assert!(policy.bindings.is_empty());
    }

    #[test]
    fn test_access_entry_entity_resolution() {
        let entry: AccessEntry = serde_json::from_value(json!({
            "role": "OWNER",
            "userByEmail": "alice@example.com"
        }))
        .unwrap();
        assert_eq!(entry.entity(), AccessEntity::UserEmail("alice@example.com"));

        let entry: AccessEntry = serde_json::from_value(json!({
            "role": "READER",
            "specialGroup": "projectReaders"
        }))
        .unwrap();
        assert_eq!(entry.entity(), AccessEntity::SpecialGroup("projectReaders"));

        let entry: AccessEntry = serde_json::from_value(json!({
            "view": {"projectId": "p", "datasetId": "d", "tableId": "t"}
        }))
        .unwrap();
        assert_eq!(entry.entity(), AccessEntity::View);
    }

    #[test]
    fn test_dataset_page_deserializes() {
        let page: DatasetPage = serde_json::from_value(json!({
            "datasets": [
                {"datasetReference": {"datasetId": "sales", "projectId": "proj-a"}}
            ]
        }))
        .unwrap();
        assert_eq!(page.datasets[0].dataset_reference.dataset_id, "sales");
        assert_eq!(page.next_page_token, "");
    }
}
