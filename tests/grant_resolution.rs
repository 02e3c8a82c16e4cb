//! End-to-end builder tests against a mocked GCP
//!
//! These drive the resource builders through list/entitlements/grants with
//! wiremock standing in for the Resource Manager and BigQuery APIs, covering
//! the grant-derivation rules and the permission-denied tolerance that the
//! builders must uphold.

use bqsync::gcp::client::GcpClient;
use bqsync::mapping::RoleCatalog;
use bqsync::sync::connector::Connector;
use bqsync::sync::datasets::DatasetBuilder;
use bqsync::sync::projects::ProjectBuilder;
use bqsync::sync::roles::RoleBuilder;
use bqsync::sync::users::UserBuilder;
use bqsync::sync::{
    dataset_resource, role_resource, ProjectScope, ResourceKind, ResourceSyncer,
};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{bearer_token, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer) -> Arc<GcpClient> {
    Arc::new(
        GcpClient::with_static_token("test-token", &server.uri(), &server.uri())
            .expect("client construction"),
    )
}

fn catalog() -> Arc<RoleCatalog> {
    Arc::new(RoleCatalog::builtin())
}

async fn mock_project_search(server: &MockServer, projects: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/v3/projects:search"))
        .and(bearer_token("test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "projects": projects })))
        .mount(server)
        .await;
}

async fn mock_iam_policy(server: &MockServer, project_id: &str, bindings: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(format!("/v3/projects/{}:getIamPolicy", project_id)))
        .and(bearer_token("test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "bindings": bindings })))
        .mount(server)
        .await;
}

async fn mock_dataset_metadata(
    server: &MockServer,
    project_id: &str,
    dataset_id: &str,
    access: serde_json::Value,
) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/bigquery/v2/projects/{}/datasets/{}",
            project_id, dataset_id
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "datasetReference": {"datasetId": dataset_id, "projectId": project_id},
            "access": access
        })))
        .mount(server)
        .await;
}

/// IAM binding with a user and a service account yields one assigned grant
/// per member, with the principal kind read off the member prefix.
#[tokio::test]
async fn role_grants_fan_out_to_binding_members() {
    let server = MockServer::start().await;
    mock_iam_policy(
        &server,
        "proj-a",
        json!([{
            "role": "roles/bigquery.admin",
            "members": [
                "user:alice@example.com",
                "serviceAccount:svc@proj.iam.gserviceaccount.com",
                "group:eng@example.com"
            ]
        }]),
    )
    .await;

    let builder = RoleBuilder::new(test_client(&server), ProjectScope::All);
    let role = role_resource("roles/bigquery.admin", "proj-a");
    let grants = builder.grants(&role).await.expect("grants");

    assert_eq!(grants.len(), 2);
    assert_eq!(grants[0].entitlement, "assigned");
    assert_eq!(grants[0].principal.kind, ResourceKind::User);
    assert_eq!(grants[0].principal.id, "alice@example.com");
    assert_eq!(grants[1].principal.kind, ResourceKind::ServiceAccount);
    assert_eq!(grants[1].principal.id, "svc@proj.iam.gserviceaccount.com");
}

/// A permission-denied IAM policy fetch makes dataset grants resolve to
/// empty, not to an error.
#[tokio::test]
async fn dataset_grants_tolerate_policy_permission_denied() {
    let server = MockServer::start().await;
    mock_dataset_metadata(
        &server,
        "proj-a",
        "sales",
        json!([{"role": "OWNER", "userByEmail": "alice@example.com"}]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v3/projects/proj-a:getIamPolicy"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "The caller does not have permission",
                "status": "PERMISSION_DENIED",
                "errors": [{"reason": "forbidden", "domain": "global"}]
            }
        })))
        .mount(&server)
        .await;

    let builder = DatasetBuilder::new(test_client(&server), catalog(), ProjectScope::All);
    let dataset = dataset_resource("sales", "proj-a");
    let grants = builder.grants(&dataset).await.expect("must not error");
    assert!(grants.is_empty());
}

/// A dataset deleted between listing and grant expansion yields empty
/// grants, not an error.
#[tokio::test]
async fn dataset_grants_treat_missing_dataset_as_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/proj-a/datasets/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": 404, "message": "Not found: Dataset proj-a:gone", "status": "NOT_FOUND"}
        })))
        .mount(&server)
        .await;

    let builder = DatasetBuilder::new(test_client(&server), catalog(), ProjectScope::All);
    let dataset = dataset_resource("gone", "proj-a");
    let grants = builder.grants(&dataset).await.expect("must not error");
    assert!(grants.is_empty());
}

/// An OWNER user-email ACL entry short-circuits to exactly one owner grant,
/// whatever the IAM policy contains.
#[tokio::test]
async fn dataset_owner_acl_entry_short_circuits() {
    let server = MockServer::start().await;
    mock_dataset_metadata(
        &server,
        "proj-a",
        "sales",
        json!([{"role": "OWNER", "userByEmail": "alice@example.com"}]),
    )
    .await;
    mock_iam_policy(
        &server,
        "proj-a",
        json!([
            {"role": "roles/owner", "members": ["user:someone-else@example.com"]},
            {"role": "roles/editor", "members": ["user:bob@example.com"]}
        ]),
    )
    .await;

    let builder = DatasetBuilder::new(test_client(&server), catalog(), ProjectScope::All);
    let dataset = dataset_resource("sales", "proj-a");
    let grants = builder.grants(&dataset).await.expect("grants");

    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].entitlement, "owner");
    assert_eq!(grants[0].principal.kind, ResourceKind::User);
    assert_eq!(grants[0].principal.id, "alice@example.com");
}

/// Legacy WRITER and READER entries map through the legacy table; an entry
/// with an unmapped role is skipped without failing the call.
#[tokio::test]
async fn dataset_legacy_roles_map_and_unknown_roles_skip() {
    let server = MockServer::start().await;
    mock_dataset_metadata(
        &server,
        "proj-a",
        "sales",
        json!([
            {"role": "WRITER", "userByEmail": "bob@example.com"},
            {"role": "READER", "userByEmail": "carol@example.com"},
            {"role": "SOMETHING_NEW", "userByEmail": "dave@example.com"},
            {"role": "roles/bigquery.admin", "userByEmail": "erin@example.com"}
        ]),
    )
    .await;
    mock_iam_policy(&server, "proj-a", json!([])).await;

    let builder = DatasetBuilder::new(test_client(&server), catalog(), ProjectScope::All);
    let dataset = dataset_resource("sales", "proj-a");
    let grants = builder.grants(&dataset).await.expect("grants");

    let pairs: Vec<(&str, &str)> = grants
        .iter()
        .map(|g| (g.entitlement.as_str(), g.principal.id.as_str()))
        .collect();
    assert_eq!(
        pairs,
        vec![
            ("writer", "bob@example.com"),
            ("viewer", "carol@example.com"),
            ("roles/bigquery.admin", "erin@example.com"),
        ]
    );
}

/// A special-group entry resolves through the project's own IAM bindings:
/// `projectReaders` reaches the members of the `roles/viewer` binding.
#[tokio::test]
async fn dataset_special_group_resolves_through_policy() {
    let server = MockServer::start().await;
    mock_dataset_metadata(
        &server,
        "proj-a",
        "sales",
        json!([
            {"role": "READER", "specialGroup": "projectReaders"},
            {"role": "READER", "domain": "example.com"},
            {"view": {"projectId": "proj-a", "datasetId": "other", "tableId": "v"}}
        ]),
    )
    .await;
    mock_iam_policy(
        &server,
        "proj-a",
        json!([
            {"role": "roles/viewer", "members": [
                "user:bob@example.com",
                "serviceAccount:svc@proj.iam.gserviceaccount.com",
                "group:readers@example.com"
            ]},
            {"role": "roles/editor", "members": ["user:unrelated@example.com"]}
        ]),
    )
    .await;

    let builder = DatasetBuilder::new(test_client(&server), catalog(), ProjectScope::All);
    let dataset = dataset_resource("sales", "proj-a");
    let grants = builder.grants(&dataset).await.expect("grants");

    assert_eq!(grants.len(), 2);
    assert!(grants.iter().all(|g| g.entitlement == "viewer"));
    assert_eq!(grants[0].principal.id, "bob@example.com");
    assert_eq!(grants[1].principal.kind, ResourceKind::ServiceAccount);
}

/// An allow-list scope filters the project listing and empties out grants
/// for resources scoped under excluded projects.
#[tokio::test]
async fn scope_allow_list_filters_projects_and_grants() {
    let server = MockServer::start().await;
    mock_project_search(
        &server,
        json!([
            {"name": "projects/1", "projectId": "proj-a", "displayName": "A", "state": "ACTIVE"},
            {"name": "projects/2", "projectId": "proj-b", "displayName": "B", "state": "ACTIVE"}
        ]),
    )
    .await;

    let scope = ProjectScope::allow(["proj-a".to_string()]);
    let client = test_client(&server);

    let builder = ProjectBuilder::new(client.clone(), scope.clone());
    let page = builder.list(None, "").await.expect("list");
    assert_eq!(page.resources.len(), 1);
    assert_eq!(page.resources[0].id.id, "proj-a");
    assert_eq!(page.next_page_token, "");

    // no IAM policy mock for proj-b: the scope check must short-circuit
    // before any remote call
    let roles = RoleBuilder::new(client.clone(), scope.clone());
    let out_of_scope = role_resource("roles/editor", "proj-b");
    assert!(roles.grants(&out_of_scope).await.expect("empty").is_empty());
    assert!(roles
        .entitlements(&out_of_scope)
        .await
        .expect("empty")
        .is_empty());

    let datasets = DatasetBuilder::new(client, catalog(), scope);
    let foreign = dataset_resource("sales", "proj-b");
    assert!(datasets.grants(&foreign).await.expect("empty").is_empty());
}

/// The dataset crawl pages through projects and datasets behind one opaque
/// token and can be resumed from any intermediate token.
#[tokio::test]
async fn dataset_list_resumes_across_projects_and_pages() {
    let server = MockServer::start().await;
    mock_project_search(
        &server,
        json!([
            {"name": "projects/1", "projectId": "proj-a", "displayName": "A", "state": "ACTIVE"},
            {"name": "projects/2", "projectId": "proj-b", "displayName": "B", "state": "ACTIVE"}
        ]),
    )
    .await;

    // proj-a has two pages of datasets
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/proj-a/datasets"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "datasets": [{"datasetReference": {"datasetId": "ds1", "projectId": "proj-a"}}],
            "nextPageToken": "a-page-2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/proj-a/datasets"))
        .and(query_param("pageToken", "a-page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "datasets": [{"datasetReference": {"datasetId": "ds2", "projectId": "proj-a"}}]
        })))
        .mount(&server)
        .await;
    // proj-b is not visible to the crawler
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/proj-b/datasets"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "forbidden", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let builder = DatasetBuilder::new(test_client(&server), catalog(), ProjectScope::All);

    let mut token = String::new();
    let mut seen = Vec::new();
    for _ in 0..16 {
        let page = builder.list(None, &token).await.expect("list page");
        for resource in &page.resources {
            seen.push(resource.id.id.clone());
        }
        if page.next_page_token.is_empty() {
            break;
        }
        token = page.next_page_token;
    }

    seen.sort();
    assert_eq!(seen, vec!["ds1", "ds2"]);
}

/// A garbage page token is a decode error, not a silent fresh start.
#[tokio::test]
async fn malformed_page_token_is_an_error() {
    let server = MockServer::start().await;
    let builder = UserBuilder::new(test_client(&server), ProjectScope::All);
    assert!(builder.list(None, "}{ not a token").await.is_err());
}

/// Users surface once per project binding membership; non-user members are
/// left out.
#[tokio::test]
async fn user_list_collects_user_members_per_project() {
    let server = MockServer::start().await;
    mock_project_search(
        &server,
        json!([{"name": "projects/1", "projectId": "proj-a", "displayName": "A", "state": "ACTIVE"}]),
    )
    .await;
    mock_iam_policy(
        &server,
        "proj-a",
        json!([
            {"role": "roles/editor", "members": [
                "user:alice@example.com",
                "serviceAccount:svc@proj.iam.gserviceaccount.com"
            ]},
            {"role": "roles/viewer", "members": ["user:alice@example.com"]}
        ]),
    )
    .await;

    let builder = UserBuilder::new(test_client(&server), ProjectScope::All);
    let page = builder.list(None, "").await.expect("list");

    // same principal may appear once per binding; dedup is the host's job
    assert_eq!(page.resources.len(), 2);
    assert!(page
        .resources
        .iter()
        .all(|r| r.id.id == "alice@example.com" && r.id.kind == ResourceKind::User));
    assert_eq!(
        page.resources[0].parent.as_ref().map(|p| p.id.as_str()),
        Some("proj-a")
    );
}

/// A permission-denied project search resolves to an empty, finished
/// enumeration rather than an error, for the flat builders and the dataset
/// crawl alike.
#[tokio::test]
async fn project_search_permission_denied_yields_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/projects:search"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {
                "code": 403,
                "message": "The caller does not have permission",
                "status": "PERMISSION_DENIED"
            }
        })))
        .mount(&server)
        .await;

    let client = test_client(&server);

    let page = ProjectBuilder::new(client.clone(), ProjectScope::All)
        .list(None, "")
        .await
        .expect("must not error");
    assert!(page.resources.is_empty());
    assert_eq!(page.next_page_token, "");

    let page = DatasetBuilder::new(client, catalog(), ProjectScope::All)
        .list(None, "")
        .await
        .expect("must not error");
    assert!(page.resources.is_empty());
    assert_eq!(page.next_page_token, "");
}

/// A 401 on an API call triggers one token refresh and a retry of the same
/// request.
#[tokio::test]
async fn rejected_token_is_refreshed_and_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/projects:search"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "Invalid Credentials", "status": "UNAUTHENTICATED"}
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mock_project_search(
        &server,
        json!([{"name": "projects/1", "projectId": "proj-a", "displayName": "A", "state": "ACTIVE"}]),
    )
    .await;

    let builder = ProjectBuilder::new(test_client(&server), ProjectScope::All);
    let page = builder.list(None, "").await.expect("list");
    assert_eq!(page.resources.len(), 1);
    assert_eq!(page.resources[0].id.id, "proj-a");
}

/// Validate fails fast when no project is visible to the credentials.
#[tokio::test]
async fn validate_requires_a_visible_project() {
    let server = MockServer::start().await;
    mock_project_search(&server, json!([])).await;

    let connector = Connector::with_client(test_client(&server), ProjectScope::All);
    assert!(connector.validate().await.is_err());
    assert_eq!(connector.metadata().display_name, "Google BigQuery");
    assert!(connector.asset("any").await.expect("no-op").is_none());
}

/// Project grants attach each dataset to the project's member entitlement.
#[tokio::test]
async fn project_grants_emit_dataset_membership() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/bigquery/v2/projects/proj-a/datasets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "datasets": [
                {"datasetReference": {"datasetId": "sales", "projectId": "proj-a"}},
                {"datasetReference": {"datasetId": "ops", "projectId": "proj-a"}}
            ]
        })))
        .mount(&server)
        .await;

    let builder = ProjectBuilder::new(test_client(&server), ProjectScope::All);
    let project = bqsync::sync::project_resource(&bqsync::gcp::client::Project {
        name: "projects/1".to_string(),
        project_id: "proj-a".to_string(),
        display_name: "A".to_string(),
        state: "ACTIVE".to_string(),
    });

    let grants = builder.grants(&project).await.expect("grants");
    assert_eq!(grants.len(), 2);
    assert!(grants.iter().all(|g| g.entitlement == "member"));
    assert!(grants
        .iter()
        .all(|g| g.principal.kind == ResourceKind::Dataset));
}
