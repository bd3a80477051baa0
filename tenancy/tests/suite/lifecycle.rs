use mims_tenancy::ErrorCategory;
use mims_tenancy::SystemClock;
use mims_tenancy::Tenancy;
use mims_tenancy::TenancyError;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tenancy_test_support::StaticDetector;
use tenancy_test_support::graphql_data;
use tenancy_test_support::graphql_errors;
use tenancy_test_support::graphql_queries;
use tenancy_test_support::tenancy_with;
use tenancy_test_support::test_config;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_partial_json;
use wiremock::matchers::body_string_contains;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

const NOT_READY: &str = "Not resolving queryNode. There's no GraphQL schema in Dgraph.";

async fn mount_schema_push(server: &MockServer, namespace: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/admin/schema"))
        .and(query_param("namespace", namespace))
        .and(header("content-type", "application/graphql"))
        .and(body_string_contains("type Node"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"code": "Success", "message": "Done"}
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_trial_read(server: &MockServer, failures_first: u64) {
    if failures_first > 0 {
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("queryNode(first: 1)"))
            .respond_with(graphql_errors(&[NOT_READY]))
            .up_to_n_times(failures_first)
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryNode(first: 1)"))
        .respond_with(graphql_data(json!({"queryNode": []})))
        .mount(server)
        .await;
}

fn seeded_hierarchy() -> serde_json::Value {
    json!({"queryHierarchy": [{
        "id": "0x10",
        "name": "Primary Knowledge Graph",
        "levels": [{"levelNumber": 1}, {"levelNumber": 2}, {"levelNumber": 3}]
    }]})
}

async fn mount_seeding(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryHierarchy { id name"))
        .respond_with(graphql_data(json!({"queryHierarchy": []})))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryHierarchy { id name"))
        .respond_with(graphql_data(seeded_hierarchy()))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("addHierarchy("))
        .and(body_string_contains("Primary Knowledge Graph"))
        .respond_with(graphql_data(json!({
            "addHierarchy": {"hierarchy": [{"id": "0x10", "name": "Primary Knowledge Graph"}]}
        })))
        .expect(1)
        .mount(server)
        .await;
}

// ─────────────────────────────────────────────────────────────────────────────
// Provisioning
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_tenant_pushes_verifies_and_seeds() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0xd43ef", 1).await;
    mount_trial_read(&server, 2).await;
    mount_seeding(&server).await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let namespace = tenancy.lifecycle().create_tenant("acme").await.unwrap();

    assert_eq!(namespace, "0xd43ef");
    assert_eq!(
        tenancy.lifecycle().known_tenants(),
        vec!["acme", "default", "test-tenant"]
    );
}

#[tokio::test]
async fn create_test_tenant_skips_seeding() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0x1", 1).await;
    mount_trial_read(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("Hierarchy"))
        .respond_with(graphql_data(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let namespace = tenancy.lifecycle().create_tenant("test-tenant").await.unwrap();
    assert_eq!(namespace, "0x1");
}

#[tokio::test]
async fn create_without_isolation_fails_hard_before_backend() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0xd43ef", 0).await;

    let tenancy = tenancy_with(&server, StaticDetector::oss());
    let err = tenancy.lifecycle().create_tenant("acme").await.unwrap_err();

    match err {
        TenancyError::EnterpriseFeatureUnavailable {
            operation,
            diagnostics,
            ..
        } => {
            assert_eq!(operation, "createTenant");
            assert_eq!(diagnostics, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(
        tenancy.lifecycle().known_tenants(),
        vec!["default", "test-tenant"]
    );
}

#[tokio::test]
async fn schema_that_never_becomes_queryable_aborts() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0xd43ef", 1).await;
    // One initial attempt plus the configured three retries.
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryNode(first: 1)"))
        .respond_with(graphql_errors(&[NOT_READY]))
        .expect(4)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("addHierarchy("))
        .respond_with(graphql_data(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let err = tenancy.lifecycle().create_tenant("acme").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::SchemaError);
}

#[tokio::test]
async fn transport_failure_during_verification_is_not_retried() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0xd43ef", 1).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryNode(first: 1)"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let err = tenancy.lifecycle().create_tenant("acme").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::SchemaError);
}

#[tokio::test]
async fn rejected_schema_push_surfaces_cause() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/schema"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"message": "resolving updateGQLSchema failed because input:1: Unexpected Name"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let err = tenancy.lifecycle().create_tenant("acme").await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::SchemaError);
    let source = std::error::Error::source(&err).map(ToString::to_string).unwrap_or_default();
    assert!(source.contains("Unexpected Name"), "{source}");
}

#[tokio::test]
async fn seed_that_cannot_be_read_back_fails() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0xd43ef", 1).await;
    mount_trial_read(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryHierarchy { id name"))
        .respond_with(graphql_data(json!({"queryHierarchy": []})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("addHierarchy("))
        .respond_with(graphql_data(json!({"addHierarchy": {"hierarchy": []}})))
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let err = tenancy.lifecycle().create_tenant("acme").await.unwrap_err();
    assert_eq!(err.category(), ErrorCategory::SeedError);
}

#[tokio::test]
async fn existing_hierarchies_are_not_seeded_twice() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0xd43ef", 1).await;
    mount_trial_read(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryHierarchy { id name"))
        .respond_with(graphql_data(seeded_hierarchy()))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("addHierarchy("))
        .respond_with(graphql_data(json!({})))
        .expect(0)
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    tenancy.lifecycle().create_tenant("acme").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_creates_of_one_tenant_both_succeed() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0x69031", 2).await;
    mount_trial_read(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryHierarchy { id name"))
        .respond_with(graphql_data(seeded_hierarchy()))
        .mount(&server)
        .await;

    let tenancy = Arc::new(tenancy_with(&server, StaticDetector::multi_tenant()));
    let a = {
        let tenancy = Arc::clone(&tenancy);
        tokio::spawn(async move { tenancy.lifecycle().create_tenant("tenant-a").await })
    };
    let b = {
        let tenancy = Arc::clone(&tenancy);
        tokio::spawn(async move { tenancy.lifecycle().create_tenant("tenant-a").await })
    };

    assert_eq!(a.await.unwrap().unwrap(), "0x69031");
    assert_eq!(b.await.unwrap().unwrap(), "0x69031");
}

// ─────────────────────────────────────────────────────────────────────────────
// Teardown
// ─────────────────────────────────────────────────────────────────────────────

async fn mount_list(server: &MockServer, entity: &str, ids: &[&str]) {
    let items: Vec<_> = ids.iter().map(|id| json!({"id": id})).collect();
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains(format!("query{entity} {{ id }}")))
        .respond_with(graphql_data(json!({ (format!("query{entity}")): items })))
        .mount(server)
        .await;
}

async fn mount_delete(server: &MockServer, entity: &str, num_uids: u64) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains(format!("delete{entity}(filter")))
        .respond_with(graphql_data(
            json!({ (format!("delete{entity}")): {"numUids": num_uids} }),
        ))
        .mount(server)
        .await;
}

fn delete_order(queries: &[String]) -> Vec<String> {
    queries
        .iter()
        .filter_map(|q| q.strip_prefix("mutation Delete"))
        .filter_map(|rest| rest.split('(').next())
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn delete_tenant_runs_steps_in_dependency_order() {
    let server = MockServer::start().await;
    mount_list(&server, "HierarchyAssignment", &["0x20"]).await;
    mount_list(&server, "HierarchyLevelType", &["0x21", "0x22"]).await;
    mount_list(&server, "HierarchyLevel", &["0x23"]).await;
    mount_list(&server, "Hierarchy", &["0x24"]).await;
    mount_list(&server, "Edge", &["0x25"]).await;
    mount_list(&server, "Node", &["n1", "n2", "n3"]).await;
    for entity in ["HierarchyAssignment", "HierarchyLevelType", "HierarchyLevel", "Hierarchy", "Edge"] {
        mount_delete(&server, entity, 1).await;
    }
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"filter": {"id": {"in": ["n1", "n2"]}}}})))
        .respond_with(graphql_data(json!({"deleteNode": {"numUids": 2}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_partial_json(json!({"variables": {"filter": {"id": {"in": ["n3"]}}}})))
        .respond_with(graphql_data(json!({"deleteNode": {"numUids": 1}})))
        .expect(1)
        .mount(&server)
        .await;

    let mut cfg = test_config(&server);
    cfg.lifecycle.delete_batch_size = 2;
    let tenancy = Tenancy::with_detector(
        cfg,
        StaticDetector::multi_tenant(),
        Arc::new(SystemClock),
    )
    .unwrap();

    let report = tenancy.lifecycle().delete_tenant("acme").await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.namespace, "0xd43ef");
    assert_eq!(report.total_deleted(), 8);

    let order = delete_order(&graphql_queries(&server).await.unwrap());
    assert_eq!(
        order,
        vec![
            "HierarchyAssignment",
            "HierarchyLevelType",
            "HierarchyLevel",
            "Hierarchy",
            "Edge",
            "Node",
            "Node"
        ]
    );
}

#[tokio::test]
async fn failed_step_does_not_stop_later_steps() {
    let server = MockServer::start().await;
    for entity in ["HierarchyAssignment", "HierarchyLevelType", "HierarchyLevel", "Hierarchy"] {
        mount_list(&server, entity, &[]).await;
    }
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryEdge { id }"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mount_list(&server, "Node", &["n1"]).await;
    mount_delete(&server, "Node", 1).await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    let report = tenancy.lifecycle().delete_tenant("acme").await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failed_steps(), vec!["Edge"]);
    let node = report.steps.last().unwrap();
    assert_eq!(node.entity, "Node");
    assert_eq!(node.deleted, 1);
}

#[tokio::test]
async fn reserved_tenants_are_never_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let detector = StaticDetector::multi_tenant();
    let tenancy = tenancy_with(&server, detector.clone());
    for id in ["default", "test-tenant"] {
        let err = tenancy.lifecycle().delete_tenant(id).await.unwrap_err();
        assert!(matches!(err, TenancyError::ReservedTenant { .. }), "{err}");
    }
    assert_eq!(detector.calls(), 0);
}

#[tokio::test]
async fn delete_without_isolation_fails_with_context() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::new(true, false));
    let err = tenancy.lifecycle().delete_tenant("acme").await.unwrap_err();

    match err {
        TenancyError::EnterpriseFeatureUnavailable { diagnostics, .. } => {
            let diagnostics = diagnostics.unwrap();
            assert!(diagnostics.contains("0xd43ef"), "{diagnostics}");
            assert!(diagnostics.contains("enterprise-single-tenant"), "{diagnostics}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn list_tenants_includes_reserved_and_provisioned() {
    let server = MockServer::start().await;
    mount_schema_push(&server, "0x57961", 1).await;
    mount_trial_read(&server, 0).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("queryHierarchy { id name"))
        .respond_with(graphql_data(seeded_hierarchy()))
        .mount(&server)
        .await;

    let tenancy = tenancy_with(&server, StaticDetector::multi_tenant());
    tenancy.lifecycle().create_tenant("tenant-b").await.unwrap();

    let tenants = tenancy.lifecycle().list_tenants().await;
    let ids: Vec<&str> = tenants.iter().map(|t| t.tenant_id.as_str()).collect();
    assert_eq!(ids, vec!["default", "tenant-b", "test-tenant"]);

    let reserved: Vec<bool> = tenants.iter().map(|t| t.is_reserved_tenant).collect();
    assert_eq!(reserved, vec![true, false, true]);
}
