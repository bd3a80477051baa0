use mims_tenancy::DeploymentMode;
use mims_tenancy::LicenseClass;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tenancy_test_support::graphql_data;
use tenancy_test_support::graphql_errors;
use tenancy_test_support::init_test_tracing;
use tenancy_test_support::mount_health;
use tenancy_test_support::mount_license;
use tenancy_test_support::probing_tenancy;
use tenancy_test_support::test_config;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

#[tokio::test]
async fn oss_backend_is_single_tenant() {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_health(&server, &[], "v24.0.0").await;
    mount_license(&server, json!({"user": "", "enabled": false})).await;

    let tenancy = probing_tenancy(&server);
    let snapshot = tenancy.get_capabilities().await;

    assert_eq!(snapshot.deployment_mode(), DeploymentMode::OssSingleTenant);
    assert_eq!(snapshot.license_class, LicenseClass::Unlicensed);
    assert_eq!(snapshot.backend_version, "v24.0.0");
    assert!(!tenancy.is_multi_tenant_supported().await);
}

#[tokio::test]
async fn enterprise_backend_with_isolation_is_multi_tenant() {
    let server = MockServer::start().await;
    mount_health(&server, &["multi_tenancy", "acl"], "v23.1.0").await;
    mount_license(&server, json!({"user": "", "enabled": true, "expiryTs": 1_900_000_000})).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(query_param("namespace", "0x1"))
        .respond_with(graphql_data(json!({"__typename": "Query"})))
        .expect(1)
        .mount(&server)
        .await;

    let tenancy = probing_tenancy(&server);
    let snapshot = tenancy.get_capabilities().await;

    assert_eq!(snapshot.deployment_mode(), DeploymentMode::EnterpriseMultiTenant);
    assert_eq!(snapshot.license_class, LicenseClass::Trial);
    assert_eq!(
        snapshot.license_expiry.map(|e| e.timestamp()),
        Some(1_900_000_000)
    );
    assert!(tenancy.is_multi_tenant_supported().await);
}

#[tokio::test]
async fn namespace_specific_rejection_confirms_isolation() {
    let server = MockServer::start().await;
    mount_health(&server, &["multi_tenancy"], "v23.1.0").await;
    mount_license(&server, json!({"user": "Acme", "enabled": true})).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(graphql_errors(&["Namespace 0x1 has no GraphQL schema"]))
        .mount(&server)
        .await;

    let snapshot = probing_tenancy(&server).get_capabilities().await;
    assert!(snapshot.namespace_isolation_confirmed);
    assert_eq!(snapshot.license_class, LicenseClass::Licensed);
}

#[tokio::test]
async fn failed_isolation_check_leaves_enterprise_single_tenant() {
    let server = MockServer::start().await;
    mount_health(&server, &["multi_tenancy"], "v23.1.0").await;
    mount_license(&server, json!({"user": "Acme", "enabled": true})).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let snapshot = probing_tenancy(&server).get_capabilities().await;
    assert!(snapshot.enterprise_detected);
    assert!(!snapshot.namespace_isolation_confirmed);
    assert_eq!(
        snapshot.deployment_mode(),
        DeploymentMode::EnterpriseSingleTenant
    );
}

#[tokio::test]
async fn unreachable_backend_yields_safe_snapshot() {
    let server = MockServer::start().await;
    let mut cfg = test_config(&server);
    cfg.backend.graphql_url = "http://127.0.0.1:9/graphql".to_string();
    cfg.backend.admin_url = "http://127.0.0.1:9".to_string();
    cfg.backend.coordinator_url = String::new();

    let tenancy = mims_tenancy::Tenancy::with_config(cfg).unwrap();
    let snapshot = tenancy.get_capabilities().await;

    assert!(!snapshot.enterprise_detected);
    assert!(!snapshot.namespace_isolation_confirmed);
    assert_eq!(snapshot.license_class, LicenseClass::Unknown);
    assert!(snapshot.probe_error.is_some());
}

#[tokio::test]
async fn missing_coordinator_means_unknown_license() {
    let server = MockServer::start().await;
    mount_health(&server, &[], "v24.0.0").await;
    Mock::given(method("GET"))
        .and(path("/state"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut cfg = test_config(&server);
    cfg.backend.coordinator_url = String::new();
    let tenancy = mims_tenancy::Tenancy::with_config(cfg).unwrap();

    let snapshot = tenancy.get_capabilities().await;
    assert_eq!(snapshot.license_class, LicenseClass::Unknown);
    assert_eq!(snapshot.probe_error, None);
}

#[tokio::test]
async fn snapshot_is_cached_until_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"version": "v24.0.0"}])))
        .expect(2)
        .mount(&server)
        .await;
    mount_license(&server, json!({"enabled": false})).await;

    let tenancy = probing_tenancy(&server);
    let first = tenancy.get_capabilities().await;
    let second = tenancy.get_capabilities().await;
    assert!(Arc::ptr_eq(&first, &second));

    let refreshed = tenancy.refresh_capabilities().await;
    assert!(!Arc::ptr_eq(&first, &refreshed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_probe() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"version": "v24.0.0"}]))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_license(&server, json!({"enabled": false})).await;

    let tenancy = Arc::new(probing_tenancy(&server));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tenancy = Arc::clone(&tenancy);
            tokio::spawn(async move { tenancy.get_capabilities().await })
        })
        .collect();

    let mut snapshots = Vec::new();
    for handle in handles {
        snapshots.push(handle.await.unwrap());
    }
    assert!(snapshots.iter().all(|s| Arc::ptr_eq(s, &snapshots[0])));
}

#[tokio::test]
async fn cancelled_probe_does_not_poison_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{
                    "instance": "alpha",
                    "version": "v23.1.0",
                    "ee_features": ["multi_tenancy"],
                }]))
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&server)
        .await;
    mount_license(&server, json!({"user": "Acme", "enabled": true})).await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(query_param("namespace", "0x1"))
        .respond_with(graphql_data(json!({"__typename": "Query"})))
        .mount(&server)
        .await;

    let mut cfg = test_config(&server);
    cfg.backend.request_timeout_ms = 400;
    let tenancy = Arc::new(mims_tenancy::Tenancy::with_config(cfg).unwrap());

    let abandoned = {
        let tenancy = Arc::clone(&tenancy);
        tokio::spawn(async move { tenancy.get_capabilities().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    abandoned.abort();
    assert!(abandoned.await.unwrap_err().is_cancelled());

    // Longer than the request timeout of the abandoned probe.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let snapshot = tenancy.get_capabilities().await;
    assert_eq!(snapshot.probe_error, None);
    assert_eq!(snapshot.deployment_mode(), DeploymentMode::EnterpriseMultiTenant);

    let cached = tenancy.get_capabilities().await;
    assert!(Arc::ptr_eq(&snapshot, &cached));
}
