//! End-to-end lifecycles against an in-memory Scaleway.

use std::sync::Arc;
use std::time::Duration;

use scaleway_provider::config::ProviderConfig;
use scaleway_provider::locality::Zone;
use scaleway_provider::sweeper::{SweepLocalities, TEST_PREFIX};
use scaleway_provider::testing::{
    assert_plan_changes_attribute, assert_plan_no_changes, assert_plan_replaces,
    assert_plan_updates_in_place, FakeScaleway, Method, ProviderTester,
};
use scaleway_provider::{ApiError, ErrorKind, ScalewayProvider};
use serde_json::{json, Value};

const IP: &str = "scaleway_instance_ip";
const SERVER: &str = "scaleway_instance_server";
const VOLUME: &str = "scaleway_block_volume";
const SECRET_VERSION: &str = "scaleway_secret_version";
const POLICY: &str = "scaleway_iam_policy_document";

fn config() -> ProviderConfig {
    ProviderConfig {
        secret_key: Some("11111111-1111-1111-1111-111111111111".to_string()),
        zone: Some(Zone::parse("fr-par-1").unwrap()),
        ..ProviderConfig::default()
    }
}

fn setup() -> (Arc<FakeScaleway>, ProviderTester<ScalewayProvider>) {
    let fake = Arc::new(FakeScaleway::new());
    let tester = ProviderTester::new(ScalewayProvider::with_api(fake.clone(), config()));
    (fake, tester)
}

fn bare(id: &Value) -> String {
    id.as_str().unwrap().rsplit('/').next().unwrap().to_string()
}

#[tokio::test(start_paused = true)]
async fn test_server_with_flexible_ip() {
    let (fake, tester) = setup();
    let ip_config = json!({"type": "nat"});
    let ip = tester.apply(IP, None, ip_config.clone()).await.unwrap();
    assert!(ip["id"].as_str().unwrap().starts_with("fr-par-1/"));

    let server_config = json!({
        "image": "ubuntu_focal",
        "type": "DEV1-S",
        "ip_id": ip["id"],
    });
    let server = tester.apply(SERVER, None, server_config.clone()).await.unwrap();
    assert_eq!(server["public_ip"], ip["address"]);
    assert_eq!(server["ip_id"], ip["id"]);
    assert_eq!(server["state"], "started");
    assert!(server["name"].as_str().unwrap().starts_with("tf-srv-"));

    let ip = tester.read(IP, ip).await.unwrap();
    assert_eq!(ip["server_id"], server["id"]);

    let actions: Vec<_> = fake
        .calls()
        .into_iter()
        .filter(|c| c.method == Method::Action)
        .map(|c| c.body.unwrap()["action"].clone())
        .collect();
    assert_eq!(actions, vec![json!("poweron")]);

    let plan = tester.refresh_plan(IP, ip, ip_config).await.unwrap();
    assert_plan_no_changes(&plan);
    let plan = tester
        .refresh_plan(SERVER, server, server_config)
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
}

#[tokio::test(start_paused = true)]
async fn test_read_is_idempotent() {
    let (fake, tester) = setup();
    let server = tester
        .apply(SERVER, None, json!({"image": "ubuntu_focal", "type": "DEV1-S"}))
        .await
        .unwrap();
    fake.clear_calls();

    let first = tester.read(SERVER, server.clone()).await.unwrap();
    let second = tester.read(SERVER, first.clone()).await.unwrap();
    assert_eq!(first, server);
    assert_eq!(second, first);
    assert_eq!(fake.count(Method::Get), 2);
    assert_eq!(fake.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ip_type_moves_in_place() {
    let (fake, tester) = setup();
    let ip = tester.apply(IP, None, json!({"type": "nat"})).await.unwrap();
    fake.clear_calls();

    let routed = json!({"type": "routed_ipv4"});
    let plan = tester.plan_update(IP, ip.clone(), routed.clone()).await.unwrap();
    assert_plan_updates_in_place(&plan);
    assert_plan_changes_attribute(&plan, "type");

    let moved = tester.apply(IP, Some(ip.clone()), routed.clone()).await.unwrap();
    assert_eq!(moved["id"], ip["id"]);
    assert_eq!(moved["type"], "routed_ipv4");
    assert_eq!(fake.count(Method::Update), 1);
    assert_eq!(fake.count(Method::Create), 0);
    assert_eq!(fake.count(Method::Delete), 0);

    let imported = tester
        .import_resource(IP, moved["id"].as_str().unwrap())
        .await
        .unwrap();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].resource_type, IP);
    assert_eq!(imported[0].state, moved);
    let plan = tester
        .plan_update(IP, imported[0].state.clone(), routed)
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
}

#[tokio::test(start_paused = true)]
async fn test_ip_type_cannot_move_back() {
    let (_, tester) = setup();
    let ip = tester.apply(IP, None, json!({"type": "routed_ipv4"})).await.unwrap();
    let err = tester
        .plan_update(IP, ip, json!({"type": "nat"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("\"routed_ipv4\" to \"nat\""));
}

#[tokio::test(start_paused = true)]
async fn test_volume_grows_but_never_shrinks() {
    let (fake, tester) = setup();
    let volume = tester
        .apply(VOLUME, None, json!({"size_in_gb": 20}))
        .await
        .unwrap();
    assert_eq!(volume["size_in_gb"], 20);
    assert_eq!(volume["iops"], 5000);
    let create = fake
        .calls()
        .into_iter()
        .find(|c| c.method == Method::Create)
        .unwrap();
    assert_eq!(create.body.unwrap()["size"], json!(20_000_000_000u64));

    let grown = tester
        .lifecycle_update(VOLUME, volume.clone(), json!({"size_in_gb": 30}))
        .await
        .unwrap();
    assert_eq!(grown["id"], volume["id"]);
    assert_eq!(grown["size_in_gb"], 30);
    assert_eq!(
        fake.object("volumes", &bare(&volume["id"])).unwrap()["size"],
        json!(30_000_000_000u64)
    );

    fake.clear_calls();
    let err = tester
        .apply(VOLUME, Some(grown), json!({"size_in_gb": 10}))
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("block volumes cannot be resized down"));
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_volume_size_given_as_float() {
    let (fake, tester) = setup();
    let volume = tester
        .apply(VOLUME, None, json!({"size_in_gb": 20.0}))
        .await
        .unwrap();
    assert_eq!(volume["size_in_gb"], 20);
    let create = fake
        .calls()
        .into_iter()
        .find(|c| c.method == Method::Create)
        .unwrap();
    assert_eq!(create.body.unwrap()["size"], json!(20_000_000_000u64));

    let plan = tester
        .refresh_plan(VOLUME, volume, json!({"size_in_gb": 20.0}))
        .await
        .unwrap();
    assert_plan_no_changes(&plan);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_volume_is_rejected_before_any_call() {
    let (fake, tester) = setup();
    let err = tester
        .apply(VOLUME, None, json!({"size_in_gb": 20_000_000_000u64}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_server_type_change_powers_off_first() {
    let (fake, tester) = setup();
    let server = tester
        .apply(SERVER, None, json!({"image": "ubuntu_focal", "type": "DEV1-S"}))
        .await
        .unwrap();
    fake.clear_calls();

    let resized = tester
        .apply(
            SERVER,
            Some(server.clone()),
            json!({"image": "ubuntu_focal", "type": "DEV1-M"}),
        )
        .await
        .unwrap();
    assert_eq!(resized["id"], server["id"]);
    assert_eq!(resized["type"], "DEV1-M");
    assert_eq!(resized["state"], "started");

    let mutations: Vec<_> = fake
        .calls()
        .into_iter()
        .filter(|c| matches!(c.method, Method::Action | Method::Update))
        .map(|c| c.body.unwrap())
        .collect();
    assert_eq!(
        mutations,
        vec![
            json!({"action": "poweroff"}),
            json!({"commercial_type": "DEV1-M"}),
            json!({"action": "poweron"}),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_sid_across_source_documents() {
    let (fake, tester) = setup();
    let err = tester
        .read_data_source(
            POLICY,
            json!({
                "source_policy_documents": [
                    r#"{"Statement": [{"Sid": "conflictSid", "Effect": "Allow"}]}"#,
                    r#"{"Statement": [{"Sid": "conflictSid", "Effect": "Deny"}]}"#,
                ],
            }),
        )
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("duplicate Sid (conflictSid) in source_policy_documents"));
    assert!(fake.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deleting_a_vanished_resource() {
    let (fake, tester) = setup();
    let state = json!({
        "id": "fr-par-1/22222222-2222-2222-2222-222222222222",
        "zone": "fr-par-1",
        "type": "nat",
    });
    tester.delete(IP, state).await.unwrap();

    let calls = fake.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].method, Method::Delete);
    assert_eq!(
        calls[0].path,
        "/instance/v1/zones/fr-par-1/ips/22222222-2222-2222-2222-222222222222"
    );
}

#[tokio::test(start_paused = true)]
async fn test_released_ip_reads_as_null() {
    let (fake, tester) = setup();
    let ip = tester.apply(IP, None, json!({"type": "nat"})).await.unwrap();
    fake.fail_next(Method::Get, "ips", ApiError::forbidden("ip is not yours anymore"));
    assert!(tester.read(IP, ip.clone()).await.unwrap().is_null());

    fake.fail_next(Method::Get, "servers", ApiError::forbidden("denied"));
    let err = tester
        .read(
            SERVER,
            json!({"id": "fr-par-1/33333333-3333-3333-3333-333333333333"}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Permission);
}

#[tokio::test(start_paused = true)]
async fn test_vanished_resource_reads_as_null() {
    let (fake, tester) = setup();
    let ip = tester.apply(IP, None, json!({"type": "nat"})).await.unwrap();
    fake.forget("ips", &bare(&ip["id"]));

    assert!(tester.read(IP, ip.clone()).await.unwrap().is_null());
    let plan = tester
        .refresh_plan(IP, ip, json!({"type": "nat"}))
        .await
        .unwrap();
    assert!(!plan.is_empty());
    assert!(!plan.requires_replace);
}

#[tokio::test(start_paused = true)]
async fn test_zone_change_replaces() {
    let (fake, tester) = setup();
    let ip = tester.apply(IP, None, json!({"type": "nat"})).await.unwrap();
    fake.clear_calls();

    let moved_config = json!({"type": "nat", "zone": "fr-par-2"});
    let plan = tester
        .plan_update(IP, ip.clone(), moved_config.clone())
        .await
        .unwrap();
    assert_plan_replaces(&plan);

    let moved = tester.apply(IP, Some(ip.clone()), moved_config).await.unwrap();
    assert_ne!(moved["id"], ip["id"]);
    assert!(moved["id"].as_str().unwrap().starts_with("fr-par-2/"));
    assert_eq!(moved["zone"], "fr-par-2");
    assert_eq!(fake.count(Method::Delete), 1);
    assert_eq!(fake.count(Method::Create), 1);
    assert_eq!(fake.count(Method::Update), 0);
    assert_eq!(fake.objects("ips").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_updates_of_one_volume_serialize() {
    let (fake, tester) = setup();
    let volume = tester
        .apply(VOLUME, None, json!({"size_in_gb": 20}))
        .await
        .unwrap();
    fake.with_latency(Duration::from_millis(200));

    let tester = &tester;
    let grow = move |size: u64| {
        let volume = volume.clone();
        async move {
            let plan = tester
                .plan_update(VOLUME, volume.clone(), json!({"size_in_gb": size}))
                .await?;
            tester.update(VOLUME, volume, plan.planned_state).await
        }
    };
    let (first, second) = tokio::join!(grow(30), grow(40));
    first.unwrap();
    second.unwrap();

    assert_eq!(fake.count(Method::Update), 2);
    assert_eq!(fake.max_concurrent_mutations(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_removes_only_test_resources() {
    let (fake, tester) = setup();
    let zone = "fr-par-1";
    fake.seed("servers", zone, json!({"name": "tf_tests_web", "state": "stopped"}));
    fake.seed("servers", zone, json!({"name": "web", "state": "running"}));
    fake.seed("volumes", zone, json!({"name": "tf_tests_data"}));
    fake.seed("volumes", zone, json!({"name": "tf_tests_logs"}));
    fake.seed("volumes", zone, json!({"name": "data"}));

    let summary = tester
        .provider()
        .sweep(&SweepLocalities::from_config(&config()), TEST_PREFIX)
        .await
        .unwrap();
    assert_eq!(summary.deleted.len(), 3);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.deleted[0].0, SERVER);

    let names = |collection: &str| -> Vec<Value> {
        fake.objects(collection)
            .into_iter()
            .map(|o| o["name"].clone())
            .collect()
    };
    assert_eq!(names("servers"), vec![json!("web")]);
    assert_eq!(names("volumes"), vec![json!("data")]);
}

#[tokio::test(start_paused = true)]
async fn test_incomplete_sweep_keeps_what_was_deleted() {
    let (fake, tester) = setup();
    fake.seed("volumes", "fr-par-1", json!({"name": "tf_tests_data"}));
    fake.seed("ssh-keys", "global", json!({"name": "tf_tests_key"}));
    fake.fail_next(Method::Delete, "volumes", ApiError::forbidden("volume is locked"));

    let err = tester
        .provider()
        .sweep(&SweepLocalities::from_config(&config()), TEST_PREFIX)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Api);
    assert!(err.to_string().contains("volume is locked"));

    let summary = err.sweep_summary().unwrap();
    assert_eq!(summary.deleted.len(), 1);
    assert_eq!(summary.deleted[0].0, "scaleway_iam_ssh_key");
    assert!(fake.objects("ssh-keys").is_empty());
    assert_eq!(fake.objects("volumes").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_secret_versions_are_numbered_per_secret() {
    let (fake, tester) = setup();
    fake.with_sequential_ids("versions", "revision");
    let secret = "fr-par/44444444-4444-4444-4444-444444444444";
    let config = json!({"secret_id": secret, "data": "aGVsbG8="});

    let first = tester
        .lifecycle_create(SECRET_VERSION, config.clone())
        .await
        .unwrap();
    let second = tester
        .lifecycle_create(SECRET_VERSION, config)
        .await
        .unwrap();
    assert_eq!(first["id"], format!("{}/1", secret));
    assert_eq!(second["id"], format!("{}/2", secret));
    assert_eq!(second["revision"], 2);
    assert_eq!(second["secret_id"], secret);
    assert_eq!(second["region"], "fr-par");

    tester.lifecycle_delete(SECRET_VERSION, first.clone()).await.unwrap();
    assert!(tester.read(SECRET_VERSION, first).await.unwrap().is_null());
    assert_eq!(fake.objects("versions").len(), 1);

    let upgraded = tester
        .upgrade_resource_state(
            SECRET_VERSION,
            0,
            json!({"id": second["id"], "secret_id": "44444444-4444-4444-4444-444444444444"}),
        )
        .await
        .unwrap();
    assert_eq!(upgraded["secret_id"], secret);
}

#[test]
fn test_every_kind_is_served() {
    let (_, tester) = setup();
    let kinds = tester.resource_types();
    for kind in [IP, SERVER, VOLUME, SECRET_VERSION, "scaleway_instance_private_nic"] {
        assert!(kinds.iter().any(|k| k == kind), "{} is not served", kind);
    }
    assert_eq!(kinds.len(), 12);
}
