use ferry_core::{
    AttemptError, CopyRequest, CoreError, Engine, Overrides, BASE_IMAGE_KEY, VOLATILE_PREFIX,
};
use ferry_remote::mock::{MockCluster, MockEndpoint};
use ferry_remote::{ContainerInfo, ReplicableState};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn web() -> ContainerInfo {
    let mut config = BTreeMap::new();
    config.insert("limits.cpu".to_owned(), "2".to_owned());
    config.insert(BASE_IMAGE_KEY.to_owned(), "sha256-0a1b2c".to_owned());
    config.insert("volatile.eth0.hwaddr".to_owned(), "00:16:3e:12:34:56".to_owned());
    config.insert("volatile.idmap.next".to_owned(), "[]".to_owned());
    let mut eth0 = BTreeMap::new();
    eth0.insert("type".to_owned(), "nic".to_owned());
    eth0.insert("nictype".to_owned(), "bridged".to_owned());
    let mut devices = BTreeMap::new();
    devices.insert("eth0".to_owned(), eth0);
    ContainerInfo {
        state: ReplicableState {
            architecture: "x86_64".to_owned(),
            devices,
            config,
            profiles: vec!["default".to_owned(), "gpu".to_owned()],
        },
        ephemeral: false,
    }
}

struct Fixture {
    src: Arc<MockEndpoint>,
    dst: Arc<MockEndpoint>,
    engine: Engine,
}

fn fixture(src: MockEndpoint, dst: MockEndpoint) -> Fixture {
    let src = Arc::new(src);
    let dst = Arc::new(dst);
    let engine = Engine::new(
        MockCluster::new("src")
            .with_endpoint(&src)
            .with_endpoint(&dst),
    );
    Fixture { src, dst, engine }
}

fn source() -> MockEndpoint {
    MockEndpoint::new("src")
        .with_container("web", web())
        .with_container("web/snap0", web())
        .with_addresses(&["10.0.0.1:8443", "172.17.0.1:8443", "192.168.1.5:8443"])
}

fn destination() -> MockEndpoint {
    MockEndpoint::new("dst").with_profiles(&["default", "gpu"])
}

#[test]
fn same_name_fails_before_any_network_call() {
    let f = fixture(source(), destination());
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("src:web"))
        .unwrap_err();
    assert!(matches!(err, CoreError::SameName(_)));
    assert_eq!(err.to_string(), "can't copy to the same container name: web");
    assert!(f.src.calls().is_empty());
    assert!(f.dst.calls().is_empty());
}

#[test]
fn profile_mismatch_negotiates_no_session() {
    let f = fixture(source(), MockEndpoint::new("dst").with_profiles(&["default"]));
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap_err();
    match err {
        CoreError::ProfileMismatch { missing } => assert_eq!(missing, vec!["gpu"]),
        other => panic!("expected ProfileMismatch, got {other:?}"),
    }
    assert_eq!(f.src.call_count("migration_source"), 0);
    assert_eq!(f.dst.call_count("migrate_from"), 0);
}

#[test]
fn overrides_profiles_are_checked_too() {
    let f = fixture(source(), destination());
    let request = CopyRequest::new("src:web")
        .with_destination("dst:web")
        .with_overrides(Overrides::default().with_profile("big-disk"));
    assert!(matches!(
        f.engine.copy(&request),
        Err(CoreError::ProfileMismatch { .. })
    ));
}

#[test]
fn volatile_keys_are_stripped_but_base_image_forwarded() {
    let f = fixture(source(), destination());
    f.engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap();

    let request = &f.dst.migration_requests()[0];
    assert!(request
        .state
        .config
        .keys()
        .all(|k| !k.starts_with(VOLATILE_PREFIX)));
    assert_eq!(request.state.config["limits.cpu"], "2");
    assert_eq!(request.state.devices["eth0"]["nictype"], "bridged");
    assert_eq!(request.base_image.as_deref(), Some("sha256-0a1b2c"));
}

#[test]
fn keep_volatile_forwards_volatile_keys() {
    let f = fixture(source(), destination());
    let request = CopyRequest {
        keep_volatile: true,
        ..CopyRequest::new("src:web").with_destination("dst:web")
    };
    f.engine.copy(&request).unwrap();

    let sent = &f.dst.migration_requests()[0];
    assert_eq!(sent.state.config["volatile.eth0.hwaddr"], "00:16:3e:12:34:56");
    assert_eq!(sent.base_image.as_deref(), Some("sha256-0a1b2c"));
}

#[test]
fn refused_addresses_fall_through_to_last() {
    let f = fixture(
        source(),
        destination()
            .refuse_address("10.0.0.1:8443")
            .refuse_address("172.17.0.1:8443"),
    );
    let result = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap();

    assert_eq!(result.name, "web");
    assert_eq!(result.address.as_deref(), Some("192.168.1.5:8443"));
    assert_eq!(f.dst.call_count("migrate_from 10.0.0.1:8443"), 1);
    assert_eq!(f.dst.call_count("migrate_from 172.17.0.1:8443"), 1);
    assert_eq!(f.dst.call_count("migrate_from 192.168.1.5:8443"), 1);
    // Waiters only run for the accepted attempt.
    assert_eq!(f.src.call_count("wait"), 1);
    assert_eq!(f.src.call_count("migration_source"), 1);
    assert!(f.dst.has_container("web"));

    let secrets: Vec<_> = f
        .dst
        .migration_requests()
        .into_iter()
        .map(|r| r.secrets)
        .collect();
    assert!(secrets.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn source_failure_is_fatal() {
    let f = fixture(
        source().fail_migration_source("criu: dump failed"),
        destination(),
    );
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap_err();

    match &err {
        CoreError::SourceMigration(reason) => assert_eq!(reason, "criu: dump failed"),
        other => panic!("expected SourceMigration, got {other:?}"),
    }
    assert_eq!(
        err.to_string(),
        "migration failed on source host: criu: dump failed"
    );
    assert_eq!(f.dst.call_count("migrate_from"), 1);
}

#[test]
fn destination_failure_then_source_error_is_attributed_to_source() {
    let f = fixture(
        source().fail_migration_source("source went away"),
        destination()
            .refuse_address("10.0.0.1:8443")
            .refuse_address("172.17.0.1:8443")
            .refuse_address("192.168.1.5:8443"),
    );
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap_err();

    assert!(matches!(&err, CoreError::SourceMigration(reason) if reason == "source went away"));
    assert_eq!(f.dst.call_count("migrate_from"), 3);
    assert_eq!(f.src.call_count("operation"), 1);
}

#[test]
fn exhaustion_without_source_error_reports_last_destination_error() {
    let f = fixture(
        source(),
        destination()
            .refuse_address("10.0.0.1:8443")
            .refuse_address("172.17.0.1:8443")
            .fail_transfer_from("192.168.1.5:8443", "no space left on device"),
    );
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap_err();

    match &err {
        CoreError::DestinationMigration(AttemptError::DestinationOperation { address, .. }) => {
            assert_eq!(address, "192.168.1.5:8443");
        }
        other => panic!("expected DestinationMigration, got {other:?}"),
    }
    assert!(err.to_string().contains("no space left on device"));
    assert!(!f.dst.has_container("web"));
}

#[test]
fn all_refused_reports_last_handshake_error() {
    let f = fixture(
        source(),
        destination()
            .refuse_address("10.0.0.1:8443")
            .refuse_address("172.17.0.1:8443")
            .refuse_address("192.168.1.5:8443"),
    );
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap_err();

    match &err {
        CoreError::DestinationMigration(AttemptError::Handshake { address, .. }) => {
            assert_eq!(address, "192.168.1.5:8443");
        }
        other => panic!("expected a handshake DestinationMigration, got {other:?}"),
    }
    assert!(err.to_string().starts_with("migration failed on target host:"));
    assert_eq!(f.dst.call_count("migrate_from"), 3);
    // No attempt was accepted, so nothing was awaited; the source was only polled.
    assert_eq!(f.src.call_count("wait"), 0);
    assert_eq!(f.src.call_count("operation"), 1);
}

#[test]
fn destination_failure_outranks_source_failure_in_one_attempt() {
    let f = fixture(
        source().fail_migration_source("criu: dump failed"),
        destination().fail_transfer_from("10.0.0.1:8443", "connection reset"),
    );
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap_err();

    // The first attempt failed on both sides and was retried; the second
    // succeeded on the destination, so the source failure is final.
    assert!(matches!(&err, CoreError::SourceMigration(reason) if reason == "criu: dump failed"));
    assert_eq!(f.dst.call_count("migrate_from 10.0.0.1:8443"), 1);
    assert_eq!(f.dst.call_count("migrate_from 172.17.0.1:8443"), 1);
    assert_eq!(f.dst.call_count("migrate_from"), 2);
    assert_eq!(f.src.call_count("wait"), 2);
}

#[test]
fn snapshot_to_bare_source_remote_is_same_name() {
    let f = fixture(source(), destination());
    let err = f
        .engine
        .copy(&CopyRequest::new("src:web/snap0").with_destination("src:"))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "can't copy to the same container name: web/snap0"
    );
    assert!(f.src.calls().is_empty());
    assert!(f.dst.calls().is_empty());
}

#[test]
fn waiters_are_joined_not_raced() {
    let f = fixture(
        source().with_wait_delay(Duration::from_millis(150)),
        destination().fail_transfer_from("10.0.0.1:8443", "early failure"),
    );
    let started = Instant::now();
    let result = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:web"))
        .unwrap();

    // Both attempts waited for the slow source before deciding.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(result.address.as_deref(), Some("172.17.0.1:8443"));
    assert_eq!(f.src.call_count("wait"), 2);
}

#[test]
fn bare_remote_destination_keeps_source_name() {
    let f = fixture(source(), destination());
    let result = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("dst:"))
        .unwrap();
    assert_eq!(result.name, "web");
    assert!(!result.name_generated);

    let request = &f.dst.migration_requests()[0];
    assert_eq!(request.name.as_deref(), Some("web"));
}

#[test]
fn missing_resources_after_local_copy() {
    let f = fixture(source().without_resources(), destination());
    let err = f.engine.copy(&CopyRequest::new("src:web")).unwrap_err();
    assert!(matches!(err, CoreError::MissingResource));
}

#[test]
fn local_copy_round_trip() {
    let f = fixture(source(), destination());
    let request = CopyRequest::new("src:web")
        .with_overrides(
            Overrides::default()
                .with_profile("gpu")
                .with_config("limits.cpu", "4")
                .with_config("user.owner", "ops"),
        )
        .with_ephemeral(true);
    let result = f.engine.copy(&request).unwrap();

    assert!(result.name_generated);
    assert_eq!(result.remote, "src");
    assert!(result.address.is_none());
    assert!(f.dst.calls().is_empty());

    let copied = f.src.stored(&result.name).unwrap();
    assert!(copied.ephemeral);
    assert_eq!(copied.state.config["limits.cpu"], "4");
    assert_eq!(copied.state.config["user.owner"], "ops");
    assert!(!copied.state.config.contains_key("volatile.eth0.hwaddr"));
    assert_eq!(copied.state.profiles, vec!["default", "gpu", "gpu"]);
    assert!(f.src.has_container(&format!("{}/snap0", result.name)));
    assert_eq!(f.src.call_count("profiles"), 0);
}

#[test]
fn container_only_skips_snapshots() {
    let f = fixture(source(), destination());
    let result = f
        .engine
        .copy(&CopyRequest::new("src:web").with_destination("web2").container_only())
        .unwrap();
    assert_eq!(result.name, "web2");
    assert_eq!(result.remote, "src");
    assert!(!result.name_generated);
    assert!(f.src.has_container("web2"));
    assert!(!f.src.has_container("web2/snap0"));
    assert!(f.src.local_copy_requests()[0].container_only);
}

#[test]
fn ephemeral_follows_source_unless_pinned() {
    let src = MockEndpoint::new("src")
        .with_container(
            "tmp",
            ContainerInfo {
                ephemeral: true,
                ..web()
            },
        )
        .with_addresses(&["10.0.0.1:8443"]);
    let f = fixture(src, destination());

    f.engine
        .copy(&CopyRequest::new("src:tmp").with_destination("dst:a"))
        .unwrap();
    f.engine
        .copy(
            &CopyRequest::new("src:tmp")
                .with_destination("dst:b")
                .with_ephemeral(false),
        )
        .unwrap();

    let requests = f.dst.migration_requests();
    assert!(requests[0].ephemeral);
    assert!(!requests[1].ephemeral);
}

#[test]
fn snapshot_copy_uses_snapshot_lookup() {
    let f = fixture(source(), destination());
    f.engine
        .copy(&CopyRequest::new("src:web/snap0").with_destination("dst:restored"))
        .unwrap();
    assert_eq!(f.src.call_count("snapshot web/snap0"), 1);
    assert_eq!(f.src.call_count("migration_source web/snap0"), 1);
    assert!(f.dst.has_container("restored"));
}

#[test]
fn missing_source_is_not_found() {
    let f = fixture(source(), destination());
    let err = f
        .engine
        .copy(&CopyRequest::new("src:ghost").with_destination("dst:"))
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
    assert_eq!(f.dst.call_count("profiles"), 0);
}

#[test]
fn move_within_remote_renames() {
    let f = fixture(source(), destination());
    let result = f.engine.relocate("src:web", "src:api").unwrap();
    assert_eq!(result.name, "api");
    assert!(f.src.has_container("api"));
    assert!(f.src.has_container("api/snap0"));
    assert!(!f.src.has_container("web"));
}

#[test]
fn move_across_remotes_migrates_then_deletes() {
    let f = fixture(source(), destination());
    let result = f.engine.relocate("src:web", "dst:").unwrap();
    assert_eq!(result.remote, "dst");
    assert!(f.dst.has_container("web"));
    assert!(!f.src.has_container("web"));

    let request = &f.dst.migration_requests()[0];
    assert!(request.live);
    assert!(request.state.config.contains_key("volatile.eth0.hwaddr"));
    assert_eq!(f.src.call_count("delete web"), 1);
}

#[test]
fn failed_move_keeps_source() {
    let f = fixture(
        source().fail_migration_source("criu: restore failed"),
        destination(),
    );
    assert!(f.engine.relocate("src:web", "dst:").is_err());
    assert!(f.src.has_container("web"));
    assert_eq!(f.src.call_count("delete"), 0);
}

#[test]
fn move_rejects_snapshots_and_same_name() {
    let f = fixture(source(), destination());
    assert!(matches!(
        f.engine.relocate("src:web/snap0", "dst:"),
        Err(CoreError::Argument(_))
    ));
    assert!(matches!(
        f.engine.relocate("src:web", "src:web"),
        Err(CoreError::SameName(_))
    ));
    assert!(f.src.calls().is_empty());
}
