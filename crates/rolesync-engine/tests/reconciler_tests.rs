//! Server reconciler tests.

mod common;

use std::sync::Arc;

use common::{reconciler, set, MockDirectory, MockProvisioner, MockRegistry};
use rolesync_core::error::ErrorKind;
use rolesync_core::types::{Group, Server};
use rolesync_engine::{GroupStatus, ReconcilerConfig, ServerStatus, SkipReason};

fn server1() -> Server {
    Server::new("server1", "localhost:8000")
}

#[tokio::test]
async fn test_add_and_remove_scenario() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &["bob", "carol"]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["alice", "bob"]));
    let provisioner = Arc::new(MockProvisioner::new());

    let report = reconciler(
        registry,
        directory,
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.status, ServerStatus::Completed);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].status, GroupStatus::Reconciled);

    let applied = provisioner.applied_for("group1").unwrap();
    assert_eq!(applied.to_add, set(&["alice"]));
    assert_eq!(applied.to_remove, set(&["carol"]));

    let outcome = report.groups[0].outcome.as_ref().unwrap();
    assert_eq!(outcome.granted, vec!["alice".to_string()]);
    assert_eq!(outcome.revoked, vec!["carol".to_string()]);
}

#[tokio::test]
async fn test_directory_failure_never_removes_members() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &["bob", "carol"])
            .with_group("server1", Group::new("group2"), &["dave"]),
    );
    let directory = Arc::new(
        MockDirectory::new()
            .with_failing_group("group1")
            .with_group("group2", &["dave", "erin"]),
    );
    let provisioner = Arc::new(MockProvisioner::new());

    let report = reconciler(
        registry,
        directory,
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    let group1 = &report.groups[0];
    assert_eq!(group1.status, GroupStatus::Skipped);
    assert_eq!(group1.skip_reason, Some(SkipReason::DirectoryUnavailable));
    assert_eq!(group1.error_kind, Some(ErrorKind::TransientFetch));
    assert!(provisioner.applied_for("group1").is_none());

    // The sibling group is unaffected.
    assert_eq!(report.groups[1].status, GroupStatus::Reconciled);
    assert_eq!(
        provisioner.applied_for("group2").unwrap().to_add,
        set(&["erin"])
    );
}

#[tokio::test]
async fn test_unprocessed_group_is_skipped() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group2").unprocessed(), &[]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group2", &["alice"]));
    let provisioner = Arc::new(MockProvisioner::new());

    let report = reconciler(
        registry,
        directory.clone(),
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.groups[0].status, GroupStatus::Skipped);
    assert_eq!(report.groups[0].skip_reason, Some(SkipReason::Unprocessed));
    assert!(provisioner.applied().is_empty());
    assert!(directory.calls().is_empty());
}

#[tokio::test]
async fn test_registry_failure_skips_only_that_group() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_failing_group("server1", "group1")
            .with_group("server1", Group::new("group2"), &[]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group2", &["alice"]));
    let provisioner = Arc::new(MockProvisioner::new());

    let report = reconciler(
        registry,
        directory,
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.groups[0].status, GroupStatus::Skipped);
    assert_eq!(
        report.groups[0].skip_reason,
        Some(SkipReason::RegistryUnavailable)
    );
    assert_eq!(report.groups[1].status, GroupStatus::Reconciled);
    assert_eq!(provisioner.applied().len(), 1);
}

#[tokio::test]
async fn test_failing_principal_is_isolated() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &[]),
    );
    let directory =
        Arc::new(MockDirectory::new().with_group("group1", &["alice", "mallory", "zoe"]));
    let provisioner = Arc::new(MockProvisioner::new().with_failing_principal("mallory"));

    let report = reconciler(
        registry,
        directory,
        provisioner,
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    let group = &report.groups[0];
    assert_eq!(group.status, GroupStatus::Partial);
    let outcome = group.outcome.as_ref().unwrap();
    assert_eq!(
        outcome.granted,
        vec!["alice".to_string(), "zoe".to_string()]
    );
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].principal, "mallory");
    assert_eq!(outcome.failures[0].kind, ErrorKind::Provisioning);
}

#[tokio::test]
async fn test_group_level_failure_does_not_block_other_groups() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &[])
            .with_group("server1", Group::new("group2"), &[]),
    );
    let directory = Arc::new(
        MockDirectory::new()
            .with_group("group1", &["alice"])
            .with_group("group2", &["bob"]),
    );
    let provisioner = Arc::new(MockProvisioner::new().with_failing_group("group1"));

    let report = reconciler(
        registry,
        directory,
        provisioner,
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.groups[0].status, GroupStatus::Failed);
    assert_eq!(report.groups[0].error_kind, Some(ErrorKind::Provisioning));
    assert_eq!(report.groups[0].delta.to_add, set(&["alice"]));
    assert_eq!(report.groups[1].status, GroupStatus::Reconciled);
}

#[tokio::test]
async fn test_invalid_server_is_skipped() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &[]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["alice"]));
    let provisioner = Arc::new(MockProvisioner::new().with_invalid_server("server1"));

    let report = reconciler(
        registry.clone(),
        directory,
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.status, ServerStatus::Skipped);
    assert_eq!(report.error_kind, Some(ErrorKind::Configuration));
    assert!(report.groups.is_empty());
    assert!(provisioner.applied().is_empty());
    assert_eq!(
        registry
            .fetch_group_calls
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[tokio::test]
async fn test_group_list_failure_fails_server() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_failing_group_list("server1"),
    );
    let report = reconciler(
        registry,
        Arc::new(MockDirectory::new()),
        Arc::new(MockProvisioner::new()),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.status, ServerStatus::Failed);
    assert_eq!(report.error_kind, Some(ErrorKind::TransientFetch));
}

#[tokio::test]
async fn test_dry_run_applies_nothing() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &["bob", "carol"]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["alice", "bob"]));
    let provisioner = Arc::new(MockProvisioner::new());

    let report = reconciler(
        registry,
        directory,
        provisioner.clone(),
        ReconcilerConfig {
            dry_run: true,
            ..Default::default()
        },
    )
    .reconcile(&server1())
    .await;

    let group = &report.groups[0];
    assert_eq!(group.status, GroupStatus::Planned);
    assert_eq!(group.delta.to_add, set(&["alice"]));
    assert_eq!(group.delta.to_remove, set(&["carol"]));
    assert!(group.outcome.is_none());
    assert!(provisioner.applied().is_empty());
}

#[tokio::test]
async fn test_in_sync_group() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &["alice", "bob"]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["bob", "alice"]));
    let provisioner = Arc::new(MockProvisioner::new());

    let report = reconciler(
        registry,
        directory,
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    assert_eq!(report.groups[0].status, GroupStatus::InSync);
    assert!(provisioner.applied_for("group1").unwrap().is_empty());
}

#[tokio::test]
async fn test_confirmed_empty_directory_group_removes_members() {
    let registry = Arc::new(
        MockRegistry::new()
            .with_server(server1())
            .with_group("server1", Group::new("group1"), &["bob", "carol"]),
    );
    let directory = Arc::new(MockDirectory::new().with_group("group1", &[]));
    let provisioner = Arc::new(MockProvisioner::new());

    reconciler(
        registry,
        directory,
        provisioner.clone(),
        ReconcilerConfig::default(),
    )
    .reconcile(&server1())
    .await;

    let applied = provisioner.applied_for("group1").unwrap();
    assert!(applied.to_add.is_empty());
    assert_eq!(applied.to_remove, set(&["bob", "carol"]));
}

#[tokio::test]
async fn test_reports_keep_registry_group_order() {
    let mut registry = MockRegistry::new().with_server(server1());
    let mut directory = MockDirectory::new();
    let names: Vec<String> = (0..9).map(|i| format!("group{i}")).collect();
    for name in &names {
        registry = registry.with_group("server1", Group::new(name.as_str()), &[]);
        directory = directory.with_group(name, &["alice"]);
    }

    let report = reconciler(
        Arc::new(registry),
        Arc::new(directory),
        Arc::new(MockProvisioner::new()),
        ReconcilerConfig {
            group_concurrency: 3,
            ..Default::default()
        },
    )
    .reconcile(&server1())
    .await;

    let reported: Vec<String> = report.groups.iter().map(|g| g.group.clone()).collect();
    assert_eq!(reported, names);
}
