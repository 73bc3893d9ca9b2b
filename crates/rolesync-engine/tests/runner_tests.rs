//! Fan-out runner tests.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{reconciler, MockDirectory, MockProvisioner, MockRegistry};
use rolesync_core::types::{Group, Server};
use rolesync_engine::{
    FanOutRunner, GroupStatus, ReconcilerConfig, RunExecutor, RunStatus, RunTrigger, RunnerConfig,
    ServerStatus,
};

fn runner(
    registry: Arc<MockRegistry>,
    directory: Arc<MockDirectory>,
    provisioner: Arc<MockProvisioner>,
    config: RunnerConfig,
) -> FanOutRunner {
    let reconciler = Arc::new(reconciler(
        registry.clone(),
        directory,
        provisioner,
        ReconcilerConfig::default(),
    ));
    FanOutRunner::new(registry, reconciler, config)
}

fn servers(registry: MockRegistry, count: usize) -> MockRegistry {
    (1..=count).fold(registry, |registry, i| {
        let name = format!("server{i}");
        registry
            .with_server(Server::new(name.as_str(), format!("db{i}.example.com")))
            .with_group(&name, Group::new("group1"), &[])
    })
}

#[tokio::test]
async fn test_run_reconciles_every_server() {
    let registry = Arc::new(servers(MockRegistry::new(), 3));
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["alice"]));
    let provisioner = Arc::new(MockProvisioner::new());

    let report = runner(
        registry,
        directory,
        provisioner.clone(),
        RunnerConfig::default(),
    )
    .run(RunTrigger::Manual)
    .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.trigger, RunTrigger::Manual);
    assert_eq!(report.servers.len(), 3);
    assert!(report.not_started.is_empty());
    assert_eq!(report.summary.servers_attempted, 3);
    assert_eq!(report.summary.groups_reconciled, 3);
    assert_eq!(report.summary.principals_added, 3);
    assert_eq!(provisioner.applied().len(), 3);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_batch_size() {
    let registry = Arc::new(
        servers(MockRegistry::new(), 12).with_list_groups_delay(Duration::from_millis(50)),
    );

    let report = runner(
        registry.clone(),
        Arc::new(MockDirectory::new()),
        Arc::new(MockProvisioner::new()),
        RunnerConfig {
            batch_size: 3,
            run_deadline: None,
        },
    )
    .run(RunTrigger::Interval)
    .await;

    assert_eq!(report.servers.len(), 12);
    let max = registry.max_in_flight.load(Ordering::SeqCst);
    assert!(max <= 3, "max in flight was {max}");
    assert!(max >= 1);
}

#[tokio::test]
async fn test_server_list_failure_fails_run() {
    let registry = Arc::new(servers(MockRegistry::new(), 2));
    registry.fail_server_list();
    let provisioner = Arc::new(MockProvisioner::new());

    let report = runner(
        registry,
        Arc::new(MockDirectory::new()),
        provisioner.clone(),
        RunnerConfig::default(),
    )
    .run(RunTrigger::Startup)
    .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert!(report.is_failed());
    assert!(report.error.is_some());
    assert!(report.servers.is_empty());
    assert!(provisioner.applied().is_empty());
}

#[tokio::test]
async fn test_failing_server_does_not_affect_siblings() {
    let registry = Arc::new(servers(MockRegistry::new(), 3).with_failing_group_list("server2"));
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["alice"]));
    let provisioner = Arc::new(MockProvisioner::new().with_invalid_server("server3"));

    let report = runner(
        registry,
        directory,
        provisioner.clone(),
        RunnerConfig::default(),
    )
    .run(RunTrigger::Manual)
    .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.servers.len(), 3);
    assert_eq!(report.servers[0].server, "server1");
    assert_eq!(report.servers[0].status, ServerStatus::Completed);
    assert_eq!(report.servers[0].count(GroupStatus::Reconciled), 1);
    assert_eq!(report.servers[1].status, ServerStatus::Failed);
    assert_eq!(report.servers[2].status, ServerStatus::Skipped);
    assert_eq!(report.summary.servers_failed, 1);
    assert_eq!(report.summary.servers_skipped, 1);

    let applied = provisioner.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].server, "server1");
}

#[tokio::test]
async fn test_deadline_leaves_servers_not_started() {
    let registry = Arc::new(
        servers(MockRegistry::new(), 3).with_list_groups_delay(Duration::from_millis(300)),
    );

    let report = runner(
        registry,
        Arc::new(MockDirectory::new()),
        Arc::new(MockProvisioner::new()),
        RunnerConfig {
            batch_size: 1,
            run_deadline: Some(Duration::from_millis(50)),
        },
    )
    .run(RunTrigger::Interval)
    .await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.servers.len(), 1);
    assert_eq!(report.servers[0].server, "server1");
    assert_eq!(
        report.not_started,
        vec!["server2".to_string(), "server3".to_string()]
    );
    assert_eq!(report.summary.servers_not_started, 2);
}

#[tokio::test]
async fn test_dry_run_flag_is_reported() {
    let registry = Arc::new(servers(MockRegistry::new(), 1));
    let directory = Arc::new(MockDirectory::new().with_group("group1", &["alice"]));
    let provisioner = Arc::new(MockProvisioner::new());
    let reconciler = Arc::new(reconciler(
        registry.clone(),
        directory,
        provisioner.clone(),
        ReconcilerConfig {
            dry_run: true,
            ..Default::default()
        },
    ));

    let report = FanOutRunner::new(registry, reconciler, RunnerConfig::default())
        .run(RunTrigger::Manual)
        .await;

    assert!(report.dry_run);
    assert_eq!(report.summary.groups_planned, 1);
    assert!(provisioner.applied().is_empty());
}
