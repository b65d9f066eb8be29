// ABOUTME: End-to-end pipeline runs against temp directories and real shell commands.
// ABOUTME: Covers success, build fallback, rollback paths, and concurrent runs.

mod support;

use rollout::deploy::{
    DeployErrorKind, DeployLock, Deployment, ProbeTarget, RunOptions, RunStatus, StageName,
    StageOutcome, audit,
};
use rollout::diagnostics::Diagnostics;
use rollout::error::{EXIT_FAILED, EXIT_ROLLED_BACK};
use rollout::supervisor::SupervisorState;
use rollout::types::TargetName;
use std::sync::Arc;
use std::time::Duration;
use support::{FakeSupervisor, Fixture, sh};

/// Test: A full run places artifacts, activates the proxy, restarts, and records the run.
#[tokio::test]
async fn successful_run_places_and_records() {
    support::init_tracing();
    let fx = Fixture::new();
    fx.deploy_existing("v1");

    let mut target = fx.target();
    target.service = Some(fx.service());
    let supervisor = FakeSupervisor::new();
    let orchestrator = fx.orchestrator(supervisor.clone(), fx.proxy("true"));

    let mut diag = Diagnostics::default();
    let report = orchestrator
        .run(Arc::new(target), RunOptions::default(), &mut diag)
        .await;

    assert!(report.error.is_none(), "unexpected error: {:?}", report.error);
    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.run.stages.len(), StageName::ALL.len());
    assert_eq!(fx.live_index().as_deref(), Some("v2\n"));

    let conf = fx.active_proxy_config().expect("proxy config written");
    assert!(conf.contains("server_name example.test;"));
    assert!(conf.contains(&fx.deploy_path.display().to_string()));
    assert_eq!(fx.reloads(), 1);

    assert_eq!(supervisor.calls(), vec!["stop web", "start web production"]);

    let backup = report.run.backup.as_ref().expect("backup taken");
    assert_eq!(
        std::fs::read_to_string(backup.location.join("index.html")).unwrap(),
        "v1"
    );

    let recorded = audit::latest(&fx.state_dir, &report.run.target)
        .unwrap()
        .expect("run recorded");
    assert_eq!(recorded.status, RunStatus::Succeeded);
    assert!(report.audit_path.unwrap().exists());
}

/// Test: The backup stage hands its handle on to later stages.
#[tokio::test]
async fn backup_stage_exposes_handle() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");

    let deployment = Deployment::new(Arc::new(fx.target()));
    assert!(deployment.backup_handle().is_none());

    let backed_up = deployment.backup(&fx.backup_root, false).await.unwrap();
    let handle = backed_up.backup_handle().expect("backup taken");
    assert_eq!(
        std::fs::read_to_string(handle.location.join("index.html")).unwrap(),
        "v1"
    );
    assert_eq!(backed_up.run().backup.as_ref(), Some(handle));
}

/// Test: A variant that exits 0 without artifacts does not count; the next one is used.
#[tokio::test]
async fn build_falls_back_to_next_variant() {
    let fx = Fixture::new();
    let mut target = fx.target();
    target.build = vec![
        sh("exit 3"),
        sh("echo 'nothing to see'"),
        sh("mkdir -p dist && echo v2 > dist/index.html"),
    ];
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Succeeded);
    let build = report.run.stage(StageName::Build).unwrap();
    assert_eq!(build.outcome, StageOutcome::Success);
    assert_eq!(build.attempt, Some(3));
}

/// Test: Stale output from an earlier build does not satisfy a later variant.
#[tokio::test]
async fn stale_artifacts_are_cleared_before_each_variant() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.source.join("dist")).unwrap();
    std::fs::write(fx.source.join("dist").join("old.js"), "stale").unwrap();

    let mut target = fx.target();
    target.build = vec![sh("true")];
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Build)
    );
}

/// Test: When every build variant fails the deploy path is untouched and nothing rolls back.
#[tokio::test]
async fn failed_build_leaves_deploy_path_untouched() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");

    let mut target = fx.target();
    target.build = vec![sh("echo broken >&2; exit 1"), sh("exit 2")];
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(report.exit_code(), EXIT_FAILED);
    assert!(report.run.rollback.is_none());
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
    assert!(fx.active_proxy_config().is_none());

    let build = report.run.stage(StageName::Build).unwrap();
    assert_eq!(build.outcome, StageOutcome::Failed);
    assert!(build.message.contains("broken"));
    assert!(report.run.stage(StageName::PlaceArtifacts).is_none());
}

/// Test: A failing health check restores files, proxy config, and service from the backup.
#[tokio::test]
async fn failed_health_check_rolls_back() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    std::fs::create_dir_all(&fx.conf_dir).unwrap();
    std::fs::write(fx.conf_dir.join("web.conf"), "old config").unwrap();

    let mut target = fx.target();
    target.service = Some(fx.service());
    target.health.probe = ProbeTarget::File(fx.deploy_path.join("healthz"));
    target.health.retries = 2;
    let supervisor = FakeSupervisor::new();
    let orchestrator = fx.orchestrator(supervisor.clone(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::RolledBack);
    assert_eq!(report.exit_code(), EXIT_ROLLED_BACK);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::HealthCheck)
    );
    assert_eq!(
        report.run.stage(StageName::HealthCheck).unwrap().attempt,
        Some(2)
    );

    assert_eq!(fx.live_index().as_deref(), Some("v1"));
    assert_eq!(fx.active_proxy_config().as_deref(), Some("old config"));
    // one reload for the deploy, one for the restore
    assert_eq!(fx.reloads(), 2);
    assert_eq!(
        supervisor.calls(),
        vec![
            "stop web",
            "start web production",
            "stop web",
            "start web production"
        ]
    );

    let rollback = report.run.rollback.as_ref().unwrap();
    assert!(rollback.error.is_none());
    assert_eq!(rollback.steps.len(), 3);
}

/// Test: A config the proxy rejects is put back without a reload, then the run rolls back.
#[tokio::test]
async fn rejected_proxy_config_is_restored_without_reload() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    std::fs::create_dir_all(&fx.conf_dir).unwrap();
    std::fs::write(fx.conf_dir.join("web.conf"), "old config").unwrap();

    let orchestrator = fx.orchestrator(
        FakeSupervisor::new(),
        fx.proxy("echo 'unknown directive' >&2; exit 1"),
    );

    let report = orchestrator
        .run(
            Arc::new(fx.target()),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::RolledBack);
    let stage = report.run.stage(StageName::ActivateProxyConfig).unwrap();
    assert_eq!(stage.outcome, StageOutcome::Failed);
    assert!(stage.message.contains("unknown directive"));
    assert!(stage.message.contains("previous configuration restored"));

    assert_eq!(fx.active_proxy_config().as_deref(), Some("old config"));
    assert_eq!(fx.reloads(), 0);
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
}

/// Test: Background jobs of a timed-out variant cannot supply the next variant's artifacts.
#[tokio::test]
async fn timed_out_variant_leaves_nothing_for_the_next() {
    let fx = Fixture::new();
    let mut target = fx.target();
    target.build = vec![
        sh("(sleep 1; mkdir -p dist; echo late > dist/index.html) & exec sleep 30"),
        sh("sleep 2; exit 0"),
    ];
    target.build_timeout = Duration::from_millis(500);
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Build)
    );
    assert!(fx.live_index().is_none());
    assert!(!fx.source.join("dist").join("index.html").exists());
}

/// Test: A service the supervisor reports as errored fails the restart and rolls back.
#[tokio::test]
async fn errored_service_rolls_back() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");

    let mut target = fx.target();
    target.service = Some(fx.service());
    let supervisor = FakeSupervisor::scripted(vec![SupervisorState::Errored("errored".into())]);
    let orchestrator = fx.orchestrator(supervisor.clone(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::RolledBack);
    assert_eq!(
        report.run.stage(StageName::RestartService).unwrap().outcome,
        StageOutcome::Failed
    );
    assert!(report.run.stage(StageName::HealthCheck).is_none());
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
    // the restore restarts the service once more and it comes up
    assert_eq!(supervisor.calls().len(), 4);
}

/// Test: A service still stopped when the restart timeout expires rolls back to the backup.
#[tokio::test]
async fn service_not_running_after_timeout_rolls_back() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");

    let mut target = fx.target();
    target.service = Some(fx.service());
    target.restart_timeout = Duration::from_millis(300);
    let supervisor = FakeSupervisor::scripted(vec![SupervisorState::Stopped]);
    let orchestrator = fx.orchestrator(supervisor.clone(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::RolledBack);
    assert_eq!(report.exit_code(), EXIT_ROLLED_BACK);
    assert_eq!(
        report.run.stage(StageName::RestartService).unwrap().outcome,
        StageOutcome::Failed
    );
    assert!(report.run.stage(StageName::HealthCheck).is_none());

    let backup = report.run.backup.as_ref().expect("backup taken");
    assert_eq!(
        std::fs::read_to_string(backup.location.join("index.html")).unwrap(),
        "v1"
    );
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
    assert!(report.run.rollback.as_ref().unwrap().error.is_none());
}

/// Test: Two runs of one target never overlap; the second waits for the lock.
#[tokio::test]
async fn concurrent_runs_of_one_target_are_serialized() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    let log = fx.dir.path().join("build.log");

    let mut target = fx.target();
    target.build = vec![sh(&format!(
        "echo enter >> '{log}'; sleep 0.3; mkdir -p dist && echo v2 > dist/index.html; echo exit >> '{log}'",
        log = log.display()
    ))];
    let target = Arc::new(target);
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let (mut first_diag, mut second_diag) = (Diagnostics::default(), Diagnostics::default());
    let (first, second) = tokio::join!(
        orchestrator.run(target.clone(), RunOptions::default(), &mut first_diag),
        orchestrator.run(target.clone(), RunOptions::default(), &mut second_diag),
    );

    assert_eq!(first.run.status, RunStatus::Succeeded, "{:?}", first.error);
    assert_eq!(second.run.status, RunStatus::Succeeded, "{:?}", second.error);
    let entries = std::fs::read_to_string(&log).unwrap();
    assert_eq!(
        entries.lines().collect::<Vec<_>>(),
        vec!["enter", "exit", "enter", "exit"]
    );
}

/// Test: Parallel targets take turns on the shared proxy directory, so one
/// target's rejected config does not fail the other's activation.
#[tokio::test]
async fn parallel_targets_validate_proxy_config_one_at_a_time() {
    let fx = Fixture::new();
    let good = fx.target();

    let mut bad = fx.target();
    bad.name = TargetName::new("api").unwrap();
    bad.source_path = fx.dir.path().join("api-project");
    std::fs::create_dir_all(&bad.source_path).unwrap();
    bad.artifact_dir = bad.source_path.join("dist");
    bad.deploy_path = fx.dir.path().join("www").join("api");
    bad.health.probe = ProbeTarget::File(bad.deploy_path.join("index.html"));
    let bad_template = fx.dir.path().join("api.conf.tmpl");
    std::fs::write(&bad_template, "BAD directive;\n").unwrap();
    bad.proxy_template = Some(bad_template);

    let validate = format!(
        "sleep 0.3; ! grep -q BAD '{}'/*.conf",
        fx.conf_dir.display()
    );
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy(&validate));

    let (mut good_diag, mut bad_diag) = (Diagnostics::default(), Diagnostics::default());
    let (good_report, bad_report) = tokio::join!(
        orchestrator.run(Arc::new(good), RunOptions::default(), &mut good_diag),
        orchestrator.run(Arc::new(bad), RunOptions::default(), &mut bad_diag),
    );

    assert_eq!(
        good_report.run.status,
        RunStatus::Succeeded,
        "{:?}",
        good_report.error
    );
    assert_ne!(bad_report.run.status, RunStatus::Succeeded);
    assert_eq!(
        bad_report
            .run
            .stage(StageName::ActivateProxyConfig)
            .unwrap()
            .outcome,
        StageOutcome::Failed
    );
    assert!(fx.active_proxy_config().is_some());
    assert!(!fx.conf_dir.join("api.conf").exists());
}

/// Test: Health probes are retried until the endpoint answers 2xx.
#[tokio::test]
async fn http_health_check_retries_until_healthy() {
    let fx = Fixture::new();
    let url = support::status_server(vec![503, 503, 200]).await;

    let mut target = fx.target();
    target.health.probe = ProbeTarget::Http(format!("{url}/health"));
    target.health.retries = 5;
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(
        report.run.stage(StageName::HealthCheck).unwrap().attempt,
        Some(3)
    );
}

/// Test: Without a backup a post-placement failure cannot roll back and ends Failed.
#[tokio::test]
async fn first_deploy_failure_without_backup_is_failed() {
    let fx = Fixture::new();

    let mut target = fx.target();
    target.health.probe = ProbeTarget::File(fx.deploy_path.join("healthz"));
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(
        report.run.stage(StageName::Backup).unwrap().outcome,
        StageOutcome::Skipped
    );
    assert!(report.run.backup.is_none());
    assert!(report.run.rollback.is_none());
}

/// Test: Skipping the backup on request is recorded and leaves nothing to restore.
#[tokio::test]
async fn skip_backup_is_recorded() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let options = RunOptions {
        skip_backup: true,
        ..RunOptions::default()
    };
    let report = orchestrator
        .run(Arc::new(fx.target()), options, &mut Diagnostics::default())
        .await;

    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(
        report.run.stage(StageName::Backup).unwrap().outcome,
        StageOutcome::Skipped
    );
    assert!(!fx.backup_root.join("web").exists());
}

/// Test: Running as root is refused before anything is touched.
#[tokio::test]
async fn root_is_refused() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    let orchestrator = fx
        .orchestrator(FakeSupervisor::new(), fx.proxy("true"))
        .with_effective_uid(Some(0));

    let report = orchestrator
        .run(
            Arc::new(fx.target()),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Precondition)
    );
    assert!(report.run.stages.is_empty());
    assert!(!fx.backup_root.exists());
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
}

/// Test: An unreadable source directory fails the run before the backup stage.
#[tokio::test]
async fn missing_source_is_a_precondition_failure() {
    let fx = Fixture::new();
    let mut target = fx.target();
    target.source_path = fx.dir.path().join("does-not-exist");
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let report = orchestrator
        .run(
            Arc::new(target),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;

    assert_eq!(
        report.error.as_ref().map(|e| e.kind()),
        Some(DeployErrorKind::Precondition)
    );
    assert!(report.run.stages.is_empty());
}

/// Test: With waiting disabled a held lock fails the run and names the holder.
#[tokio::test]
async fn held_lock_fails_fast_without_waiting() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    let target = fx.target();
    let held = DeployLock::try_acquire(&fx.state_dir, &target.name, &target.deploy_path).unwrap();

    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));
    let options = RunOptions {
        wait_for_lock: false,
        ..RunOptions::default()
    };
    let report = orchestrator
        .run(Arc::new(target), options, &mut Diagnostics::default())
        .await;

    let error = report.error.expect("lock error");
    assert_eq!(error.kind(), DeployErrorKind::LockHeld);
    assert_eq!(error.lock_holder_info().unwrap().pid, std::process::id());
    assert_eq!(report.run.status, RunStatus::Failed);
    assert_eq!(fx.live_index().as_deref(), Some("v1"));

    held.release().unwrap();
}

/// Test: An identical rendered config is left in place without a reload.
#[tokio::test]
async fn unchanged_proxy_config_is_not_reloaded() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    for _ in 0..2 {
        let report = orchestrator
            .run(
                Arc::new(fx.target()),
                RunOptions::default(),
                &mut Diagnostics::default(),
            )
            .await;
        assert_eq!(report.run.status, RunStatus::Succeeded);
    }

    assert_eq!(fx.reloads(), 1);
}

/// Test: Manual rollback restores the newest backup and saves what was live.
#[tokio::test]
async fn manual_rollback_swaps_back_and_forth() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));
    let target = fx.target();

    let report = orchestrator
        .run(
            Arc::new(target.clone()),
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await;
    assert_eq!(report.run.status, RunStatus::Succeeded);
    assert_eq!(fx.live_index().as_deref(), Some("v2\n"));

    let first = orchestrator
        .rollback(&target, None, RunOptions::default(), &mut Diagnostics::default())
        .await
        .unwrap();
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
    assert!(first.saved.is_some());

    orchestrator
        .rollback(&target, None, RunOptions::default(), &mut Diagnostics::default())
        .await
        .unwrap();
    assert_eq!(fx.live_index().as_deref(), Some("v2\n"));
}

/// Test: Manual rollback with no backups is refused.
#[tokio::test]
async fn manual_rollback_without_backups_fails() {
    let fx = Fixture::new();
    fx.deploy_existing("v1");
    let orchestrator = fx.orchestrator(FakeSupervisor::new(), fx.proxy("true"));

    let err = orchestrator
        .rollback(
            &fx.target(),
            None,
            RunOptions::default(),
            &mut Diagnostics::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), DeployErrorKind::Precondition);
    assert_eq!(fx.live_index().as_deref(), Some("v1"));
}
