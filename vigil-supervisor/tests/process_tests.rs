//! Integration tests driving real child processes

#[cfg(unix)]
mod tests {
    use std::path::Path;
    use std::time::{Duration, Instant};
    use vigil_supervisor::{
        BackoffPolicy, HealthStatus, MonitorConfig, MonitorLoop, Orchestrator, OrchestratorConfig,
        ProcessSupervisor, RestartOutcome, ShutdownSignal, StatusReporter, StopOutcome,
        SupervisorConfig, WorkerDefinition, WorkerRegistry, WorkerState, WorkerSupervisor,
    };

    const DASHBOARD: &str = "# Dashboard\n\
\n\
| Timestamp | Action | Status | Details |\n\
|-----------|--------|--------|---------|\n\
\n\
*Last Updated: never*\n";

    fn sleeper(id: &str, dir: &Path) -> WorkerDefinition {
        WorkerDefinition::new(id, "sleep", ["30"], dir)
    }

    // Ignores SIGTERM, so only a kill stops it
    fn stubborn(id: &str, dir: &Path) -> WorkerDefinition {
        WorkerDefinition::new(id, "sh", ["-c", "trap '' TERM; exec sleep 30"], dir)
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            stop_timeout: Duration::from_millis(500),
            backoff: BackoffPolicy {
                base: Duration::from_millis(10),
                max: Duration::from_millis(100),
            },
            output_dir: None,
        }
    }

    fn supervisor(workers: Vec<WorkerDefinition>) -> ProcessSupervisor {
        ProcessSupervisor::new(WorkerRegistry::new(workers).unwrap(), fast_config())
    }

    fn pid_of(supervisor: &ProcessSupervisor, worker_id: &str) -> u32 {
        supervisor
            .worker_statuses()
            .into_iter()
            .find(|s| s.worker_id == worker_id)
            .and_then(|s| s.pid)
            .unwrap()
    }

    fn kill_externally(pid: u32) {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGKILL).unwrap();
    }

    async fn wait_until_dead(supervisor: &mut ProcessSupervisor, worker_id: &str) {
        for _ in 0..100 {
            if !supervisor.health_check(worker_id).unwrap().is_alive() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("worker {} never exited", worker_id);
    }

    #[tokio::test]
    async fn test_started_worker_is_alive_until_stopped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![sleeper("watcher", dir.path())]);

        let handle = supervisor.start("watcher").await.unwrap();
        assert!(handle.pid > 0);
        assert_eq!(supervisor.state("watcher"), Some(WorkerState::Running));
        assert_eq!(supervisor.restart_count("watcher"), Some(1));

        for _ in 0..3 {
            assert_eq!(
                supervisor.health_check("watcher").unwrap(),
                HealthStatus::Alive
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        // Health checks never change the lifecycle state
        assert_eq!(supervisor.state("watcher"), Some(WorkerState::Running));

        let outcome = supervisor
            .stop("watcher", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
        assert_eq!(
            supervisor.health_check("watcher").unwrap(),
            HealthStatus::NotRunning
        );
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![sleeper("watcher", dir.path())]);

        let first = supervisor.start("watcher").await.unwrap();
        let second = supervisor.start("watcher").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(supervisor.restart_count("watcher"), Some(1));
        supervisor.stop_all(Duration::from_secs(2)).await;
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![sleeper("watcher", dir.path())]);
        supervisor.start("watcher").await.unwrap();

        let first = supervisor
            .stop("watcher", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(first, StopOutcome::Graceful);
        assert_eq!(supervisor.state("watcher"), Some(WorkerState::Stopped));

        let second = supervisor
            .stop("watcher", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(second, StopOutcome::NotRunning);
        assert_eq!(supervisor.state("watcher"), Some(WorkerState::Stopped));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![stubborn("stubborn", dir.path())]);
        supervisor.start("stubborn").await.unwrap();
        // Give the shell time to install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let outcome = supervisor
            .stop("stubborn", Duration::from_millis(300))
            .await
            .unwrap();

        assert_eq!(outcome, StopOutcome::ForceKilled);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(supervisor.state("stubborn"), Some(WorkerState::Stopped));
    }

    #[tokio::test]
    async fn test_worker_output_captured_to_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let registry = WorkerRegistry::new(vec![WorkerDefinition::new(
            "echo",
            "sh",
            ["-c", "echo hello from worker; sleep 30"],
            dir.path(),
        )])
        .unwrap();
        let config = SupervisorConfig {
            output_dir: Some(dir.path().to_path_buf()),
            ..fast_config()
        };
        let mut supervisor = ProcessSupervisor::new(registry, config);

        supervisor.start("echo").await.unwrap();
        let log = dir.path().join("echo.log");
        let mut content = String::new();
        for _ in 0..50 {
            content = std::fs::read_to_string(&log).unwrap_or_default();
            if !content.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        supervisor.stop_all(Duration::from_secs(2)).await;

        assert!(content.contains("hello from worker"));
    }

    #[tokio::test]
    async fn test_restart_relaunches_crashed_worker() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![sleeper("watcher", dir.path())]);
        let shutdown = ShutdownSignal::new();

        supervisor.start("watcher").await.unwrap();
        let old_pid = pid_of(&supervisor, "watcher");
        kill_externally(old_pid);
        wait_until_dead(&mut supervisor, "watcher").await;
        supervisor.mark_crashed("watcher").unwrap();
        assert_eq!(supervisor.state("watcher"), Some(WorkerState::Crashed));

        let outcome = supervisor.restart("watcher", &shutdown).await.unwrap();
        let RestartOutcome::Restarted(handle) = outcome else {
            panic!("expected a restart, got {:?}", outcome);
        };

        assert_ne!(handle.pid, old_pid);
        assert_eq!(supervisor.state("watcher"), Some(WorkerState::Running));
        assert_eq!(supervisor.restart_count("watcher"), Some(2));
        supervisor.stop_all(Duration::from_secs(2)).await;
    }

    // Scenario A: one of four workers killed externally is detected and restarted once
    #[tokio::test]
    async fn test_killed_worker_detected_and_restarted_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![
            sleeper("filesystem", dir.path()),
            sleeper("gmail", dir.path()),
            sleeper("whatsapp", dir.path()),
            sleeper("approval", dir.path()),
        ]);
        let shutdown = ShutdownSignal::new();

        let started = supervisor.start_all(Duration::ZERO, &shutdown).await;
        assert_eq!(started.started.len(), 4);

        let gmail_pid = pid_of(&supervisor, "gmail");
        kill_externally(gmail_pid);

        // One health-check period is 100ms; stop after roughly four of them
        let monitor = MonitorLoop::new(
            MonitorConfig {
                tick: Duration::from_millis(20),
                health_check_ticks: 5,
            },
            shutdown.clone(),
            StatusReporter::detached(),
        );
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            trigger.trigger();
        });

        let report = monitor.run(&mut supervisor).await;

        assert_eq!(report.crashes_detected, 1);
        assert_eq!(report.restarts, 1);
        assert_eq!(supervisor.restart_count("gmail"), Some(2));
        assert_ne!(pid_of(&supervisor, "gmail"), gmail_pid);
        for id in ["filesystem", "whatsapp", "approval"] {
            assert_eq!(supervisor.restart_count(id), Some(1));
            assert_eq!(supervisor.state(id), Some(WorkerState::Running));
        }

        supervisor.stop_all(Duration::from_secs(2)).await;
    }

    // Scenario B: shutdown stops every worker within about one grace period
    #[tokio::test]
    async fn test_shutdown_stops_all_with_shared_deadline() {
        let dir = tempfile::TempDir::new().unwrap();
        let document = dir.path().join("Dashboard.md");
        std::fs::write(&document, DASHBOARD).unwrap();

        let supervisor = supervisor(vec![
            sleeper("filesystem", dir.path()),
            stubborn("gmail", dir.path()),
            stubborn("whatsapp", dir.path()),
            sleeper("approval", dir.path()),
        ]);
        let shutdown = ShutdownSignal::new();
        let orchestrator = Orchestrator::new(
            supervisor,
            OrchestratorConfig {
                launch_stagger: Duration::ZERO,
                stop_timeout: Duration::from_millis(800),
            },
            MonitorConfig {
                tick: Duration::from_millis(50),
                health_check_ticks: 100,
            },
            StatusReporter::new(&document),
            shutdown.clone(),
        );

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.trigger();
            // A second request changes nothing
            trigger.trigger();
        });

        let started = Instant::now();
        let summary = orchestrator.run().await;
        let elapsed = started.elapsed();

        assert_eq!(summary.start.started.len(), 4);
        assert_eq!(summary.monitor.passes, 0);
        assert_eq!(summary.stopped.len(), 4);
        let mut killed = summary.force_killed();
        killed.sort();
        assert_eq!(killed, vec!["gmail", "whatsapp"]);
        // Two stubborn workers waited out one shared 800ms deadline, not two
        assert!(elapsed < Duration::from_millis(300 + 1500), "took {:?}", elapsed);

        let content = std::fs::read_to_string(&document).unwrap();
        assert!(content.contains("System Online: All Watchers Active"));
        assert!(content.contains("System Offline: Orchestrator Stopped"));
    }

    #[tokio::test]
    async fn test_stop_all_leaves_every_worker_stopped() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![
            sleeper("a", dir.path()),
            stubborn("b", dir.path()),
            sleeper("c", dir.path()),
        ]);
        let shutdown = ShutdownSignal::new();
        supervisor.start_all(Duration::ZERO, &shutdown).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        let outcomes = supervisor.stop_all(Duration::from_millis(300)).await;

        assert_eq!(
            outcomes,
            vec![
                ("a".to_string(), StopOutcome::Graceful),
                ("b".to_string(), StopOutcome::ForceKilled),
                ("c".to_string(), StopOutcome::Graceful),
            ]
        );
        for status in supervisor.worker_statuses() {
            assert_eq!(status.state, WorkerState::Stopped);
            assert!(status.pid.is_none());
        }
    }

    // Scenario C: a launch failure is not picked up by the monitor loop
    #[tokio::test]
    async fn test_launch_failure_not_restarted_by_monitor() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut supervisor = supervisor(vec![
            sleeper("good", dir.path()),
            WorkerDefinition::new(
                "broken",
                "/nonexistent/vigil-worker",
                Vec::<String>::new(),
                dir.path(),
            ),
        ]);
        let shutdown = ShutdownSignal::new();

        let report = supervisor.start_all(Duration::ZERO, &shutdown).await;
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert_eq!(supervisor.state("broken"), Some(WorkerState::Stopped));

        let monitor = MonitorLoop::new(
            MonitorConfig {
                tick: Duration::from_millis(10),
                health_check_ticks: 3,
            },
            shutdown.clone(),
            StatusReporter::detached(),
        );
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger();
        });
        let monitor_report = monitor.run(&mut supervisor).await;

        assert!(monitor_report.passes >= 2);
        assert_eq!(monitor_report.restarts + monitor_report.failed_restarts, 0);
        assert_eq!(supervisor.state("broken"), Some(WorkerState::Stopped));
        assert_eq!(supervisor.restart_count("broken"), Some(1));

        supervisor.stop_all(Duration::from_secs(2)).await;
    }
}
