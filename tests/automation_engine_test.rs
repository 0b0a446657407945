mod common;

use common::{command_failed, FixedProbe, MockController};
use mumu_manager::automation::{AutomationEvent, AutomationState, StopReason};
use mumu_manager::domain::model::Action;
use mumu_manager::{AutomationConfig, AutomationEngine, MumuError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn plain_config(from: u32, to: u32, batch_size: usize) -> AutomationConfig {
    AutomationConfig {
        from_instance: from,
        to_instance: to,
        batch_size,
        batch_delay: Duration::ZERO,
        start_delay: Duration::ZERO,
        retry_base_delay: Duration::from_secs(1),
        enable_ai_optimization: false,
        enable_cpu_protection: false,
        ..AutomationConfig::default()
    }
}

fn drain(events: &mut tokio::sync::broadcast::Receiver<AutomationEvent>) -> Vec<AutomationEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn test_completed_run_launches_in_order_with_delays() {
    let controller = Arc::new(MockController::new());
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::new(FixedProbe::new(10.0, 20.0)));
    let mut events = engine.subscribe();

    let config = AutomationConfig {
        batch_delay: Duration::from_secs(10),
        start_delay: Duration::from_secs(2),
        ..plain_config(0, 5, 3)
    };

    let started = Instant::now();
    let report = engine.run(config).await.unwrap();

    // start delay + two launch gaps per batch + one batch delay
    assert_eq!(started.elapsed(), Duration::from_secs(2 + 4 + 10 + 4));
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(report.successful(), 6);
    assert_eq!(report.failed(), 0);
    assert_eq!(report.metrics.processed_instances, 6);
    assert_eq!(report.metrics.total_batches, 2);
    assert_eq!(controller.launched(), vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(engine.state(), AutomationState::Idle);

    let events = drain(&mut events);
    let batches: Vec<Vec<u32>> = events
        .iter()
        .filter_map(|event| match event {
            AutomationEvent::BatchStarted { instances, .. } => Some(instances.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    assert!(events.contains(&AutomationEvent::Progress {
        processed: 6,
        total: 6
    }));
    assert!(events.contains(&AutomationEvent::StateChanged {
        state: AutomationState::Running
    }));
}

#[tokio::test(start_paused = true)]
async fn test_ai_optimization_resizes_batches() {
    let controller = Arc::new(MockController::new());
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::new(FixedProbe::new(10.0, 20.0)));
    let mut events = engine.subscribe();

    let config = AutomationConfig {
        enable_ai_optimization: true,
        ..plain_config(0, 11, 4)
    };
    let report = engine.run(config).await.unwrap();

    // Light load grows the batch by half
    assert_eq!(report.batch_size, 6);
    assert_eq!(report.metrics.total_batches, 2);
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        AutomationEvent::Log { message, .. } if message.contains("from 4 to 6")
    )));
}

#[tokio::test(start_paused = true)]
async fn test_only_transient_failures_are_retried() {
    let controller = Arc::new(
        MockController::new()
            .fail_with(1, command_failed("device busy"))
            .fail_with(2, command_failed("permission denied")),
    );
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::new(FixedProbe::new(40.0, 40.0)));

    let report = engine.run(plain_config(0, 3, 4)).await.unwrap();

    let attempts: Vec<(u32, bool, u32)> = report
        .outcomes
        .iter()
        .map(|o| (o.index, o.success, o.attempts))
        .collect();
    assert_eq!(
        attempts,
        vec![(0, true, 1), (1, true, 2), (2, false, 1), (3, true, 1)]
    );
    assert!(report.outcomes[2].message.contains("permission denied"));
    assert_eq!(controller.launched(), vec![0, 1, 1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_all_failures_report_error_state() {
    let controller = Arc::new(
        MockController::new()
            .fail_with(0, command_failed("not found"))
            .fail_with(1, command_failed("not found")),
    );
    let engine = AutomationEngine::new(controller, Arc::new(FixedProbe::new(40.0, 40.0)));
    let mut events = engine.subscribe();

    let report = engine.run(plain_config(0, 1, 2)).await.unwrap();

    assert_eq!(report.failed(), 2);
    let events = drain(&mut events);
    assert!(events.contains(&AutomationEvent::StateChanged {
        state: AutomationState::Error
    }));
    assert!(events
        .iter()
        .any(|event| matches!(event, AutomationEvent::Error { kind, .. } if kind == "automation_failed")));
    assert_eq!(engine.state(), AutomationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_and_stop() {
    let controller = Arc::new(MockController::new());
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::new(FixedProbe::new(40.0, 40.0)));
    let handle = engine.handle();

    let config = AutomationConfig {
        start_delay: Duration::from_secs(5),
        ..plain_config(0, 9, 10)
    };
    let task = engine.spawn(config);

    // First launch at 5s, second due at 10s
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(handle.pause());
    assert_eq!(handle.state(), AutomationState::Paused);
    assert!(!handle.pause());

    tokio::time::sleep(Duration::from_secs(100)).await;
    assert_eq!(controller.launched(), vec![0]);

    assert!(handle.resume());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(controller.launched(), vec![0, 1]);

    assert!(handle.stop());
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.stop_reason, StopReason::UserRequested);
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.shut_down.is_empty());
    assert_eq!(handle.state(), AutomationState::Idle);
    assert!(!handle.stop());
}

#[tokio::test(start_paused = true)]
async fn test_cpu_overload_stops_and_shuts_down_launched_instances() {
    let controller = Arc::new(MockController::new());
    let probe = Arc::new(FixedProbe::new(20.0, 30.0));
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::clone(&probe));

    let config = AutomationConfig {
        start_delay: Duration::from_secs(3),
        enable_cpu_protection: true,
        cpu_threshold: 80.0,
        monitor_interval: Duration::from_secs(10),
        shutdown_on_overload: true,
        ..plain_config(0, 9, 10)
    };
    let task = engine.spawn(config);

    // Launches land every 3s; the guard samples at 10s and 20s.
    tokio::time::sleep(Duration::from_secs(13)).await;
    probe.set(95.0, 30.0);

    let report = task.await.unwrap().unwrap();

    assert_eq!(report.stop_reason, StopReason::CpuOverload { cpu: 95.0 });
    assert_eq!(report.shut_down, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(
        controller.calls().last(),
        Some(&(vec![0, 1, 2, 3, 4, 5], Action::Shutdown))
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_run_is_refused_while_running() {
    let controller = Arc::new(MockController::new());
    let engine = AutomationEngine::new(controller, Arc::new(FixedProbe::new(40.0, 40.0)));

    let config = AutomationConfig {
        start_delay: Duration::from_secs(60),
        ..plain_config(0, 3, 2)
    };
    let task = engine.spawn(config.clone());
    tokio::time::sleep(Duration::from_secs(1)).await;

    let err = engine.run(config).await.unwrap_err();
    assert!(matches!(err, MumuError::AutomationAlreadyRunning { .. }));

    engine.handle().stop();
    let report = task.await.unwrap().unwrap();
    assert_eq!(report.stop_reason, StopReason::UserRequested);
    assert!(report.outcomes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overload_without_shutdown_keeps_instances_running() {
    let controller = Arc::new(MockController::new());
    let probe = Arc::new(FixedProbe::new(20.0, 30.0));
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::clone(&probe));

    let config = AutomationConfig {
        start_delay: Duration::from_secs(3),
        enable_cpu_protection: true,
        cpu_threshold: 80.0,
        monitor_interval: Duration::from_secs(10),
        shutdown_on_overload: false,
        ..plain_config(0, 9, 10)
    };
    let task = engine.spawn(config);

    tokio::time::sleep(Duration::from_secs(13)).await;
    probe.set(95.0, 30.0);

    let report = task.await.unwrap().unwrap();

    assert_eq!(report.stop_reason, StopReason::CpuOverload { cpu: 95.0 });
    assert!(report.shut_down.is_empty());
    assert_eq!(controller.launched().len(), 6);
    assert!(controller
        .calls()
        .iter()
        .all(|(_, action)| *action == Action::Launch));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_overload_is_reported_once_per_cooldown() {
    // A 50s launch keeps the run alive while the guard samples five times.
    let controller = Arc::new(MockController::with_launch_time(Duration::from_secs(50)));
    let probe = Arc::new(FixedProbe::new(95.0, 30.0));
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::clone(&probe));
    let mut events = engine.subscribe();

    let config = AutomationConfig {
        enable_cpu_protection: true,
        cpu_threshold: 80.0,
        monitor_interval: Duration::from_secs(10),
        shutdown_on_overload: false,
        ..plain_config(0, 1, 2)
    };
    let report = engine.run(config).await.unwrap();

    assert_eq!(report.stop_reason, StopReason::CpuOverload { cpu: 95.0 });
    assert_eq!(controller.launched(), vec![0]);
    assert!(probe.samples() >= 4);

    let alerts = drain(&mut events)
        .iter()
        .filter(|event| matches!(event, AutomationEvent::Error { kind, .. } if kind == "resource_protection"))
        .count();
    assert_eq!(alerts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_retry_backoff() {
    let controller = Arc::new(
        MockController::new()
            .fail_with(0, command_failed("device busy"))
            .fail_with(0, command_failed("device busy"))
            .fail_with(0, command_failed("device busy")),
    );
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::new(FixedProbe::new(40.0, 40.0)));
    let handle = engine.handle();

    let config = AutomationConfig {
        retry_base_delay: Duration::from_secs(10),
        ..plain_config(0, 3, 4)
    };
    let started = Instant::now();
    let task = engine.spawn(config);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(handle.stop());
    let report = task.await.unwrap().unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.stop_reason, StopReason::UserRequested);
    assert_eq!(controller.launched(), vec![0]);
    assert_eq!(report.outcomes.len(), 1);
    assert!(!report.outcomes[0].success);
    assert_eq!(report.outcomes[0].attempts, 1);
    assert_eq!(handle.state(), AutomationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_aborted_run_releases_the_engine() {
    let controller = Arc::new(MockController::new());
    let probe = Arc::new(FixedProbe::new(40.0, 40.0));
    let engine = AutomationEngine::new(Arc::clone(&controller), Arc::clone(&probe));

    let config = AutomationConfig {
        start_delay: Duration::from_secs(60),
        enable_cpu_protection: true,
        monitor_interval: Duration::from_secs(10),
        ..plain_config(0, 1, 2)
    };
    let task = engine.spawn(config);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(engine.state(), AutomationState::Running);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(engine.state(), AutomationState::Idle);

    // The CPU guard went with the run.
    let sampled = probe.samples();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(probe.samples(), sampled);

    let report = engine.run(plain_config(0, 1, 2)).await.unwrap();
    assert_eq!(report.stop_reason, StopReason::Completed);
    assert_eq!(controller.launched(), vec![0, 1]);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_starting() {
    let engine = AutomationEngine::new(
        Arc::new(MockController::new()),
        Arc::new(FixedProbe::new(40.0, 40.0)),
    );

    let result = engine.run(plain_config(5, 1, 2)).await;
    assert!(result.is_err());
    assert_eq!(engine.state(), AutomationState::Idle);
}
