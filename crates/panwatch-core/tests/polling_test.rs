#![allow(clippy::unwrap_used)]
// Integration tests for `PollingTask`: scheduling, enable/disable,
// threshold escalation and error reporting.

use std::sync::Arc;
use std::time::Duration;

use panwatch_api::ApiElement;
use panwatch_api::commands::{OP_SHOW_SESSION_INFO, OP_SHOW_SYSTEM_RESOURCES};
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use tokio::time::Instant;
use url::Url;

use panwatch_core::model::{Sample, SampleCategory};
use panwatch_core::monitors::{InterfaceMonitor, SessionInfoMonitor, SystemResourceMonitor};
use panwatch_core::testing::{MockTransport, RecordingSink};
use panwatch_core::{
    Appliance, ApplianceRegistry, ConfigHandle, CoreError, PollingConfig, PollingTask,
    RequestScheduler, TaskContext, TaskState, ThresholdBreach, TickOutcome,
};

const SERIAL: &str = "0001";

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    transport: Arc<MockTransport>,
    config: ConfigHandle,
    registry: Arc<ApplianceRegistry>,
    sink: Arc<RecordingSink>,
    ctx: TaskContext,
}

fn harness() -> Harness {
    let transport = Arc::new(MockTransport::new());
    let config = ConfigHandle::new(PollingConfig::default());
    let scheduler = RequestScheduler::spawn(transport.clone(), config.subscribe());
    let registry = Arc::new(ApplianceRegistry::new());
    let sink = Arc::new(RecordingSink::new());

    let mut appliance = Appliance::new(
        Url::parse("https://fw1").unwrap(),
        SecretString::from("k"),
        SERIAL,
    );
    appliance.sw_version = "8.1.0".into();
    registry.upsert(appliance);

    let ctx = TaskContext {
        scheduler,
        registry: registry.clone(),
        sink: sink.clone(),
        config: config.subscribe(),
    };
    Harness {
        transport,
        config,
        registry,
        sink,
        ctx,
    }
}

fn top(idle: f64) -> ApiElement {
    let body = format!(
        "top - 10:00:01 up 3 days,  2:11,  0 users,  load average: 0.52, 0.48, 0.61
Cpu(s):  3.1%us,  1.2%sy,  0.4%ni, {idle:.1}%id,  0.3%wa,  0.0%hi,  0.2%si,  0.0%st
Mem:   4053832k total,  3945072k used,   108760k free,   123456k buffers
Swap:  2008084k total,   402224k used,  1605860k free,  1234567k cached
"
    );
    ApiElement::new("result").with_text(body)
}

async fn wait_ticks(task: &PollingTask, ticks: u64) {
    let mut status = task.subscribe();
    status.wait_for(|s| s.ticks >= ticks).await.unwrap();
}

fn error_for(registry: &ApplianceRegistry, key: &str) -> Option<String> {
    registry.get(SERIAL).unwrap().errors.get(key).cloned()
}

// ── Scheduling ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_first_tick_is_immediate_then_every_interval() {
    let h = harness();
    let started = Instant::now();
    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false);

    h.sink.wait_for(1).await;
    assert!(started.elapsed() < Duration::from_secs(1));

    h.sink.wait_for(3).await;
    assert!(started.elapsed() >= Duration::from_secs(60));

    let records = h.sink.records();
    assert!(records.iter().all(|r| r.serial == SERIAL));
    assert!(records.iter().all(|r| r.category == SampleCategory::Sessions));
    assert_eq!(task.status().state, TaskState::Idle);
    assert!(task.status().ticks >= 3);
}

#[tokio::test(start_paused = true)]
async fn test_interval_change_applies_to_next_reschedule() {
    let h = harness();
    h.config.modify(|c| c.tracking_interval_secs = 600);
    let started = Instant::now();
    let _task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false);

    h.sink.wait_for(2).await;
    assert!(started.elapsed() >= Duration::from_secs(600));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_future_ticks() {
    let h = harness();
    let mut task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    task.cancel();
    task.join().await;
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.sink.len(), 1);
    assert!(task.is_canceled());
    assert_eq!(task.status().state, TaskState::Canceled);

    // Polling a canceled task does nothing.
    task.poll(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_handle_cancels() {
    let h = harness();
    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;
    drop(task);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.transport.call_count(), 1);
}

// ── Enable / disable ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_disabled_task_only_ticks_when_forced() {
    let h = harness();
    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), true);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.call_count(), 0);
    assert!(task.is_disabled());

    task.poll(true);
    wait_ticks(&task, 1).await;
    assert_eq!(h.transport.call_count(), 1);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(task.status().ticks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unforced_poll_on_disabled_task_is_skipped() {
    let h = harness();
    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), true);

    task.poll(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(task.status().ticks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_enable_resumes_the_schedule() {
    let h = harness();
    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), true);
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(h.transport.call_count(), 0);

    assert!(task.enable());
    assert!(!task.enable());

    // The skipped tick re-armed the timer, so the next one polls.
    wait_ticks(&task, 1).await;
    assert_eq!(h.transport.call_count(), 1);

    assert!(task.disable());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.transport.call_count(), 1);
}

// ── Threshold escalation ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_high_cpu_disables_appliance_and_keeps_sample() {
    let h = harness();
    h.transport.on_op(OP_SHOW_SYSTEM_RESOURCES, Ok(top(20.0)));

    let task = PollingTask::start(Box::new(SystemResourceMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    match task.status().last_outcome {
        Some(TickOutcome::ThresholdBreached(ThresholdBreach::HighCpu {
            idle_pct,
            threshold_pct,
        })) => {
            assert_eq!(idle_pct, 20.0);
            assert_eq!(threshold_pct, 70);
        }
        other => panic!("expected HighCpu breach, got: {other:?}"),
    }

    assert!(h.registry.get(SERIAL).unwrap().disabled);
    assert_eq!(
        error_for(&h.registry, "system-resources").as_deref(),
        Some("High CPU - Monitoring disabled")
    );

    let records = h.sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].category, SampleCategory::Mp);
    assert!(matches!(records[0].sample, Sample::System(_)));
}

#[tokio::test(start_paused = true)]
async fn test_high_memory_breach_when_cpu_is_fine() {
    let h = harness();
    h.config.modify(|c| c.high_memory_threshold_pct = 50);
    h.transport.on_op(OP_SHOW_SYSTEM_RESOURCES, Ok(top(94.8)));

    let task = PollingTask::start(Box::new(SystemResourceMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    assert!(matches!(
        task.status().last_outcome,
        Some(TickOutcome::ThresholdBreached(ThresholdBreach::HighMemory { threshold_pct: 50, .. }))
    ));
    assert_eq!(
        error_for(&h.registry, "system-resources").as_deref(),
        Some("High Memory - Monitoring disabled")
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_threshold_never_disables() {
    let h = harness();
    h.config.modify(|c| {
        c.high_cpu_threshold_pct = 0;
        c.high_memory_threshold_pct = 0;
    });
    h.transport.on_op(OP_SHOW_SYSTEM_RESOURCES, Ok(top(1.0)));

    let task = PollingTask::start(Box::new(SystemResourceMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    assert_eq!(
        task.status().last_outcome,
        Some(TickOutcome::Sampled { persisted: true })
    );
    assert!(!h.registry.get(SERIAL).unwrap().disabled);
    assert_eq!(error_for(&h.registry, "system-resources"), None);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_recorded_then_cleared() {
    let h = harness();
    h.transport.on_op(
        OP_SHOW_SESSION_INFO,
        Err(CoreError::Api {
            message: "Request failed (boom)".into(),
        }),
    );

    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    assert_eq!(
        task.status().last_outcome,
        Some(TickOutcome::Failed("Request failed (boom)".into()))
    );
    assert_eq!(
        error_for(&h.registry, "session-info").as_deref(),
        Some("Request failed (boom)")
    );
    assert!(h.sink.is_empty());
    // A failure is not a threshold breach.
    assert!(!h.registry.get(SERIAL).unwrap().disabled);

    h.transport
        .on_op_xml(OP_SHOW_SESSION_INFO, "<result><num-active>12</num-active></result>")
        .unwrap();
    task.poll(false);
    wait_ticks(&task, 2).await;

    assert_eq!(error_for(&h.registry, "session-info"), None);
    assert_eq!(h.sink.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sink_failure_is_a_tick_failure() {
    let h = harness();
    h.sink.set_failure(Some("disk full"));

    let task = PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    assert_eq!(
        error_for(&h.registry, "session-info").as_deref(),
        Some("Sample store error: disk full")
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_appliance_fails_without_calling_out() {
    let h = harness();
    let task = PollingTask::start(Box::new(SessionInfoMonitor), "9999", h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    assert_eq!(
        task.status().last_outcome,
        Some(TickOutcome::Failed("Appliance not found: 9999".into()))
    );
    assert_eq!(h.transport.call_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_first_interface_tick_only_primes_the_engine() {
    let h = harness();
    let task = PollingTask::start(Box::new(InterfaceMonitor::new()), SERIAL, h.ctx.clone(), false);
    wait_ticks(&task, 1).await;

    assert_eq!(
        task.status().last_outcome,
        Some(TickOutcome::Sampled { persisted: false })
    );
    assert!(h.sink.is_empty());
    assert_eq!(error_for(&h.registry, "interfaces"), None);
}

// ── Bookkeeping ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_polling_counter_returns_to_zero() {
    let h = harness();
    let tasks: Vec<_> = (0..3)
        .map(|_| PollingTask::start(Box::new(SessionInfoMonitor), SERIAL, h.ctx.clone(), false))
        .collect();
    for task in &tasks {
        wait_ticks(task, 1).await;
    }

    let appliance = h.registry.get(SERIAL).unwrap();
    assert_eq!(appliance.polling, 0);
    assert!(!appliance.is_polling());
    assert!(tasks.iter().all(|t| !t.is_polling()));
}
