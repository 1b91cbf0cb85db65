// crates/inference-loadtest/src/runner.rs
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, sleep, MissedTickBehavior},
};
use tracing::info;

use crate::{
    config::Config,
    stats::{StatsRegistry, StatsSnapshot},
    workload::{wait_for_stop, InferenceUser},
};

/// Cadence of the stats sampler.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Run lifecycle broadcast to every task. Stopping tears down the user
/// tasks; Stopped releases the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
    Stopped,
}

/// Drive one full run: ramp users up at the configured spawn rate, sample
/// aggregate stats every 500ms, stop unconditionally after the configured
/// duration, and hand the finalized history back to the caller.
///
/// An unreachable target does not abort the run; failed requests are counted
/// and the run completes with degraded stats.
pub async fn run(config: &Config) -> Result<Vec<StatsSnapshot>> {
    let client = reqwest::Client::builder()
        .tcp_keepalive(Some(Duration::from_secs(15)))
        .pool_max_idle_per_host(config.max_user as usize)
        .build()
        .context("failed to build HTTP client")?;

    let stats = Arc::new(StatsRegistry::new());
    let user_count = Arc::new(AtomicU64::new(0));
    let (state_tx, state_rx) = watch::channel(RunState::Running);

    let sampler = tokio::spawn(sample_loop(
        Arc::clone(&stats),
        Arc::clone(&user_count),
        state_rx.clone(),
    ));
    let ramp = tokio::spawn(ramp_users(
        client,
        config.host.clone(),
        Arc::clone(&stats),
        Arc::clone(&user_count),
        state_rx,
        config.max_user,
        config.spawn_rate,
    ));

    info!(
        max_user = config.max_user,
        spawn_rate = config.spawn_rate,
        duration = %humantime::format_duration(config.duration),
        "run started"
    );

    sleep(config.duration).await;
    info!("configured duration elapsed; stopping run");
    let _ = state_tx.send(RunState::Stopping);

    let user_handles = ramp.await.context("ramp task panicked")?;
    for handle in user_handles {
        let _ = handle.await;
    }

    let _ = state_tx.send(RunState::Stopped);
    let history = sampler.await.context("sampler task panicked")?;

    info!(
        requests = stats.total_requests(),
        failures = stats.total_failures(),
        snapshots = history.len(),
        "run stopped"
    );

    Ok(history)
}

/// Spawn `spawn_rate` users once per second until `max_user` are active, or
/// the run leaves the Running state mid-ramp.
async fn ramp_users(
    client: reqwest::Client,
    host: String,
    stats: Arc<StatsRegistry>,
    user_count: Arc<AtomicU64>,
    mut state: watch::Receiver<RunState>,
    max_user: u64,
    spawn_rate: u64,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(max_user as usize);
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while (handles.len() as u64) < max_user {
        tokio::select! {
            _ = wait_for_stop(&mut state) => break,
            _ = ticker.tick() => {
                let batch = spawn_rate.min(max_user - handles.len() as u64);
                for _ in 0..batch {
                    let user = InferenceUser::new(client.clone(), &host, Arc::clone(&stats));
                    handles.push(tokio::spawn(user.run(state.clone())));
                }
                user_count.fetch_add(batch, Ordering::Relaxed);
                info!(active = handles.len(), target = max_user, "spawned users");
            }
        }
    }

    handles
}

/// Transcribe one snapshot per tick into the history until the lifecycle
/// reaches Stopped. The history is owned here and returned on exit, so no
/// reader can observe it mid-run.
async fn sample_loop(
    stats: Arc<StatsRegistry>,
    user_count: Arc<AtomicU64>,
    mut state: watch::Receiver<RunState>,
) -> Vec<StatsSnapshot> {
    let mut history = Vec::new();
    let mut ticker = interval(SAMPLE_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if *state.borrow_and_update() == RunState::Stopped {
            break;
        }
        let snapshot = stats.sample(user_count.load(Ordering::Relaxed));
        info!(
            time = %snapshot.time,
            current_rps = snapshot.current_rps,
            current_fail_per_sec = snapshot.current_fail_per_sec,
            p90_ms = snapshot.response_time_percentile_90,
            p95_ms = snapshot.response_time_percentile_95,
            avg_ms = snapshot.avg_response_time,
            users = snapshot.user_count,
            "stats sample"
        );
        history.push(snapshot);
    }

    history
}
