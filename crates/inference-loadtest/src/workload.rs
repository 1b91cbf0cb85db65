// crates/inference-loadtest/src/workload.rs
use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{
    sync::watch,
    time::{sleep, Instant},
};
use tracing::debug;

use crate::{runner::RunState, stats::StatsRegistry};

pub const GENERATE_PATH: &str = "/v2/models/opt-125m/generate";
const PROMPT: &str = "What is Triton Inference Server?";
const THINK_TIME_MAX_SECS: f64 = 5.0;

pub fn generate_payload() -> serde_json::Value {
    serde_json::json!({
        "text_input": PROMPT,
        "parameters": {
            "stream": false,
            "temperature": 0
        }
    })
}

/// One simulated user: issues the fixed generate request, then idles a
/// uniformly-random think time, until the run leaves the Running state.
pub struct InferenceUser {
    client: reqwest::Client,
    url: String,
    stats: Arc<StatsRegistry>,
}

impl InferenceUser {
    pub fn new(client: reqwest::Client, host: &str, stats: Arc<StatsRegistry>) -> Self {
        Self {
            client,
            url: format!("{host}{GENERATE_PATH}"),
            stats,
        }
    }

    pub async fn run(self, mut state: watch::Receiver<RunState>) {
        let payload = generate_payload();
        loop {
            if *state.borrow() != RunState::Running {
                break;
            }
            let think = Duration::from_secs_f64(
                rand::thread_rng().gen_range(0.0..THINK_TIME_MAX_SECS),
            );
            tokio::select! {
                _ = wait_for_stop(&mut state) => break,
                _ = async {
                    self.issue_once(&payload).await;
                    sleep(think).await;
                } => {}
            }
        }
    }

    /// One POST to the generate endpoint. Failures are recorded in the
    /// registry, never raised; they are signal for the report.
    async fn issue_once(&self, payload: &serde_json::Value) {
        let start = Instant::now();
        let failed = match self.client.post(&self.url).json(payload).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(ok) => ok.bytes().await.is_err(),
                Err(_) => true,
            },
            Err(_) => true,
        };
        let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;
        if failed {
            debug!(url = %self.url, latency_ms, "request failed");
        }
        self.stats.record(latency_ms, failed);
    }
}

/// Resolves once the run state is no longer Running (or the sender is gone).
pub(crate) async fn wait_for_stop(state: &mut watch::Receiver<RunState>) {
    while *state.borrow_and_update() == RunState::Running {
        if state.changed().await.is_err() {
            return;
        }
    }
}
