//! Extract → transform → load, run once.
//!
//! [`Pipeline`] owns its configuration and ports, walks the state machine
//! `Idle → Extracting → Transforming → Loading → Completed` and turns the
//! first stage error into a terminal [`PipelineReport`]. Stages never retry
//! across each other; only the extractor retries, per partition.

pub mod extract;
pub mod load;
pub mod transform;

use crate::apis::SourceApi;
use crate::app::ports::{HttpClientPort, SinkPort};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{EtlError, Result};
use extract::Extractor;
use metrics::{counter, histogram};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use transform::Transformer;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Extracting => "extracting",
            PipelineState::Transforming => "transforming",
            PipelineState::Loading => "loading",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Completed { rows_written: usize },
    /// `stage` is the state the pipeline was in when `error` surfaced.
    Failed { stage: PipelineState, error: EtlError },
}

/// Result of a complete pipeline run
#[derive(Debug)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub final_state: PipelineState,
    /// Every state entered, in order, starting with `Idle`.
    pub states: Vec<PipelineState>,
    pub outcome: PipelineOutcome,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::Completed { .. })
    }

    pub fn rows_written(&self) -> Option<usize> {
        match self.outcome {
            PipelineOutcome::Completed { rows_written } => Some(rows_written),
            PipelineOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&EtlError> {
        match &self.outcome {
            PipelineOutcome::Failed { error, .. } => Some(error),
            PipelineOutcome::Completed { .. } => None,
        }
    }

    pub fn failed_stage(&self) -> Option<PipelineState> {
        match &self.outcome {
            PipelineOutcome::Failed { stage, .. } => Some(*stage),
            PipelineOutcome::Completed { .. } => None,
        }
    }
}

/// The ports a run talks to.
#[derive(Clone)]
pub struct PipelineComponents {
    pub http: Arc<dyn HttpClientPort>,
    pub api: Arc<dyn SourceApi>,
    pub transformer: Arc<dyn Transformer>,
    pub sink: Arc<dyn SinkPort>,
    pub clock: Arc<dyn Clock>,
}

pub struct Pipeline {
    run_id: Uuid,
    config: PipelineConfig,
    components: PipelineComponents,
    cancel: CancellationToken,
    state: PipelineState,
    states: Vec<PipelineState>,
}

impl Pipeline {
    /// Fails with a config error before any I/O when `config` is out of bounds.
    pub fn new(
        config: PipelineConfig,
        components: PipelineComponents,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            run_id: Uuid::new_v4(),
            config,
            components,
            cancel,
            state: PipelineState::Idle,
            states: vec![PipelineState::Idle],
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn enter(&mut self, next: PipelineState) {
        info!(from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
        self.states.push(next);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(EtlError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run all stages once. Never panics on stage errors; they end up in the report.
    pub async fn run(mut self) -> PipelineReport {
        let started = Instant::now();
        let span = info_span!(
            "etl_run",
            run_id = %self.run_id,
            source = self.components.api.api_name(),
            table = %self.config.table_name
        );

        let outcome = match self.execute().instrument(span.clone()).await {
            Ok(rows_written) => {
                self.enter(PipelineState::Completed);
                PipelineOutcome::Completed { rows_written }
            }
            Err(error) => {
                let stage = self.state;
                self.enter(PipelineState::Failed);
                PipelineOutcome::Failed { stage, error }
            }
        };

        let elapsed = started.elapsed();
        let _entered = span.enter();
        counter!("etl_pipeline_runs_total", "status" => self.state.as_str()).increment(1);
        match &outcome {
            PipelineOutcome::Completed { rows_written } => info!(
                rows_written,
                elapsed_ms = elapsed.as_millis() as u64,
                "Pipeline completed"
            ),
            PipelineOutcome::Failed { stage, error } => error!(
                %stage,
                error = %error,
                elapsed_ms = elapsed.as_millis() as u64,
                "Pipeline failed"
            ),
        }

        PipelineReport {
            run_id: self.run_id,
            final_state: self.state,
            states: self.states,
            outcome,
            elapsed,
        }
    }

    async fn execute(&mut self) -> Result<usize> {
        info!(
            partitions = self.config.partitions.len(),
            mode = %self.config.write_mode,
            "Starting pipeline run"
        );

        self.enter(PipelineState::Extracting);
        self.check_cancelled()?;
        let stage_start = Instant::now();
        let extractor = Extractor::new(
            Arc::clone(&self.components.http),
            Arc::clone(&self.components.api),
            self.config.retry_policy()?,
            self.config.request_timeout(),
        )
        .retry_malformed(self.config.retry_malformed_responses);
        let records = extractor
            .extract_all(
                &self.config.partitions,
                self.config.concurrency_limit,
                &self.cancel,
            )
            .await?;
        record_stage(PipelineState::Extracting, stage_start);

        self.enter(PipelineState::Transforming);
        self.check_cancelled()?;
        let stage_start = Instant::now();
        let dataset = transform::transform(
            self.components.transformer.as_ref(),
            records,
            self.components.clock.as_ref(),
        )?;
        record_stage(PipelineState::Transforming, stage_start);

        self.enter(PipelineState::Loading);
        self.check_cancelled()?;
        let stage_start = Instant::now();
        let written = load::load(
            self.components.sink.as_ref(),
            &dataset,
            &self.config.table_name,
            self.config.write_mode,
        )
        .await?;
        record_stage(PipelineState::Loading, stage_start);

        Ok(written)
    }
}

fn record_stage(stage: PipelineState, started: Instant) {
    histogram!("etl_stage_duration_seconds", "stage" => stage.as_str())
        .record(started.elapsed().as_secs_f64());
}
