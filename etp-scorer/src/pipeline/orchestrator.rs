//! Pipeline orchestrator
//!
//! Owns the wired resources and runs extract → transform → predict for one
//! request at a time. The stream consumer's cursor is shared state, so runs
//! (and resource swaps) serialize behind one async gate.

use super::{FeatureExtractor, FeatureTransformer, PipelineError, Predictor, TransformOutput};
use crate::resources::Resources;
use crate::types::PredictionResult;
use chrono::Utc;
use etp_common::events::{EventBus, PipelineEvent, Stage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

enum ResourceState {
    Uninitialized,
    Ready(Resources),
}

/// One scoring request as issued by the boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunRequest {
    pub batch_size: usize,
    pub request_id: u64,
}

pub struct EtpPipeline {
    resources: Mutex<ResourceState>,
    /// Mirrors `resources` for lock-free readiness checks
    ready: AtomicBool,
    extractor: FeatureExtractor,
    transformer: FeatureTransformer,
    predictor: Arc<Predictor>,
    event_bus: EventBus,
}

impl EtpPipeline {
    pub fn new(
        extractor: FeatureExtractor,
        transformer: FeatureTransformer,
        predictor: Arc<Predictor>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            resources: Mutex::new(ResourceState::Uninitialized),
            ready: AtomicBool::new(false),
            extractor,
            transformer,
            predictor,
            event_bus,
        }
    }

    /// Wire (or rewire) stream and store
    ///
    /// Waits for any in-flight run; the previous resources are dropped.
    pub async fn install(&self, resources: Resources) {
        let topic = resources.topic().to_string();
        let group_id = resources.group_id().to_string();

        let mut state = self.resources.lock().await;
        let replaced = matches!(*state, ResourceState::Ready(_));
        *state = ResourceState::Ready(resources);
        self.ready.store(true, Ordering::Release);
        drop(state);

        info!(%topic, %group_id, replaced, "Data resources installed");
        self.event_bus.emit_lossy(PipelineEvent::ResourcesInitialized {
            topic,
            group_id,
            timestamp: Utc::now(),
        });
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Score one batch
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: &CancellationToken,
    ) -> Result<PredictionResult, PipelineError> {
        if request.batch_size == 0 {
            return Err(PipelineError::InvalidBatchSize(0));
        }
        if !self.is_ready() {
            return Err(PipelineError::NotReady);
        }

        let run_id = Uuid::new_v4();
        let span = info_span!(
            "pipeline_run",
            %run_id,
            request_id = request.request_id,
            batch_size = request.batch_size
        );

        async move {
            let mut state = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                state = self.resources.lock() => state,
            };
            let ResourceState::Ready(resources) = &mut *state else {
                return Err(PipelineError::NotReady);
            };

            self.event_bus.emit_lossy(PipelineEvent::RunStarted {
                run_id,
                request_id: request.request_id,
                batch_size: request.batch_size,
                timestamp: Utc::now(),
            });

            let started = Instant::now();
            let outcome = self.execute(resources, request.batch_size, run_id, cancel).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match &outcome {
                Ok(result) => {
                    info!(
                        scored = result.predictions.len(),
                        dropped = result.dropped_user_ids.len(),
                        unmatched = result.unmatched_user_ids.len(),
                        elapsed_ms,
                        "Pipeline run completed"
                    );
                    self.event_bus.emit_lossy(PipelineEvent::RunCompleted {
                        run_id,
                        request_id: request.request_id,
                        scored: result.predictions.len(),
                        dropped: result.dropped_user_ids.len(),
                        unmatched: result.unmatched_user_ids.len(),
                        elapsed_ms,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    debug!(kind = e.kind(), elapsed_ms, "Pipeline run failed");
                    self.event_bus.emit_lossy(PipelineEvent::RunFailed {
                        run_id,
                        request_id: request.request_id,
                        stage: e.stage(),
                        kind: e.kind().to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }

            outcome
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        resources: &mut Resources,
        batch_size: usize,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<PredictionResult, PipelineError> {
        let (source, store) = resources.parts();

        let stage_start = Instant::now();
        let extracted = self.extractor.extract(source, store, batch_size, cancel).await?;
        self.stage_completed(run_id, Stage::Extract, extracted.joined.len(), stage_start);

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let stage_start = Instant::now();
        let TransformOutput {
            table,
            dropped_user_ids,
        } = self.transformer.transform(extracted.joined)?;
        self.stage_completed(run_id, Stage::Transform, table.len(), stage_start);

        if table.is_empty() {
            debug!("No rows left to score, skipping prediction");
            return Ok(PredictionResult {
                predictions: BTreeMap::new(),
                dropped_user_ids,
                unmatched_user_ids: extracted.unmatched_user_ids,
            });
        }

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let stage_start = Instant::now();
        let scores = self.predictor.predict(&table.features())?;
        self.stage_completed(run_id, Stage::Predict, scores.len(), stage_start);

        let predictions = pair_scores(table.user_ids(), scores)?;

        Ok(PredictionResult {
            predictions,
            dropped_user_ids,
            unmatched_user_ids: extracted.unmatched_user_ids,
        })
    }

    fn stage_completed(&self, run_id: Uuid, stage: Stage, rows: usize, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        debug!(%stage, rows, elapsed_ms, "Stage completed");
        self.event_bus.emit_lossy(PipelineEvent::StageCompleted {
            run_id,
            stage,
            rows,
            elapsed_ms,
        });
    }
}

/// Pair surviving ids with their scores, refusing a length mismatch
fn pair_scores(user_ids: Vec<i64>, scores: Vec<f64>) -> Result<BTreeMap<i64, f64>, PipelineError> {
    if user_ids.len() != scores.len() {
        return Err(PipelineError::Misaligned {
            rows: user_ids.len(),
            predictions: scores.len(),
        });
    }
    Ok(user_ids.into_iter().zip(scores).collect())
}
