//! Queue, worker pool and per-run pipeline.
//!
//! ```text
//! enqueue(id) ──> in-flight set ──> bounded mpsc ──> worker loop × N ──> Pipeline::process(id)
//!                 (guard travels with the job and is released when the attempt ends)
//! ```
//!
//! `Pipeline::process` re-reads the row and runs only the phases whose output is
//! missing: clone + analyzer when `analyzer_output` is absent, scorer when
//! `scorer_output` is absent. Every status change goes through
//! [`state::transition`].

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::models::{Run, RunStatus, RunUpdate};
use super::state::{self, PhaseOutcome};
use super::store::{ResetOutcome, RunStore};
use super::workspace::Cloner;
use crate::analyzer::{ANALYZER_TOOL_VERSION, Analyzer, AnalyzerResult};
use crate::errors::PipelineError;
use crate::gateway::cache::AiCache;
use crate::scorer::{SCORER_TOOL_VERSION, Scorer};

// ── Pipeline ──────────────────────────────────────────────────────────

/// Everything needed to drive one run from its current status to `DONE`.
pub struct Pipeline {
    store: Arc<dyn RunStore>,
    cloner: Arc<dyn Cloner>,
    analyzer: Arc<Analyzer>,
    scorer: Arc<Scorer>,
}

/// AI caches of one attempt, persisted even when the attempt fails.
struct AttemptCaches {
    analyzer: AiCache,
    scorer: AiCache,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn RunStore>,
        cloner: Arc<dyn Cloner>,
        analyzer: Arc<Analyzer>,
        scorer: Arc<Scorer>,
    ) -> Self {
        Self {
            store,
            cloner,
            analyzer,
            scorer,
        }
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Process one dequeued run. Failures are recorded on the row; only a
    /// failure to record them is returned.
    pub async fn process(&self, run_id: i64) -> Result<(), PipelineError> {
        let Some(run) = self.store.get(run_id).await.map_err(PipelineError::persistence)? else {
            tracing::warn!(run_id, "Dequeued run no longer exists");
            return Ok(());
        };
        if !run.status.is_enqueueable() {
            tracing::info!(run_id, status = %run.status, "Skipping run that is not enqueueable");
            return Ok(());
        }

        let mut status = state::transition(run.status, PhaseOutcome::Started)?;
        self.store
            .update(run_id, RunUpdate::status(status))
            .await
            .map_err(PipelineError::persistence)?;
        tracing::info!(run_id, from = %run.status, to = %status, "Run started");

        let mut caches = AttemptCaches {
            analyzer: run.analyzer_ai_cache.clone(),
            scorer: run.scorer_ai_cache.clone(),
        };

        let outcome = match self.drive(&run, &mut status, &mut caches).await {
            Ok(()) => {
                tracing::info!(run_id, status = %status, "Run finished");
                Ok(())
            }
            Err(err) => self.fail(&run, status, caches, err).await,
        };
        self.log_ai_stats(run_id);
        outcome
    }

    async fn drive(
        &self,
        run: &Run,
        status: &mut RunStatus,
        caches: &mut AttemptCaches,
    ) -> Result<(), PipelineError> {
        let analyzer_result: AnalyzerResult = match &run.analyzer_output {
            Some(existing) => {
                tracing::info!(run_id = run.id, "Analyzer output present, skipping clone and analysis");
                *status = state::transition(*status, PhaseOutcome::AnalyzerSucceeded)?;
                self.persist(run.id, RunUpdate::status(*status)).await?;
                existing.result.clone()
            }
            None => {
                let checkout = self.cloner.checkout(run.id, &run.github_url).await?;
                let output = self.analyzer.analyze(checkout.path(), &mut caches.analyzer).await?;
                *status = state::transition(*status, PhaseOutcome::AnalyzerSucceeded)?;

                let result = output.result.clone();
                self.persist(
                    run.id,
                    RunUpdate {
                        status: Some(*status),
                        commit_hash: run
                            .commit_hash
                            .is_none()
                            .then(|| checkout.commit_hash.clone()),
                        branch_name: run
                            .branch_name
                            .is_none()
                            .then(|| checkout.branch_name.clone()),
                        analyzer_output: Some(output),
                        analyzer_tool_version: Some(ANALYZER_TOOL_VERSION.to_string()),
                        analyzer_ai_cache: Some(caches.analyzer.clone()),
                        ..Default::default()
                    },
                )
                .await?;
                tracing::info!(
                    run_id = run.id,
                    passed = result.passed(),
                    total = result.checks.len(),
                    "Analyzer phase complete"
                );
                result
            }
        };

        if run.scorer_output.is_some() {
            tracing::info!(run_id = run.id, "Scorer output present, skipping scoring");
            *status = state::transition(*status, PhaseOutcome::ScorerSucceeded)?;
            return self.persist(run.id, RunUpdate::status(*status)).await;
        }

        let output = self.scorer.score(&analyzer_result, &mut caches.scorer).await?;
        *status = state::transition(*status, PhaseOutcome::ScorerSucceeded)?;
        let overall = output.overall_score();
        self.persist(
            run.id,
            RunUpdate {
                status: Some(*status),
                overall_score: Some(overall),
                scorer_output: Some(output),
                scorer_tool_version: Some(SCORER_TOOL_VERSION.to_string()),
                scorer_ai_cache: Some(caches.scorer.clone()),
                ..Default::default()
            },
        )
        .await?;
        tracing::info!(run_id = run.id, overall_score = overall, "Scorer phase complete");
        Ok(())
    }

    async fn fail(
        &self,
        run: &Run,
        status: RunStatus,
        caches: AttemptCaches,
        err: PipelineError,
    ) -> Result<(), PipelineError> {
        let message = err.to_row_message();
        tracing::error!(run_id = run.id, status = %status, error = %message, "Run failed");

        let next = state::transition(status, PhaseOutcome::Failed)?;
        let mut update = RunUpdate::failed(message);
        update.status = Some(next);
        if caches.analyzer != run.analyzer_ai_cache {
            update.analyzer_ai_cache = Some(caches.analyzer);
        }
        if caches.scorer != run.scorer_ai_cache {
            update.scorer_ai_cache = Some(caches.scorer);
        }
        self.persist(run.id, update).await
    }

    /// Process-wide gateway counters, logged once per finished attempt.
    fn log_ai_stats(&self, run_id: i64) {
        let analyzer = self.analyzer.ai_stats();
        let scorer = self.scorer.ai_stats();
        tracing::debug!(
            run_id,
            analyzer_cache_hits = analyzer.cache_hits,
            analyzer_outbound = analyzer.outbound_calls,
            scorer_cache_hits = scorer.cache_hits,
            scorer_outbound = scorer.outbound_calls,
            "AI gateway totals"
        );
    }

    async fn persist(&self, run_id: i64, update: RunUpdate) -> Result<(), PipelineError> {
        self.store
            .update(run_id, update)
            .await
            .map_err(PipelineError::persistence)
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────

/// Why an enqueue request was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueRejection {
    NotFound,
    AlreadyInFlight,
    NotEnqueueable,
    QueueFull,
    ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueueOutcome {
    pub accepted: bool,
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<EnqueueRejection>,
}

impl EnqueueOutcome {
    fn accepted(status: RunStatus) -> Self {
        Self {
            accepted: true,
            status: Some(status),
            reason: None,
        }
    }

    fn rejected(status: Option<RunStatus>, reason: EnqueueRejection) -> Self {
        Self {
            accepted: false,
            status,
            reason: Some(reason),
        }
    }
}

type InFlight = Arc<Mutex<HashSet<i64>>>;

/// Membership in the in-flight set, released on drop.
struct InFlightGuard {
    set: InFlight,
    run_id: i64,
}

impl InFlightGuard {
    /// `None` when the id is already in flight.
    fn acquire(set: &InFlight, run_id: i64) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id);
        inserted.then(|| Self {
            set: Arc::clone(set),
            run_id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.run_id);
    }
}

struct Job {
    run_id: i64,
    _guard: InFlightGuard,
}

/// Fixed pool of worker loops consuming one bounded queue.
pub struct WorkerPool {
    store: Arc<dyn RunStore>,
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    in_flight: InFlight,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `worker_count` loops. Must be called inside a tokio runtime.
    pub fn start(pipeline: Arc<Pipeline>, worker_count: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(worker_loop(worker, rx, pipeline))
            })
            .collect();
        tracing::info!(workers = worker_count.max(1), queue_capacity, "Worker pool started");

        Self {
            store: Arc::clone(pipeline.store()),
            sender: Mutex::new(Some(tx)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            workers: tokio::sync::Mutex::new(workers),
        }
    }

    /// Queue a run if it is `PENDING`/`ERROR` and not already queued or running.
    /// Acceptance clears the run's error message.
    pub async fn enqueue(&self, run_id: i64) -> Result<EnqueueOutcome> {
        let Some(run) = self.store.get(run_id).await? else {
            return Ok(EnqueueOutcome::rejected(None, EnqueueRejection::NotFound));
        };
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, run_id) else {
            return Ok(EnqueueOutcome::rejected(
                Some(run.status),
                EnqueueRejection::AlreadyInFlight,
            ));
        };
        if !run.status.is_enqueueable() {
            return Ok(EnqueueOutcome::rejected(
                Some(run.status),
                EnqueueRejection::NotEnqueueable,
            ));
        }

        let Some(sender) = self.sender() else {
            return Ok(EnqueueOutcome::rejected(
                Some(run.status),
                EnqueueRejection::ShuttingDown,
            ));
        };
        // The slot is reserved first so a rejected run keeps its error message.
        let permit = match sender.try_reserve() {
            Ok(permit) => permit,
            Err(mpsc::error::TrySendError::Full(())) => {
                tracing::warn!(run_id, "Queue full, run not enqueued");
                return Ok(EnqueueOutcome::rejected(
                    Some(run.status),
                    EnqueueRejection::QueueFull,
                ));
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                return Ok(EnqueueOutcome::rejected(
                    Some(run.status),
                    EnqueueRejection::ShuttingDown,
                ));
            }
        };
        if run.error_message.is_some() {
            self.store.update(run_id, RunUpdate::clear_error()).await?;
        }

        permit.send(Job {
            run_id,
            _guard: guard,
        });
        tracing::info!(run_id, status = %run.status, "Run enqueued");
        Ok(EnqueueOutcome::accepted(run.status))
    }

    /// Explicit reset to `PENDING`. Refused while the run is queued or running.
    pub async fn reset(&self, run_id: i64) -> Result<ResetOutcome> {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, run_id) else {
            let status = self
                .store
                .get(run_id)
                .await?
                .map(|r| r.status)
                .unwrap_or(RunStatus::Running);
            return Ok(ResetOutcome::Refused(status));
        };
        let outcome = self.store.reset(run_id).await?;
        if let ResetOutcome::Reset(run) = &outcome {
            tracing::info!(run_id = run.id, "Run reset to PENDING");
        }
        Ok(outcome)
    }

    /// Ids currently queued or being processed, ascending.
    pub fn in_flight(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Close the queue and wait for the worker loops to drain it.
    pub async fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
        tracing::info!("Worker pool stopped");
    }

    fn sender(&self) -> Option<mpsc::Sender<Job>> {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    pipeline: Arc<Pipeline>,
) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            tracing::debug!(worker, "Queue closed, worker exiting");
            return;
        };
        let span = tracing::info_span!("run", run_id = job.run_id, worker);
        if let Err(e) = pipeline.process(job.run_id).instrument(span).await {
            tracing::error!(run_id = job.run_id, error = %e, "Failed to record run outcome");
        }
        drop(job);
    }
}
