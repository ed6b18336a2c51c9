//! Proof Orchestrator
//!
//! Runs a batch of proof jobs against a [`ProverService`] with at most `C` jobs
//! in flight. Jobs are admitted in submission order; each worker holds a
//! semaphore permit for its whole lifetime. Results come back in job order no
//! matter which job finishes first.

use crate::commitment::SubFlag;
use crate::encoder::EncodingError;
use crate::events::{Event, EventType};
use crate::prover::workspace::JobWorkspace;
use crate::prover::{ProofArtifact, ProverError, ProverOutput, ProverService};
use crate::task::{JobState, ProofJob};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Prover(#[from] ProverError),
}

/// Wall-clock time spent in each step of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobTimings {
    pub witness: Option<Duration>,
    pub proof: Option<Duration>,
    pub total: Duration,
}

/// Terminal outcome of one job.
#[derive(Debug)]
pub struct JobReport {
    pub sub_flag_id: u32,
    pub state: JobState,
    pub timings: JobTimings,
    pub result: Result<ProofArtifact, JobError>,
}

impl JobReport {
    fn failed(sub_flag_id: u32, timings: JobTimings, error: JobError) -> Self {
        Self {
            sub_flag_id,
            state: JobState::Failed,
            timings,
            result: Err(error),
        }
    }

    fn succeeded(sub_flag_id: u32, timings: JobTimings, artifact: ProofArtifact) -> Self {
        Self {
            sub_flag_id,
            state: JobState::Succeeded,
            timings,
            result: Ok(artifact),
        }
    }

    pub fn artifact(&self) -> Option<&ProofArtifact> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.result.as_ref().err()
    }
}

#[derive(Debug)]
pub struct BatchReport {
    /// One report per job, in job order.
    pub reports: Vec<JobReport>,
    pub wall_clock: Duration,
    pub peak_active: usize,
    pub concurrency: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.state == JobState::Succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.state == JobState::Failed).count()
    }

    /// Consumes the report, keeping the artifacts of succeeded jobs in job order.
    pub fn into_artifacts(self) -> Vec<ProofArtifact> {
        self.reports.into_iter().filter_map(|r| r.result.ok()).collect()
    }
}

/// Live count of running workers and the highest count seen.
#[derive(Debug, Default)]
struct ActiveSet {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ActiveSet {
    fn enter(self: &Arc<Self>) -> ActiveGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard(self.clone())
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct ActiveGuard(Arc<ActiveSet>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ProofOrchestrator {
    prover: Arc<dyn ProverService>,
    proof_dir: PathBuf,
    max_concurrency: usize,
    events: Option<mpsc::Sender<Event>>,
}

impl ProofOrchestrator {
    /// `max_concurrency` is clamped to at least one.
    pub fn new(prover: Arc<dyn ProverService>, proof_dir: PathBuf, max_concurrency: usize) -> Self {
        Self {
            prover,
            proof_dir,
            max_concurrency: max_concurrency.max(1),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::Sender<Event>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Encodes each sub-flag into a job and runs the batch. Sub-flags that cannot
    /// be encoded are reported as failed without being admitted.
    pub async fn run_sub_flags(
        &self,
        sub_flags: &[SubFlag],
        chunk_count: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> BatchReport {
        let slots = sub_flags
            .iter()
            .map(|sub_flag| {
                ProofJob::prepare(sub_flag, chunk_count).map_err(|e| {
                    warn!("Sub-flag {} cannot be encoded: {}", sub_flag.id(), e);
                    JobReport::failed(sub_flag.id(), JobTimings::default(), e.into())
                })
            })
            .collect();
        self.run_slots(slots, shutdown).await
    }

    pub async fn run(&self, jobs: Vec<ProofJob>, shutdown: broadcast::Receiver<()>) -> BatchReport {
        self.run_slots(jobs.into_iter().map(Ok).collect(), shutdown).await
    }

    async fn run_slots(
        &self,
        slots: Vec<Result<ProofJob, JobReport>>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> BatchReport {
        let started = Instant::now();
        let total = slots.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let active = Arc::new(ActiveSet::default());
        let mut results: Vec<Option<JobReport>> = (0..total).map(|_| None).collect();
        let mut handles: Vec<(usize, u32, JoinHandle<JobReport>)> = Vec::with_capacity(total);
        let mut shutting_down = false;
        let mut shutdown_open = true;

        info!("Proving {} jobs with concurrency {}", total, self.max_concurrency);

        for (index, slot) in slots.into_iter().enumerate() {
            let job = match slot {
                Ok(job) => job,
                Err(report) => {
                    results[index] = Some(report);
                    continue;
                }
            };

            let permit = if shutting_down {
                None
            } else {
                self.admit(&semaphore, &mut shutdown, &mut shutdown_open).await
            };
            let Some(permit) = permit else {
                if !shutting_down {
                    self.emit(Event::prover(
                        index,
                        format!("Shutdown requested, {} jobs not admitted", total - index),
                        EventType::Shutdown,
                    ))
                    .await;
                }
                shutting_down = true;
                debug!("Sub-flag {} cancelled before admission", job.sub_flag_id);
                results[index] = Some(JobReport::failed(
                    job.sub_flag_id,
                    JobTimings::default(),
                    ProverError::Cancelled.into(),
                ));
                continue;
            };

            let sub_flag_id = job.sub_flag_id;
            let handle = self.spawn_worker(index, job, permit, active.clone());
            handles.push((index, sub_flag_id, handle));
        }

        // In-flight jobs always run to completion.
        for (index, sub_flag_id, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => {
                    let message = panic_message(e);
                    warn!("Worker for sub-flag {} panicked: {}", sub_flag_id, message);
                    self.emit(Event::prover(
                        index,
                        format!("Sub-flag {sub_flag_id} failed: worker panicked"),
                        EventType::JobFailed,
                    ))
                    .await;
                    JobReport::failed(
                        sub_flag_id,
                        JobTimings::default(),
                        ProverError::Panicked(message).into(),
                    )
                }
            };
            results[index] = Some(report);
        }

        let reports: Vec<JobReport> = results.into_iter().flatten().collect();
        debug_assert_eq!(reports.len(), total);

        BatchReport {
            reports,
            wall_clock: started.elapsed(),
            peak_active: active.peak(),
            concurrency: self.max_concurrency,
        }
    }

    /// Waits for a free slot. Returns `None` once shutdown has been requested.
    async fn admit(
        &self,
        semaphore: &Arc<Semaphore>,
        shutdown: &mut broadcast::Receiver<()>,
        shutdown_open: &mut bool,
    ) -> Option<OwnedSemaphorePermit> {
        loop {
            tokio::select! {
                biased;
                signal = shutdown.recv(), if *shutdown_open => match signal {
                    Err(broadcast::error::RecvError::Closed) => *shutdown_open = false,
                    _ => {
                        info!("Shutdown requested, no further jobs will be admitted");
                        return None;
                    }
                },
                permit = semaphore.clone().acquire_owned() => return permit.ok(),
            }
        }
    }

    fn spawn_worker(
        &self,
        slot: usize,
        job: ProofJob,
        permit: OwnedSemaphorePermit,
        active: Arc<ActiveSet>,
    ) -> JoinHandle<JobReport> {
        let prover = self.prover.clone();
        let workspace = JobWorkspace::for_job(&self.proof_dir, job.sub_flag_id);
        let events = self.events.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let _active = active.enter();
            if let Some(events) = &events {
                let event = Event::prover(
                    slot,
                    format!("Sub-flag {} started in {}", job.sub_flag_id, workspace.dir().display()),
                    EventType::JobStarted,
                );
                let _ = events.send(event).await;
            }
            let report = prove_job(prover.as_ref(), workspace, job).await;

            if let Some(events) = events {
                let event = match report.error() {
                    None => Event::prover(
                        slot,
                        format!(
                            "Sub-flag {} proved in {:.2}s",
                            report.sub_flag_id,
                            report.timings.total.as_secs_f64()
                        ),
                        EventType::JobSucceeded,
                    ),
                    Some(e) => Event::prover(
                        slot,
                        format!("Sub-flag {} failed: {}", report.sub_flag_id, e),
                        EventType::JobFailed,
                    ),
                };
                let _ = events.send(event).await;
            }
            report
        })
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            let _ = events.send(event).await;
        }
    }
}

async fn prove_job(prover: &dyn ProverService, workspace: JobWorkspace, mut job: ProofJob) -> JobReport {
    job.state = JobState::Running;
    debug!("Proving {}", job);
    let started = Instant::now();
    let mut timings = JobTimings::default();

    let result = run_steps(prover, &workspace, &job, &mut timings).await;
    timings.total = started.elapsed();

    match result {
        Ok(output) => {
            job.state = JobState::Succeeded;
            JobReport::succeeded(
                job.sub_flag_id,
                timings,
                ProofArtifact::new(job.sub_flag_id, output, timings.total),
            )
        }
        Err(e) => {
            job.state = JobState::Failed;
            warn!("Sub-flag {} failed: {}", job.sub_flag_id, e);
            JobReport::failed(job.sub_flag_id, timings, e.into())
        }
    }
}

async fn run_steps(
    prover: &dyn ProverService,
    workspace: &JobWorkspace,
    job: &ProofJob,
    timings: &mut JobTimings,
) -> Result<ProverOutput, ProverError> {
    workspace.write_input(&job.circuit_input()).await?;

    let step = Instant::now();
    prover.compute_witness(workspace).await?;
    timings.witness = Some(step.elapsed());

    let step = Instant::now();
    let output = prover.generate_proof(workspace).await?;
    timings.proof = Some(step.elapsed());
    Ok(output)
}

fn panic_message(error: tokio::task::JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(message) = payload.downcast_ref::<&str>() {
                message.to_string()
            } else if let Some(message) = payload.downcast_ref::<String>() {
                message.clone()
            } else {
                "unknown panic".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}
