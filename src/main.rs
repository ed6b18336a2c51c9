mod commitment;
mod config;
mod consts;
mod encoder;
mod events;
mod field;
mod metrics;
mod prover;
mod prover_runtime;
mod submission;
pub mod system;
mod task;
mod verifier;

use crate::commitment::CommitmentStore;
use crate::config::{get_config_path, Config, ProverBackend};
use crate::consts::commitment::{SUB_FLAG_PREFIX, SUB_FLAG_RANDOM_BYTES};
use crate::consts::prover::EVENT_QUEUE_SIZE;
use crate::consts::submission::DEFAULT_START_NONCE;
use crate::encoder::max_secret_len;
use crate::events::{Event, EventTally};
use crate::metrics::{record_table, summarize_proofs, summarize_submissions, BenchmarkSummary, SystemInfo};
use crate::prover::remote::RemoteProver;
use crate::prover::snarkjs::SnarkjsProver;
use crate::prover::workspace::discover;
use crate::prover::{ProofArtifact, ProofScheme, ProverService};
use crate::prover_runtime::{BatchReport, ProofOrchestrator};
use crate::submission::{SubmissionClient, SubmissionRecord};
use crate::verifier::client::VerifierClient;
use clap::{ArgAction, Parser, Subcommand};
use log::{debug, info, warn};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
/// Commit-reveal sub-flag proving pipeline
struct Args {
    /// Config file (default: ./subflag.config.json, then ~/.subflag/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging and per-attempt record table
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate sub-flags and publish their commitments
    Commit {
        /// Number of sub-flags
        #[arg(long, value_name = "N")]
        count: Option<usize>,

        /// Organizer artifact, secrets included
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,

        /// Publishable artifact without secrets
        #[arg(long, value_name = "PATH")]
        public_out: Option<PathBuf>,
    },
    /// Generate a proof for every known sub-flag
    Prove {
        #[command(flatten)]
        prove: ProveArgs,

        /// Write the summary as JSON
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,
    },
    /// Submit previously generated proofs to the verifier
    Submit {
        #[command(flatten)]
        submit: SubmitArgs,

        /// Directory holding proof_<id> job directories
        #[arg(long, value_name = "DIR")]
        proof_dir: Option<PathBuf>,

        /// Write the summary as JSON
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,
    },
    /// Write the effective configuration to a file
    InitConfig {
        /// Destination (default: ./subflag.config.json if present, else ~/.subflag/config.json)
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Prove, then submit every successful proof
    Run {
        #[command(flatten)]
        prove: ProveArgs,

        #[command(flatten)]
        submit: SubmitArgs,

        /// Write the summary as JSON
        #[arg(long, value_name = "PATH")]
        json: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct ProveArgs {
    /// Commitment artifact
    #[arg(long, value_name = "PATH")]
    artifact: Option<PathBuf>,

    /// Participant solutions file: [{ "id": 0, "flag": "CTF-..." }]
    #[arg(long, value_name = "PATH")]
    solutions: Option<PathBuf>,

    /// Where proof_<id> job directories are written
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Maximum proofs in flight
    #[arg(long, value_name = "C")]
    concurrency: Option<usize>,

    /// Chunks per sub-flag
    #[arg(long, value_name = "K")]
    chunks: Option<usize>,

    #[arg(long, value_enum)]
    backend: Option<ProverBackend>,

    #[arg(long, value_enum)]
    scheme: Option<ProofScheme>,
}

#[derive(clap::Args)]
struct SubmitArgs {
    /// First nonce to use
    #[arg(long, value_name = "NONCE", default_value_t = DEFAULT_START_NONCE)]
    start_nonce: u64,

    /// Submit back-to-back instead of throttled
    #[arg(long, action = ArgAction::SetTrue)]
    parallel: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = Config::resolve(args.config.as_deref())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.debug |= args.debug;

    let level = if config.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.command {
        Command::Commit {
            count,
            out,
            public_out,
        } => {
            if let Some(count) = count {
                config.sub_flag_count = count;
            }
            if let Some(out) = out {
                config.artifact_path = out;
            }
            config.validate()?;
            let public_out = public_out.unwrap_or_else(|| config.public_artifact_path());
            commit(&config, &public_out)
        }
        Command::Prove { prove, json } => {
            prove.apply(&mut config);
            config.validate()?;
            let (batch, _) = run_prover(&config, &prove).await?;
            let summary = benchmark(&config, Some(&batch), None);
            report(&summary, json.as_deref())
        }
        Command::Submit {
            submit,
            proof_dir,
            json,
        } => {
            if let Some(dir) = proof_dir {
                config.proof_dir = dir;
            }
            submit.apply(&mut config);
            config.validate()?;
            let artifacts = load_artifacts(&config.proof_dir)?;
            let records = run_submissions(&config, artifacts, submit.start_nonce).await?;
            let summary = benchmark(&config, None, Some(&records));
            report(&summary, json.as_deref())
        }
        Command::InitConfig { out } => {
            config.validate()?;
            let path = match out {
                Some(path) => path,
                None => get_config_path()?,
            };
            config.save(&path)?;
            println!("Configuration written to {}", path.display());
            Ok(())
        }
        Command::Run { prove, submit, json } => {
            prove.apply(&mut config);
            submit.apply(&mut config);
            config.validate()?;
            let (batch, interrupted) = run_prover(&config, &prove).await?;
            let proving = summarize_proofs(&batch);
            let records = if interrupted {
                warn!("Interrupted, skipping submission");
                Vec::new()
            } else {
                run_submissions(&config, batch.into_artifacts(), submit.start_nonce).await?
            };
            let mut summary = benchmark(&config, None, Some(&records));
            summary.proving = Some(proving);
            report(&summary, json.as_deref())
        }
    }
}

impl ProveArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(artifact) = &self.artifact {
            config.artifact_path = artifact.clone();
        }
        if let Some(dir) = &self.out_dir {
            config.proof_dir = dir.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(chunks) = self.chunks {
            config.num_chunks = chunks;
        }
        if let Some(backend) = self.backend {
            config.prover.backend = backend;
        }
        if let Some(scheme) = self.scheme {
            config.prover.scheme = scheme;
        }
    }
}

impl SubmitArgs {
    fn apply(&self, config: &mut Config) {
        config.parallel |= self.parallel;
    }
}

fn commit(config: &Config, public_out: &Path) -> Result<(), Box<dyn Error>> {
    println!(
        "Generating {} sub-flags with keccak256 hashing...",
        config.sub_flag_count
    );
    let started = Instant::now();
    let generated_len = SUB_FLAG_PREFIX.len() + 2 * SUB_FLAG_RANDOM_BYTES;
    if generated_len > max_secret_len(config.num_chunks) {
        warn!(
            "Sub-flags of {} bytes do not fit {} chunks; proving them will fail",
            generated_len, config.num_chunks
        );
    }
    let store = CommitmentStore::generate(config.sub_flag_count, &config.master_key);
    let elapsed = started.elapsed();

    store.save(&config.artifact_path, true)?;
    store.save(public_out, false)?;

    let ms = elapsed.as_secs_f64() * 1000.0;
    println!("Processed {} sub-flags in {:.2}ms", store.len(), ms);
    if !store.is_empty() {
        println!("Avg time per sub-flag: {:.4}ms", ms / store.len() as f64);
    }
    for (id, commitment) in store.commitments().iter().enumerate() {
        println!("  [{id}] {commitment}");
    }
    println!("Master key commitment: {}", store.master_key_commitment());
    println!("Organizer artifact: {}", config.artifact_path.display());
    println!("Public artifact:    {}", public_out.display());
    Ok(())
}

fn build_prover(config: &Config) -> Arc<dyn ProverService> {
    let prover = &config.prover;
    let timeout = Duration::from_secs(prover.timeout_secs);
    match prover.backend {
        ProverBackend::Snarkjs => Arc::new(SnarkjsProver::new(
            prover.snarkjs_bin.clone(),
            prover.circuit_wasm.clone(),
            prover.proving_key.clone(),
            prover.scheme,
            timeout,
        )),
        ProverBackend::Remote => Arc::new(RemoteProver::new(
            prover.remote_url.clone(),
            prover.remote_auth_token.clone(),
            prover.scheme,
            Duration::from_millis(prover.poll_interval_ms),
            timeout,
        )),
    }
}

/// Logs events until every sender is gone, then reports the tally.
fn spawn_event_logger(mut events: mpsc::Receiver<Event>) -> JoinHandle<EventTally> {
    tokio::spawn(async move {
        let mut tally = EventTally::default();
        while let Some(event) = events.recv().await {
            tally.record(&event);
            event.log();
        }
        debug!(
            "Events: {} succeeded, {} failed{}",
            tally.succeeded,
            tally.failed,
            if tally.shutdown { ", shutdown requested" } else { "" }
        );
        tally
    })
}

/// Runs the orchestrator over the artifact's sub-flags. Returns the batch and
/// whether it was interrupted by Ctrl+C.
async fn run_prover(config: &Config, args: &ProveArgs) -> Result<(BatchReport, bool), Box<dyn Error>> {
    let mut store = CommitmentStore::load(&config.artifact_path)?;
    if let Some(solutions) = &args.solutions {
        let solved = store.load_solutions(solutions)?;
        info!("Loaded {} solutions from {}", solved, solutions.display());
    }
    if store.sub_flags().is_empty() {
        return Err(format!(
            "{} carries no secrets; pass --solutions",
            config.artifact_path.display()
        )
        .into());
    }
    std::fs::create_dir_all(&config.proof_dir)
        .map_err(|e| format!("cannot create {}: {}", config.proof_dir.display(), e))?;

    // Trigger shutdown on Ctrl+C
    let (shutdown_sender, shutdown_receiver) = broadcast::channel::<()>(1);
    let mut interrupted = shutdown_sender.subscribe();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, finishing in-flight proofs");
            let _ = shutdown_sender.send(());
        }
    });

    let (event_sender, event_receiver) = mpsc::channel::<Event>(EVENT_QUEUE_SIZE);
    let logger = spawn_event_logger(event_receiver);

    let orchestrator = ProofOrchestrator::new(build_prover(config), config.proof_dir.clone(), config.max_concurrency)
        .with_events(event_sender);
    let batch = orchestrator
        .run_sub_flags(store.sub_flags(), config.num_chunks, shutdown_receiver)
        .await;

    drop(orchestrator);
    ctrl_c.abort();
    let _ = logger.await;

    Ok((batch, interrupted.try_recv().is_ok()))
}

fn load_artifacts(proof_dir: &Path) -> Result<Vec<ProofArtifact>, Box<dyn Error>> {
    let workspaces = discover(proof_dir)?;
    if workspaces.is_empty() {
        return Err(format!("no proofs found in {}", proof_dir.display()).into());
    }
    let mut artifacts = Vec::with_capacity(workspaces.len());
    for workspace in workspaces {
        artifacts.push(workspace.load_artifact()?);
    }
    Ok(artifacts)
}

async fn run_submissions(
    config: &Config,
    artifacts: Vec<ProofArtifact>,
    start_nonce: u64,
) -> Result<Vec<SubmissionRecord>, Box<dyn Error>> {
    let verifier = VerifierClient::new(
        &config.verifier_url,
        config.scoreboard_address.clone(),
        config.network.clone(),
        Duration::from_secs(config.submit_timeout_secs),
    )?;

    let (event_sender, event_receiver) = mpsc::channel::<Event>(EVENT_QUEUE_SIZE);
    let logger = spawn_event_logger(event_receiver);

    let mut client =
        SubmissionClient::new(Arc::new(verifier), config.submission_options()).with_events(event_sender);
    client.submit_batch(artifacts, start_nonce, config.parallel).await;
    if config.debug && !client.records().is_empty() {
        println!("{}", record_table(client.records()));
    }
    let records = client.into_records();
    let _ = logger.await;
    Ok(records)
}

fn benchmark(
    config: &Config,
    batch: Option<&BatchReport>,
    records: Option<&[SubmissionRecord]>,
) -> BenchmarkSummary {
    let (process_memory_mb, total_memory_mb) = system::get_memory_info();
    BenchmarkSummary {
        network: config.network.clone(),
        proving: batch.map(summarize_proofs),
        submission: records.map(summarize_submissions),
        system: SystemInfo {
            cpu_cores: system::num_cores(),
            process_memory_mb,
            total_memory_mb,
        },
    }
}

fn report(summary: &BenchmarkSummary, json: Option<&Path>) -> Result<(), Box<dyn Error>> {
    println!("{summary}");
    if let Some(path) = json {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(summary)?)?;
        info!("Summary written to {}", path.display());
    }
    Ok(())
}
