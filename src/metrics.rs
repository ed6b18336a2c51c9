//! Metrics Aggregator
//!
//! Pure summaries over the submission log and a proving batch. Nothing here is
//! stored: the same inputs always produce the same summary.

use crate::prover_runtime::BatchReport;
use crate::submission::SubmissionRecord;
use crate::task::JobState;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub attempts: usize,
    pub successes: usize,
    pub failures: usize,
    /// Fraction in `0..=1`.
    pub success_rate: Option<f64>,
    pub total_gas: u64,
    pub avg_gas: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub elapsed_ms: f64,
    /// Successful submissions per second.
    pub throughput: Option<f64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProofSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub avg_witness_ms: Option<f64>,
    pub avg_proof_ms: Option<f64>,
    pub avg_job_ms: Option<f64>,
    pub wall_clock_ms: f64,
    pub proofs_per_sec: Option<f64>,
    pub concurrency: usize,
    pub peak_active: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub cpu_cores: usize,
    pub process_memory_mb: Option<u64>,
    pub total_memory_mb: u64,
}

/// Everything printed at the end of a CLI run.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkSummary {
    pub network: String,
    pub proving: Option<ProofSummary>,
    pub submission: Option<SubmissionSummary>,
    pub system: SystemInfo,
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn per_second(count: usize, elapsed_ms: f64) -> Option<f64> {
    (elapsed_ms > 0.0).then(|| count as f64 / (elapsed_ms / 1000.0))
}

pub fn summarize_submissions(records: &[SubmissionRecord]) -> SubmissionSummary {
    let successes: Vec<&SubmissionRecord> = records.iter().filter(|r| r.is_success()).collect();
    let attempts = records.len();

    // Wall clock from the first start to the last completion.
    let first_start = records.iter().map(|r| r.started_at_ms).reduce(f64::min);
    let last_end = records
        .iter()
        .map(|r| r.started_at_ms + r.duration_ms)
        .reduce(f64::max);
    let elapsed_ms = match (first_start, last_end) {
        (Some(start), Some(end)) => (end - start).max(0.0),
        _ => 0.0,
    };

    let total_gas = successes.iter().filter_map(|r| r.gas_used).sum();

    SubmissionSummary {
        attempts,
        successes: successes.len(),
        failures: attempts - successes.len(),
        success_rate: (attempts > 0).then(|| successes.len() as f64 / attempts as f64),
        total_gas,
        avg_gas: (!successes.is_empty()).then(|| total_gas as f64 / successes.len() as f64),
        avg_latency_ms: mean(successes.iter().map(|r| r.duration_ms)),
        elapsed_ms,
        throughput: per_second(successes.len(), elapsed_ms),
    }
}

pub fn summarize_proofs(batch: &BatchReport) -> ProofSummary {
    let succeeded: Vec<_> = batch
        .reports
        .iter()
        .filter(|r| r.state == JobState::Succeeded)
        .collect();
    let wall_clock_ms = ms(batch.wall_clock);

    ProofSummary {
        total: batch.reports.len(),
        succeeded: batch.succeeded(),
        failed: batch.failed(),
        avg_witness_ms: mean(succeeded.iter().filter_map(|r| r.timings.witness).map(ms)),
        avg_proof_ms: mean(succeeded.iter().filter_map(|r| r.timings.proof).map(ms)),
        avg_job_ms: mean(
            succeeded
                .iter()
                .filter_map(|r| r.artifact())
                .map(|a| ms(a.generation_duration())),
        ),
        wall_clock_ms,
        proofs_per_sec: per_second(succeeded.len(), wall_clock_ms),
        concurrency: batch.concurrency,
        peak_active: batch.peak_active,
    }
}

struct Opt<'a>(&'a Option<f64>, usize, &'a str);

impl Display for Opt<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(v) => write!(f, "{:.*}{}", self.1, v, self.2),
            None => f.write_str("n/a"),
        }
    }
}

impl Display for ProofSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "  Proofs:           {} ({} ok, {} failed)", self.total, self.succeeded, self.failed)?;
        writeln!(f, "  Concurrency:      {} (peak {})", self.concurrency, self.peak_active)?;
        writeln!(f, "  Total time:       {:.2}ms", self.wall_clock_ms)?;
        writeln!(f, "  Avg time/proof:   {}", Opt(&self.avg_job_ms, 2, "ms"))?;
        writeln!(f, "  - Witness:        {}", Opt(&self.avg_witness_ms, 2, "ms"))?;
        writeln!(f, "  - Proving:        {}", Opt(&self.avg_proof_ms, 2, "ms"))?;
        writeln!(f, "  Throughput:       {}", Opt(&self.proofs_per_sec, 2, " proofs/s"))
    }
}

impl Display for SubmissionSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rate = self.success_rate.map(|r| r * 100.0);
        writeln!(f, "  Proofs Attempted: {}", self.attempts)?;
        writeln!(f, "  Success Rate:     {}", Opt(&rate, 2, "%"))?;
        writeln!(f)?;
        writeln!(f, "  Gas Usage:")?;
        writeln!(f, "  - Total Gas:      {}", self.total_gas)?;
        writeln!(f, "  - Avg per Proof:  {}", Opt(&self.avg_gas, 0, " gas"))?;
        writeln!(f)?;
        writeln!(f, "  Timing:")?;
        writeln!(f, "  - Total Time:     {:.2}ms", self.elapsed_ms)?;
        writeln!(f, "  - Avg per Proof:  {}", Opt(&self.avg_latency_ms, 2, "ms"))?;
        writeln!(f, "  - Throughput:     {}", Opt(&self.throughput, 2, " TPS"))
    }
}

impl Display for BenchmarkSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "================ Sub-Flag Benchmark ================")?;
        writeln!(f, "  Network:          {}", self.network.to_uppercase())?;
        writeln!(f, "  CPU cores:        {}", self.system.cpu_cores)?;
        match self.system.process_memory_mb {
            Some(mb) => writeln!(f, "  Memory usage:     {}MB / {}MB", mb, self.system.total_memory_mb)?,
            None => writeln!(f, "  Memory usage:     n/a")?,
        }
        if let Some(proving) = &self.proving {
            writeln!(f)?;
            writeln!(f, "Proof Generation:")?;
            write!(f, "{proving}")?;
        }
        if let Some(submission) = &self.submission {
            writeln!(f)?;
            writeln!(f, "Proof Submission:")?;
            write!(f, "{submission}")?;
        }
        write!(f, "====================================================")
    }
}

/// One line per attempt, for debug output.
pub fn record_table(records: &[SubmissionRecord]) -> String {
    let mut table = format!(
        "{:>6} {:>8} {:>7} {:>8} {:>10} {:>10}  {}\n",
        "nonce", "subFlag", "attempt", "status", "gas", "ms", "error"
    );
    for r in records {
        table.push_str(&format!(
            "{:>6} {:>8} {:>7} {:>8} {:>10} {:>10.2}  {}\n",
            r.nonce,
            r.sub_flag_id,
            r.attempt,
            format!("{:?}", r.status),
            r.gas_used.map(|g| g.to_string()).unwrap_or_else(|| "-".into()),
            r.duration_ms,
            r.error.as_deref().unwrap_or("")
        ));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldElement;
    use crate::prover::{ProofArtifact, ProverError, ProverOutput};
    use crate::prover_runtime::{JobReport, JobTimings};
    use crate::submission::SubmissionStatus;

    fn record(nonce: u64, started_at_ms: f64, duration_ms: f64, gas_used: Option<u64>) -> SubmissionRecord {
        SubmissionRecord {
            nonce,
            sub_flag_id: nonce as u32,
            attempt: 1,
            gas_used,
            duration_ms,
            started_at_ms,
            status: if gas_used.is_some() {
                SubmissionStatus::Success
            } else {
                SubmissionStatus::Failed
            },
            error: gas_used.is_none().then(|| "rejected".to_string()),
            tx_hash: None,
            timestamp: "2026-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn two_of_three_succeed() {
        let records = vec![
            record(1, 0.0, 100.0, Some(300)),
            record(2, 200.0, 100.0, None),
            record(3, 400.0, 100.0, Some(500)),
        ];
        let summary = summarize_submissions(&records);

        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.failures, 1);
        assert!((summary.success_rate.unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.total_gas, 800);
        assert_eq!(summary.avg_gas, Some(400.0));
        assert_eq!(summary.avg_latency_ms, Some(100.0));
        assert_eq!(summary.elapsed_ms, 500.0);
        assert_eq!(summary.throughput, Some(4.0));
        assert!(summary.to_string().contains("66.67%"));
    }

    #[test]
    fn summary_is_idempotent() {
        let records = vec![record(1, 0.0, 12.5, Some(21000)), record(2, 20.0, 7.0, None)];
        assert_eq!(summarize_submissions(&records), summarize_submissions(&records));
    }

    #[test]
    fn zero_attempts_has_no_rates() {
        let summary = summarize_submissions(&[]);
        assert_eq!(summary.attempts, 0);
        assert_eq!(summary.success_rate, None);
        assert_eq!(summary.avg_gas, None);
        assert_eq!(summary.throughput, None);
        assert_eq!(summary.elapsed_ms, 0.0);
        assert!(summary.to_string().contains("n/a"));
    }

    #[test]
    fn all_failed_has_zero_rate_but_no_averages() {
        let summary = summarize_submissions(&[record(1, 0.0, 5.0, None)]);
        assert_eq!(summary.success_rate, Some(0.0));
        assert_eq!(summary.avg_latency_ms, None);
        assert_eq!(summary.throughput, Some(0.0));
    }

    fn batch() -> BatchReport {
        let ok = |id: u32, witness: u64, proof: u64| JobReport {
            sub_flag_id: id,
            state: JobState::Succeeded,
            timings: JobTimings {
                witness: Some(Duration::from_millis(witness)),
                proof: Some(Duration::from_millis(proof)),
                total: Duration::from_millis(witness + proof),
            },
            result: Ok(ProofArtifact::new(
                id,
                ProverOutput {
                    proof: serde_json::json!({}),
                    public_signals: vec![FieldElement::from_u64(1)],
                },
                Duration::from_millis(witness + proof),
            )),
        };
        BatchReport {
            reports: vec![
                ok(0, 100, 300),
                JobReport {
                    sub_flag_id: 1,
                    state: JobState::Failed,
                    timings: JobTimings::default(),
                    result: Err(ProverError::Cancelled.into()),
                },
                ok(2, 200, 500),
            ],
            wall_clock: Duration::from_secs(2),
            peak_active: 2,
            concurrency: 2,
        }
    }

    #[test]
    fn proof_summary_averages_successful_jobs() {
        let summary = summarize_proofs(&batch());
        assert_eq!(summary.total, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.avg_witness_ms, Some(150.0));
        assert_eq!(summary.avg_proof_ms, Some(400.0));
        assert_eq!(summary.avg_job_ms, Some(550.0));
        assert_eq!(summary.proofs_per_sec, Some(1.0));
        assert_eq!(summary.peak_active, 2);
    }

    #[test]
    fn benchmark_summary_renders_and_serializes() {
        let summary = BenchmarkSummary {
            network: "localhost".into(),
            proving: Some(summarize_proofs(&batch())),
            submission: None,
            system: SystemInfo {
                cpu_cores: 8,
                process_memory_mb: Some(42),
                total_memory_mb: 16384,
            },
        };
        let text = summary.to_string();
        assert!(text.contains("LOCALHOST"));
        assert!(text.contains("Proof Generation:"));
        assert!(!text.contains("Proof Submission:"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["proving"]["peakActive"], 2);
        assert_eq!(json["system"]["cpuCores"], 8);
        assert!(json["submission"].is_null());
    }

    #[test]
    fn record_table_has_a_row_per_attempt() {
        let table = record_table(&[record(1, 0.0, 1.0, Some(7)), record(2, 2.0, 1.0, None)]);
        assert_eq!(table.lines().count(), 3);
        assert!(table.contains("rejected"));
    }
}
