//! Per-operation outcome tallies for a simulation run.

use std::collections::BTreeMap;
use std::time::Duration;

/// Latency samples kept per operation kind before thinning.
const LATENCY_SAMPLE_LIMIT: usize = 4096;

/// Ledger entry points the simulator exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Deposit,
    Withdraw,
    DirectTransfer,
}

impl OperationKind {
    pub fn label(&self) -> &'static str {
        match self {
            OperationKind::Deposit => "deposit",
            OperationKind::Withdraw => "withdraw",
            OperationKind::DirectTransfer => "direct_transfer",
        }
    }
}

/// Outcomes of one operation kind.
#[derive(Debug, Clone, Default)]
pub struct OperationTally {
    pub succeeded: u64,
    /// Failures keyed by `VaultError::error_code`.
    pub failed: BTreeMap<&'static str, u64>,
    latencies_us: Vec<u64>,
}

impl OperationTally {
    pub fn failed_total(&self) -> u64 {
        self.failed.values().sum()
    }

    pub fn attempted(&self) -> u64 {
        self.succeeded + self.failed_total()
    }

    fn add_latency(&mut self, micros: u64) {
        if self.latencies_us.len() >= LATENCY_SAMPLE_LIMIT {
            // Halve the reservoir, keeping an even spread over the run
            let mut keep = false;
            self.latencies_us.retain(|_| {
                keep = !keep;
                keep
            });
        }
        self.latencies_us.push(micros);
    }

    fn absorb(&mut self, other: OperationTally) {
        self.succeeded += other.succeeded;
        for (code, count) in other.failed {
            *self.failed.entry(code).or_default() += count;
        }
        for micros in other.latencies_us {
            self.add_latency(micros);
        }
    }
}

/// Simulation metrics, merged from every workload task.
#[derive(Debug, Clone, Default)]
pub struct SimulationMetrics {
    tallies: BTreeMap<OperationKind, OperationTally>,
}

impl SimulationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, kind: OperationKind, latency: Duration) {
        let tally = self.tallies.entry(kind).or_default();
        tally.succeeded += 1;
        tally.add_latency(u64::try_from(latency.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn record_failure(&mut self, kind: OperationKind, code: &'static str) {
        *self
            .tallies
            .entry(kind)
            .or_default()
            .failed
            .entry(code)
            .or_default() += 1;
    }

    /// Tallies per operation kind, in a stable order.
    pub fn tallies(&self) -> impl Iterator<Item = (OperationKind, &OperationTally)> {
        self.tallies.iter().map(|(kind, tally)| (*kind, tally))
    }

    pub fn total_operations(&self) -> u64 {
        self.tallies.values().map(OperationTally::attempted).sum()
    }

    pub fn successful_operations(&self) -> u64 {
        self.tallies.values().map(|t| t.succeeded).sum()
    }

    /// Failure counts per error code across all operation kinds.
    pub fn failures_by_code(&self) -> BTreeMap<&'static str, u64> {
        let mut codes = BTreeMap::new();
        for tally in self.tallies.values() {
            for (code, count) in &tally.failed {
                *codes.entry(*code).or_default() += count;
            }
        }
        codes
    }

    pub fn success_rate(&self) -> f64 {
        match self.total_operations() {
            0 => 0.0,
            total => self.successful_operations() as f64 / total as f64,
        }
    }

    /// Nearest-rank latency percentile over successful operations.
    pub fn latency_percentile_us(&self, percentile: f64) -> Option<u64> {
        let mut samples: Vec<u64> = self
            .tallies
            .values()
            .flat_map(|t| t.latencies_us.iter().copied())
            .collect();
        if samples.is_empty() {
            return None;
        }
        samples.sort_unstable();

        let rank = ((percentile.clamp(0.0, 100.0) / 100.0) * samples.len() as f64).ceil() as usize;
        Some(samples[rank.clamp(1, samples.len()) - 1])
    }

    pub fn merge(&mut self, other: SimulationMetrics) {
        for (kind, tally) in other.tallies {
            self.tallies.entry(kind).or_default().absorb(tally);
        }
    }
}
