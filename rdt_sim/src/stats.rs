//! Per-run reports and the stats context that collects them.
//!
//! Endpoints only keep raw counters. Everything derived (throughput, goodput,
//! retransmission ratio) is computed here once a run is over, and the result
//! is handed to whoever owns the [`StatsContext`]. Nothing here is global.

use serde::Serialize;

/// Outcome of a single simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Scenario or sweep point name
    pub label: String,

    pub seed: u64,

    /// Sender reached its terminal state
    pub completed: bool,

    // Sender counters
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub bytes_sent: u64,
    pub acks_received: u64,
    pub lost_packets: u64,
    pub simulated_loss_events: u64,

    // Receiver counters
    pub packets_received: u64,
    pub bytes_received: u64,
    pub out_of_order: u64,

    /// Datagrams the channel lost, random and forced, both directions
    pub channel_drops: u64,

    /// Data datagrams handed to the running receiver, duplicates included
    pub delay_samples: u64,

    /// Mean one-way delay (propagation plus serialization) of those datagrams
    pub mean_delay_ms: f64,

    /// Sender start to completion, or to the end of the run if unfinished.
    ///
    /// Ends at the last ACK, not at the sender's stop time.
    pub transfer_time_secs: f64,

    /// Sent bytes (headers included) over transfer time
    pub throughput_mbps: f64,

    /// Received payload bytes over transfer time
    pub goodput_mbps: f64,

    /// Retransmissions as a share of packets sent
    pub retransmission_ratio_pct: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_cwnd: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_ssthresh: Option<u32>,

    /// Virtual time when the run ended
    pub sim_time_secs: f64,

    /// Scheduler events executed
    pub events_fired: u64,
}

impl RunReport {
    /// Recomputes the derived metrics from the raw counters.
    pub fn derive_rates(&mut self) {
        self.throughput_mbps = mbps(self.bytes_sent, self.transfer_time_secs);
        self.goodput_mbps = mbps(self.bytes_received, self.transfer_time_secs);
        self.retransmission_ratio_pct = if self.packets_sent > 0 {
            self.retransmissions as f64 * 100.0 / self.packets_sent as f64
        } else {
            0.0
        };
    }
}

/// Megabits per second; zero for an empty interval.
pub fn mbps(bytes: u64, secs: f64) -> f64 {
    if secs > 0.0 {
        bytes as f64 * 8.0 / secs / 1_000_000.0
    } else {
        0.0
    }
}

/// Aggregates across every run in a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsTotals {
    pub runs: usize,
    pub completed: usize,
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub mean_throughput_mbps: f64,

    /// Averaged over runs that delivered at least one data datagram
    pub mean_delay_ms: f64,
}

/// Reports collected across runs, owned by the orchestrator.
///
/// Passed into `SimWorld::run` and handed back with the new report appended.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsContext {
    runs: Vec<RunReport>,
}

impl StatsContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: RunReport) {
        self.runs.push(report);
    }

    pub fn runs(&self) -> &[RunReport] {
        &self.runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Latest report, if any.
    pub fn last(&self) -> Option<&RunReport> {
        self.runs.last()
    }

    /// Moves every report of `other` into this context.
    pub fn merge(&mut self, other: StatsContext) {
        self.runs.extend(other.runs);
    }

    pub fn totals(&self) -> StatsTotals {
        let mut delayed_runs = 0usize;
        let mut totals = self.runs.iter().fold(StatsTotals::default(), |mut t, r| {
            t.runs += 1;
            t.completed += usize::from(r.completed);
            t.packets_sent += r.packets_sent;
            t.retransmissions += r.retransmissions;
            t.bytes_sent += r.bytes_sent;
            t.packets_received += r.packets_received;
            t.bytes_received += r.bytes_received;
            t.mean_throughput_mbps += r.throughput_mbps;
            if r.delay_samples > 0 {
                delayed_runs += 1;
                t.mean_delay_ms += r.mean_delay_ms;
            }
            t
        });
        if totals.runs > 0 {
            totals.mean_throughput_mbps /= totals.runs as f64;
        }
        if delayed_runs > 0 {
            totals.mean_delay_ms /= delayed_runs as f64;
        }
        totals
    }
}

#[cfg(test)]
pub(crate) fn sample_report(label: &str) -> RunReport {
    let mut report = RunReport {
        label: label.to_string(),
        seed: 42,
        completed: true,
        packets_sent: 55,
        retransmissions: 5,
        bytes_sent: 55 * 1033,
        acks_received: 50,
        lost_packets: 0,
        simulated_loss_events: 0,
        packets_received: 50,
        bytes_received: 50 * 1024,
        out_of_order: 1,
        channel_drops: 5,
        delay_samples: 55,
        mean_delay_ms: 3.5,
        transfer_time_secs: 10.0,
        throughput_mbps: 0.0,
        goodput_mbps: 0.0,
        retransmission_ratio_pct: 0.0,
        final_cwnd: None,
        final_ssthresh: None,
        sim_time_secs: 30.0,
        events_fired: 300,
    };
    report.derive_rates();
    report
}
