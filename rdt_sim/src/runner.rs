//! Scenario runner - executes preset scenarios and parameter sweeps.

use crate::config::SimConfig;
use crate::scenarios::ScenarioId;
use crate::stats::{RunReport, StatsContext};
use crate::trace::TraceRecord;
use crate::world::SimWorld;

use rdt_env::RdtError;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Counters and derived metrics; `None` if the world could not be built
    pub report: Option<RunReport>,

    /// Packet trace, when tracing was requested
    pub trace: Vec<TraceRecord>,
}

impl ScenarioResult {
    fn setup_failure(scenario: ScenarioId, seed: u64, err: RdtError) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            final_time_secs: 0.0,
            failure_reason: Some(err.to_string()),
            report: None,
            trace: Vec::new(),
        }
    }
}

/// Runs preset scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Overrides each preset's simulation time
    duration_secs: Option<f64>,

    /// Keep a packet trace
    trace: bool,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration_secs: None,
            trace: false,
        }
    }

    /// Sets the simulation time for every scenario.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Records a packet trace in each result.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Effective configuration for `scenario`.
    pub fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        let mut config = scenario.config(self.seed).with_trace(self.trace);
        if let Some(secs) = self.duration_secs {
            config.simulation_time = secs;
        }
        config
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut world = match SimWorld::new(self.config_for(scenario)) {
            Ok(world) => world.with_label(scenario.name()),
            Err(e) => {
                warn!(scenario = scenario.name(), error = %e, "Scenario setup failed");
                return ScenarioResult::setup_failure(scenario, self.seed, e);
            }
        };

        if scenario == ScenarioId::AckLoss {
            let (tx, rx) = (world.sender_id(), world.receiver_id());
            world.network().force_drop(rx, tx, 1);
        }

        let fired = world.run_to_end();
        debug!(fired, "Scenario events executed");

        let verdict = check_scenario(scenario, &world);
        let report = world.report();

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: verdict.is_ok(),
            final_time_secs: world.now().as_secs_f64(),
            failure_reason: verdict.err(),
            report: Some(report),
            trace: world.trace().to_vec(),
        }
    }
}

/// Assertions every run must satisfy, plus the scenario's own expectations.
fn check_scenario(scenario: ScenarioId, world: &SimWorld) -> Result<(), String> {
    for id in [world.sender_id(), world.receiver_id()] {
        if let Some(e) = world.node_failure(id) {
            return Err(format!("node {id} failed to start: {e}"));
        }
    }

    let max_packets = u64::from(world.config().max_packets);
    let sender = world.sender();
    let tx = sender.counters();
    let rx = world.receiver().state();

    if rx.packets_accepted > max_packets {
        return Err(format!(
            "receiver accepted {} packets, only {} were sent",
            rx.packets_accepted, max_packets
        ));
    }
    if u64::from(rx.expected_seq) != rx.packets_accepted {
        return Err(format!(
            "expected_seq {} does not match {} in-order acceptances",
            rx.expected_seq, rx.packets_accepted
        ));
    }
    if tx.acks_received > rx.packets_accepted {
        return Err(format!(
            "{} ACKs received for {} accepted packets",
            tx.acks_received, rx.packets_accepted
        ));
    }

    // Stop-and-wait: only the most recent fresh sequence number may be pending
    let state = sender.state();
    if let Some(pending) = state.pending_ack_seq {
        if pending.wrapping_add(1) != state.next_seq_to_send {
            return Err(format!(
                "pending ACK {} is not the last sent sequence {}",
                pending,
                state.next_seq_to_send.wrapping_sub(1)
            ));
        }
    }

    if scenario.expects_completion() {
        if !sender.is_finished() {
            return Err(format!(
                "sender did not finish: {}/{} packets acknowledged",
                tx.acks_received, max_packets
            ));
        }
        if rx.packets_accepted != max_packets {
            return Err(format!(
                "receiver accepted {}/{} packets",
                rx.packets_accepted, max_packets
            ));
        }
    }

    match scenario {
        ScenarioId::Lossless if tx.retransmissions != 0 => Err(format!(
            "{} retransmissions on a lossless channel",
            tx.retransmissions
        )),
        ScenarioId::AckLoss if sender.is_finished() || rx.packets_accepted != 1 => Err(format!(
            "expected a stall after the first packet, receiver accepted {}",
            rx.packets_accepted
        )),
        _ => Ok(()),
    }
}

/// A one-parameter sweep over a base configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum Sweep {
    /// Payload sizes in bytes
    PacketSize(Vec<usize>),

    /// Send intervals in seconds; the window controller is off at every
    /// point so the swept interval is the one actually used
    Interval(Vec<f64>),

    /// Channel loss probabilities
    ErrorRate(Vec<f64>),
}

impl Sweep {
    pub fn packet_sizes() -> Self {
        Sweep::PacketSize(vec![64, 128, 256, 512, 1024])
    }

    pub fn intervals() -> Self {
        Sweep::Interval(vec![0.01, 0.02, 0.05, 0.1, 0.2])
    }

    pub fn error_rates() -> Self {
        Sweep::ErrorRate(vec![0.0, 0.05, 0.1, 0.2, 0.3])
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sweep::PacketSize(_) => "packet_size",
            Sweep::Interval(_) => "interval",
            Sweep::ErrorRate(_) => "error_rate",
        }
    }

    /// One labelled config per sweep point.
    pub fn points(&self, base: &SimConfig) -> Vec<(String, SimConfig)> {
        match self {
            Sweep::PacketSize(sizes) => sizes
                .iter()
                .map(|&packet_size| {
                    (
                        format!("packet_size={packet_size}"),
                        SimConfig { packet_size, ..base.clone() },
                    )
                })
                .collect(),
            Sweep::Interval(intervals) => intervals
                .iter()
                .map(|&interval| {
                    (
                        format!("interval={interval}"),
                        SimConfig {
                            interval,
                            congestion_control: false,
                            ..base.clone()
                        },
                    )
                })
                .collect(),
            Sweep::ErrorRate(rates) => rates
                .iter()
                .map(|&error_rate| {
                    (
                        format!("error_rate={error_rate}"),
                        base.clone().with_error_rate(error_rate),
                    )
                })
                .collect(),
        }
    }

    /// Runs every point and collects one report per point.
    ///
    /// Stops at the first point whose config is invalid.
    pub fn run(&self, base: &SimConfig) -> Result<StatsContext, RdtError> {
        info!(sweep = self.name(), "Starting sweep");
        let mut stats = StatsContext::new();
        for (label, config) in self.points(base) {
            stats = SimWorld::new(config)?.with_label(label).run(stats);
        }
        Ok(stats)
    }
}

impl std::str::FromStr for Sweep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "packet_size" | "size" => Ok(Sweep::packet_sizes()),
            "interval" => Ok(Sweep::intervals()),
            "error_rate" | "loss" => Ok(Sweep::error_rates()),
            _ => Err(format!("Unknown sweep: {}", s)),
        }
    }
}
