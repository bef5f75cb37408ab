//! Reliable-transfer simulator CLI
//!
//! Run preset scenarios, a custom configuration or a parameter sweep.

use clap::Parser;
use rdt_sim::scenarios::ScenarioId;
use rdt_sim::{RunReport, ScenarioResult, ScenarioRunner, SimConfig, SimExport, SimWorld, StatsContext, Sweep};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Stop-and-wait reliable transfer simulator
#[derive(Parser, Debug)]
#[command(name = "rdt-sim")]
#[command(about = "Deterministic simulation of stop-and-wait ARQ over a lossy link", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (reliable_transfer, lossless, congestion_pacing, lossy_link, ack_loss, all, custom)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to run
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Override the simulation time in seconds
    #[arg(short, long)]
    duration: Option<f64>,

    /// Sweep one parameter over the custom config (packet_size, interval, error_rate)
    #[arg(long)]
    sweep: Option<String>,

    /// JSON config file for custom runs and sweeps
    #[arg(long)]
    config: Option<PathBuf>,

    /// Payload bytes per packet (custom runs)
    #[arg(long)]
    packet_size: Option<usize>,

    /// Packets to send (custom runs)
    #[arg(long)]
    max_packets: Option<u32>,

    /// Seconds between an ACK and the next send (custom runs)
    #[arg(long)]
    interval: Option<f64>,

    /// Retransmission timeout in seconds (custom runs)
    #[arg(long)]
    timeout: Option<f64>,

    /// Channel loss probability (custom runs)
    #[arg(long)]
    error_rate: Option<f64>,

    /// Disable window-controlled pacing (custom runs)
    #[arg(long)]
    no_congestion: bool,

    /// Record a packet trace (included in --export)
    #[arg(long)]
    trace: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export run reports to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

impl Args {
    /// Custom-run configuration: config file, then flag overrides.
    fn custom_config(&self, seed: u64) -> Result<SimConfig, String> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
                SimConfig::from_json(&json).map_err(|e| e.to_string())?
            }
            None => SimConfig::default(),
        };

        config.seed = seed;
        config.trace = self.trace;
        if let Some(v) = self.packet_size {
            config.packet_size = v;
        }
        if let Some(v) = self.max_packets {
            config.max_packets = v;
        }
        if let Some(v) = self.interval {
            config.interval = v;
        }
        if let Some(v) = self.timeout {
            config.timeout = v;
        }
        if let Some(v) = self.error_rate {
            config.error_rate = v;
        }
        if let Some(v) = self.duration {
            config.simulation_time = v;
        }
        if self.no_congestion {
            config.congestion_control = false;
        }

        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

fn log_report(report: &RunReport) {
    info!(
        "  sent={} retx={} ({:.1}%) recv={} bytes_sent={} time={:.3}s throughput={:.4} Mbps goodput={:.4} Mbps delay={:.3} ms",
        report.packets_sent,
        report.retransmissions,
        report.retransmission_ratio_pct,
        report.packets_received,
        report.bytes_sent,
        report.transfer_time_secs,
        report.throughput_mbps,
        report.goodput_mbps,
        report.mean_delay_ms,
    );
}

fn write_export(export: &SimExport, path: &Path) {
    match export.write_to_file(path) {
        Ok(()) => info!("Exported {} runs to {}", export.runs.len(), path.display()),
        Err(e) => {
            error!("Failed to write export: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to encode JSON summary: {}", e);
            std::process::exit(1);
        }
    }
}

/// Sweep mode: one report per point, no pass/fail.
fn run_sweep(args: &Args, sweep: &str, seed: u64) {
    let sweep: Sweep = sweep.parse().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        eprintln!("Available sweeps: packet_size, interval, error_rate");
        std::process::exit(1);
    });
    let base = args.custom_config(seed).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let stats = match sweep.run(&base) {
        Ok(stats) => stats,
        Err(e) => {
            error!("Sweep failed: {}", e);
            std::process::exit(1);
        }
    };

    if args.json {
        print_json(&serde_json::json!({
            "sweep": sweep.name(),
            "seed": seed,
            "runs": stats.runs(),
        }));
    } else {
        for report in stats.runs() {
            info!("{}", report.label);
            log_report(report);
        }
    }

    if let Some(path) = &args.export {
        write_export(&SimExport::from_stats(sweep.name(), seed, &stats), path);
    }
}

/// Custom mode: a single configured run.
fn run_custom(args: &Args, seed: u64) {
    let config = args.custom_config(seed).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    let mut world = match SimWorld::new(config) {
        Ok(world) => world.with_label("custom"),
        Err(e) => {
            error!("Setup failed: {}", e);
            std::process::exit(1);
        }
    };
    world.run_to_end();
    let trace = world.trace().to_vec();
    let mut stats = StatsContext::new();
    stats.record(world.report());

    if args.json {
        print_json(&serde_json::json!({ "seed": seed, "runs": stats.runs() }));
    } else if let Some(report) = stats.last() {
        info!("custom (seed={}) completed={}", seed, report.completed);
        log_report(report);
    }

    if let Some(path) = &args.export {
        write_export(&SimExport::from_stats("custom", seed, &stats).with_trace(trace), path);
    }
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if !args.json {
        info!("Reliable Transfer Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    if let Some(sweep) = &args.sweep {
        run_sweep(&args, sweep, base_seed);
        return;
    }
    if args.scenario == "custom" {
        run_custom(&args, base_seed);
        return;
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Available scenarios: reliable_transfer, lossless, congestion_pacing, lossy_link, ack_loss, all, custom");
            std::process::exit(1);
        })]
    };

    // Track results
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut stats = StatsContext::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let mut runner = ScenarioRunner::new(seed).with_trace(args.trace);
        if let Some(duration) = args.duration {
            runner = runner.with_duration(duration);
        }

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
                if let Some(report) = &result.report {
                    log_report(report);
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            if let Some(report) = &result.report {
                stats.record(report.clone());
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        print_json(&serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "report": r.report,
                })
            }).collect::<Vec<_>>(),
        }));
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    if let Some(path) = &args.export {
        let name = if scenarios.len() == 1 { scenarios[0].name() } else { "all" };
        let trace = all_results.last().map(|r| r.trace.clone()).unwrap_or_default();
        if args.trace && all_results.len() > 1 {
            warn!("Only the last run's trace is exported");
        }
        write_export(&SimExport::from_stats(name, base_seed, &stats).with_trace(trace), path);
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
