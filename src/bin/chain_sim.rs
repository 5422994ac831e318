use clap::Parser;
use compsim_rs::compute::{MachineModel, MachineStatus, Meta, ScenarioSpec, SimMachine, Workload};
use compsim_rs::sim::{SimTime, Simulator};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "chain-sim",
    about = "Run a chained workload scenario on a simulated machine"
)]
struct Args {
    /// Path to scenario.json
    #[arg(long)]
    scenario: PathBuf,

    /// Run until this time (ms); defaults to running until completion
    #[arg(long)]
    until_ms: Option<u64>,

    /// Snapshot the workload at this time (ms), stop the machine and resume from the snapshot
    #[arg(long)]
    checkpoint_at_ms: Option<u64>,
}

fn load_scenario(path: &Path) -> Result<(MachineModel, Meta, Box<dyn Workload>), String> {
    let raw = fs::read_to_string(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    let scenario: ScenarioSpec =
        serde_json::from_str(&raw).map_err(|e| format!("parse {}: {e}", path.display()))?;
    let model = scenario.machine.build().map_err(|e| e.to_string())?;
    let workload = scenario.workload.build().map_err(|e| e.to_string())?;
    Ok((model, scenario.meta(), workload))
}

fn schedule_checkpoint(sim: &Simulator, machine: &SimMachine, at: SimTime) -> Arc<Mutex<Option<String>>> {
    let record = Arc::new(Mutex::new(None));
    let machine = machine.clone();
    let out = Arc::clone(&record);
    sim.schedule(at, move |sim: &Simulator| {
        if machine.status() != MachineStatus::Running {
            info!("checkpoint skipped: machine is not running");
            return;
        }
        let remaining = match machine.snapshot() {
            Ok(remaining) => remaining,
            Err(err) => {
                warn!(error = %err, "checkpoint failed");
                return;
            }
        };
        *out.lock().expect("checkpoint lock") = Some(format!(
            "checkpoint at_ns={} remaining={:?}",
            sim.now().as_nanos(),
            remaining
        ));
        machine.stop();
        if let Err(err) = machine.start(remaining) {
            warn!(error = %err, "resume failed");
        }
    });
    record
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    let (model, meta, workload) = match load_scenario(&args.scenario) {
        Ok(loaded) => loaded,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    let sim = Simulator::default();
    let machine = SimMachine::with_meta(&model, sim.clone(), meta);
    let checkpoint = args
        .checkpoint_at_ms
        .map(|ms| schedule_checkpoint(&sim, &machine, SimTime::from_millis(ms)));

    if let Err(err) = machine.start(workload) {
        eprintln!("error: {err}");
        return ExitCode::from(2);
    }

    match args.until_ms {
        Some(ms) => sim.run_until(SimTime::from_millis(ms)),
        None => sim.run(),
    }

    if let Some(record) = checkpoint {
        let line = record.lock().expect("checkpoint lock").take();
        if let Some(line) = line {
            println!("{line}");
        }
    }

    let outcome = machine.outcome();
    let (status, time) = match &outcome {
        None => ("running", sim.now()),
        Some(o) if o.failure.is_none() => ("completed", o.stopped_at),
        Some(o) => ("failed", o.stopped_at),
    };
    println!(
        "machine_outcome status={status} time_ns={} resets={}",
        time.as_nanos(),
        machine.resets()
    );
    if let Some(failure) = outcome.and_then(|o| o.failure) {
        for (depth, err) in failure.flatten() {
            println!("failure depth={depth} error={err}");
        }
    }
    ExitCode::SUCCESS
}
