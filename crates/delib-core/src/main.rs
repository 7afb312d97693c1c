use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use delib_core::{EngineConfig, LogFormat};
use delib_governance::Linter;
use delib_grammar::{EventStore, InMemoryEventStore};
use delib_ledger::{InMemoryLedger, ProvenanceLedger, RunId};
use delib_replay::ReplayEngine;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn events_arg() -> Arg {
    Arg::new("events")
        .long("events")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Move event store exported as JSON Lines")
}

fn tool_runs_arg() -> Arg {
    Arg::new("tool-runs")
        .long("tool-runs")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Provenance ledger exported as JSON Lines")
}

fn run_arg() -> Arg {
    Arg::new("run")
        .long("run")
        .help("Only this run id (default: every run in the store)")
}

fn cli() -> Command {
    Command::new("delib")
        .version(delib_core::VERSION)
        .about("Replay, lint and verify deliberation runs")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Engine configuration (TOML)"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("replay")
                .about("Render persisted runs without calling any provider")
                .arg(events_arg())
                .arg(tool_runs_arg())
                .arg(run_arg())
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the canonical artifact and trace instead of the narrative"),
                ),
        )
        .subcommand(
            Command::new("lint")
                .about("Print the governance report of persisted runs")
                .arg(events_arg())
                .arg(run_arg()),
        )
        .subcommand(
            Command::new("verify")
                .about("Check the ledger's hash chain")
                .arg(tool_runs_arg()),
        )
        .subcommand(Command::new("config").about("Print the effective configuration"))
}

fn init_tracing(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.with_target(false).init(),
    }
}

fn open(path: &PathBuf) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn load_store(args: &ArgMatches) -> Result<Arc<InMemoryEventStore>> {
    let path = args.get_one::<PathBuf>("events").context("--events is required")?;
    let store = InMemoryEventStore::import_jsonl(open(path)?)
        .with_context(|| format!("cannot load events from {}", path.display()))?;
    Ok(Arc::new(store))
}

fn load_ledger(args: &ArgMatches, config: &EngineConfig) -> Result<Arc<InMemoryLedger>> {
    let path = args.get_one::<PathBuf>("tool-runs").context("--tool-runs is required")?;
    let ledger = InMemoryLedger::import_jsonl(open(path)?, config.capture.level)
        .with_context(|| format!("cannot load tool runs from {}", path.display()))?;
    Ok(Arc::new(ledger))
}

fn selected_runs(args: &ArgMatches, store: &dyn EventStore) -> Result<Vec<RunId>> {
    match args.get_one::<String>("run") {
        Some(id) => {
            let run_id: RunId = id.parse().with_context(|| format!("invalid run id {id}"))?;
            store.run(run_id)?;
            Ok(vec![run_id])
        }
        None => Ok(store.run_ids()),
    }
}

fn replay(args: &ArgMatches, config: &EngineConfig) -> Result<()> {
    let store = load_store(args)?;
    let ledger = load_ledger(args, config)?;
    let runs = selected_runs(args, store.as_ref())?;
    let engine = ReplayEngine::new(store, ledger);
    for run_id in runs {
        let rendered = engine.replay(run_id)?;
        if args.get_flag("json") {
            println!("{}", String::from_utf8_lossy(&rendered.bytes));
        } else {
            println!("# Run {run_id}");
            println!();
            println!("{}", rendered.artifact.narrative);
            println!();
            println!("artifact hash: {}", rendered.hash);
        }
    }
    Ok(())
}

fn lint(args: &ArgMatches, config: &EngineConfig) -> Result<bool> {
    let store = load_store(args)?;
    let linter = Linter::new(config.governance.clone())?;
    let mut clean = true;
    for run_id in selected_runs(args, store.as_ref())? {
        let report = linter.lint(&store.context(run_id)?);
        println!("Run {run_id}: {}", if report.passes() { "PASS" } else { "FAIL" });
        for finding in &report.findings {
            println!("  [{:?}] {}", finding.severity, finding.annotation());
        }
        for finding in &report.overridden {
            println!("  [overridden] {}", finding.annotation());
        }
        clean &= report.passes();
    }
    Ok(clean)
}

fn verify(args: &ArgMatches, config: &EngineConfig) -> Result<()> {
    let ledger = load_ledger(args, config)?;
    ledger.verify_integrity()?;
    println!("ledger intact: {} tool runs", ledger.len());
    Ok(())
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => EngineConfig::load(path).with_context(|| format!("cannot load {}", path.display()))?,
        None => EngineConfig::default(),
    };
    init_tracing(&config);

    match matches.subcommand() {
        Some(("replay", args)) => replay(args, &config),
        Some(("lint", args)) => {
            if !lint(args, &config)? {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(("verify", args)) => verify(args, &config),
        Some(("config", _)) => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}
