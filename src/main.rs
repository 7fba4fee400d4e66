use chrono::{DateTime, Duration as SimDuration, Utc};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use dbsim::agents::build_population;
use dbsim::behavior::catalog::{default_behavior, default_entity_pools};
use dbsim::behavior::{BehaviorModel, BehaviorSpec, TableError};
use dbsim::clock::VirtualClock;
use dbsim::config::SimConfig;
use dbsim::formats::jsonl::{JsonlConnector, JsonlSink, QueryRecord};
use dbsim::harness::profiles::sample_profile;
use dbsim::harness::{ExecutionHarness, HarnessOptions};
use dbsim::intent::{ClientProfile, Role};
use dbsim::obfuscation::ObfuscationEngine;
use dbsim::provenance::{tag_statement, ProvenanceTag};
use dbsim::scenarios::scenario_names;
use dbsim::scheduler::{Scheduler, WorkPolicy};
use dbsim::sql::TemplateTranslator;
use dbsim::traits::Translator;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Parser)]
#[command(name = "dbsim")]
#[command(about = "Synthetic database activity simulator", long_about = None)]
struct Cli {
    /// Log at DEBUG instead of INFO.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Play the agent population in real time against the JSONL sink.
    Run {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        max_seconds: Option<u64>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Drive the scheduler offline for a fixed number of ticks.
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 1440)]
        ticks: u64,
        #[arg(long, default_value_t = 60.0)]
        tick_secs: f64,
    },
    /// Play one named attack scenario.
    Scenario {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        target: Option<String>,
        #[arg(long)]
        list: bool,
    },
    /// Load and validate behavior tables.
    Validate {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        behavior: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: tracing subscriber already installed");
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            config,
            output,
            max_seconds,
            dry_run,
        } => {
            let mut loaded = SimConfig::from_path(&config)?;
            if let Some(dir) = output {
                loaded.output.dir = dir.to_string_lossy().to_string();
            }
            if max_seconds.is_some() {
                loaded.run.max_seconds = max_seconds;
            }
            if dry_run {
                println!("config loaded: {loaded:#?}");
                return Ok(());
            }
            run_realtime(&loaded)?;
        }
        Commands::Simulate {
            config,
            output,
            ticks,
            tick_secs,
        } => {
            let mut loaded = SimConfig::from_path(&config)?;
            if let Some(dir) = output {
                loaded.output.dir = dir.to_string_lossy().to_string();
            }
            if !tick_secs.is_finite() || tick_secs <= 0.0 {
                return Err(format!("--tick-secs must be > 0, got {tick_secs}").into());
            }
            simulate_offline(&loaded, ticks, tick_secs)?;
        }
        Commands::Scenario {
            config,
            name,
            target,
            list,
        } => {
            if list {
                for name in scenario_names() {
                    println!("{name}");
                }
                return Ok(());
            }
            let Some(name) = name else {
                return Err("--name is required unless --list is given".into());
            };
            let loaded = match config {
                Some(path) => SimConfig::from_path(&path)?,
                None => SimConfig::default(),
            };
            play_scenario(&loaded, &name, target.as_deref())?;
        }
        Commands::Validate { config, behavior } => {
            let mut loaded = match config {
                Some(path) => SimConfig::from_path(&path)?,
                None => SimConfig::default(),
            };
            if let Some(path) = behavior {
                loaded.behavior.path = Some(path.to_string_lossy().to_string());
            }
            let model = load_model(&loaded)?;
            let transitions = &model.tables().transitions;
            for role in transitions.roles() {
                println!("{role}: {} states", transitions.state_count(role));
            }
            let agents = build_population(&loaded.population)?;
            WorkPolicy::from_config(&loaded.schedule, parse_timezone(loaded.clock.timezone.as_deref())?)?;
            println!(
                "behavior tables valid: {} rows, {} agents",
                transitions.len(),
                agents.len()
            );
        }
    }

    Ok(())
}

fn run_realtime(config: &SimConfig) -> Result<(), Box<dyn std::error::Error>> {
    let timezone = parse_timezone(config.clock.timezone.as_deref())?;
    let model = Arc::new(load_model(config)?);
    let agents = build_population(&config.population)?;
    let clock = VirtualClock::new(
        parse_start_time(config.clock.start_time.as_deref())?,
        config.clock.speed_up,
    )?;

    let sink = JsonlSink::spawn(&config.output, QUEUE_DEPTH)?;
    let connector = JsonlConnector::new(&sink, config.output.error_rate, config.seed.unwrap_or_else(rand::random));
    let harness = ExecutionHarness::new(
        model,
        clock,
        Arc::new(TemplateTranslator::default()),
        Arc::new(connector),
        HarnessOptions::from_config(config, timezone),
    )?;

    let token = harness.cancellation_token();
    ctrlc::set_handler(move || token.cancel())?;

    let summary = harness.run(agents);
    drop(harness);
    let written = sink.close()?;
    println!(
        "executed={} failed={} workers={} never_connected={} disconnected={} records={} elapsed={:.1}s",
        summary.executed,
        summary.failed,
        summary.workers,
        summary.workers_never_connected,
        summary.workers_disconnected,
        written,
        summary.elapsed.as_secs_f64()
    );
    Ok(())
}

fn play_scenario(
    config: &SimConfig,
    name: &str,
    target: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let timezone = parse_timezone(config.clock.timezone.as_deref())?;
    let model = Arc::new(load_model(config)?);
    let clock = VirtualClock::new(
        parse_start_time(config.clock.start_time.as_deref())?,
        config.clock.speed_up,
    )?;
    let sink = JsonlSink::spawn(&config.output, QUEUE_DEPTH)?;
    let connector = JsonlConnector::new(&sink, config.output.error_rate, config.seed.unwrap_or_else(rand::random));
    let harness = ExecutionHarness::new(
        model,
        clock,
        Arc::new(TemplateTranslator::default()),
        Arc::new(connector),
        HarnessOptions::from_config(config, timezone),
    )?;

    let summary = harness.play_scenario(name, target)?;
    drop(harness);
    sink.close()?;
    println!(
        "scenario={} user={} submitted={} executed={} failed={} skipped={}",
        summary.name,
        summary.user.as_deref().unwrap_or("-"),
        summary.submitted,
        summary.executed,
        summary.failed,
        summary.skipped
    );
    Ok(())
}

/// Steps the scheduler through simulated time without waiting in real time.
fn simulate_offline(config: &SimConfig, ticks: u64, tick_secs: f64) -> Result<(), Box<dyn std::error::Error>> {
    let timezone = parse_timezone(config.clock.timezone.as_deref())?;
    let model = Arc::new(load_model(config)?);
    let agents = build_population(&config.population)?;
    let start = parse_start_time(config.clock.start_time.as_deref())?;
    let policy = WorkPolicy::from_config(&config.schedule, timezone)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut scheduler = Scheduler::starting_at(model, policy, agents, start, StdRng::from_rng(&mut rng)?)?;

    let translator = TemplateTranslator::default();
    let obfuscator = ObfuscationEngine::default();
    let mut profiles: HashMap<String, ClientProfile> = HashMap::new();
    let sink = JsonlSink::spawn(&config.output, QUEUE_DEPTH)?;
    let dt = SimDuration::milliseconds((tick_secs * 1000.0).round() as i64);
    info!(ticks, tick_secs, sim_start = %start, "simulation started");

    let mut emitted = 0_u64;
    let mut skipped = 0_u64;
    for _ in 0..ticks {
        let intents = scheduler.tick(dt);
        let now = scheduler.now();
        for intent in intents {
            if intent.is_bookkeeping() {
                continue;
            }
            let Some(sql) = translator.translate(&intent) else {
                skipped += 1;
                continue;
            };
            let sql = if intent.is_anomalous() && rng.gen_bool(config.run.obfuscation_rate) {
                obfuscator.obfuscate(&sql, &mut rng).0
            } else {
                sql
            };
            let profile = profiles.entry(intent.user.clone()).or_insert_with(|| {
                let role = if intent.is_anomalous() { Role::Attacker } else { intent.role };
                sample_profile(role, &mut rng)
            });
            let statement = tag_statement(&ProvenanceTag::new(&intent, profile, now), &sql);
            let success = !rng.gen_bool(config.output.error_rate);
            sink.send(QueryRecord::new(&intent, &statement, now, Some(&*profile), success))?;
            emitted += 1;
            if emitted % 10_000 == 0 {
                sink.flush();
                info!(emitted, sim_time = %now, "simulation progress");
            }
        }
    }

    sink.close()?;
    info!(emitted, skipped, sim_end = %scheduler.now(), "simulation finished");
    println!("emitted={emitted} skipped={skipped}");
    Ok(())
}

fn load_model(config: &SimConfig) -> Result<BehaviorModel, TableError> {
    let spec = match config.behavior.path.as_deref() {
        Some(path) => BehaviorSpec::from_path(path)?,
        None => default_behavior(),
    };
    let pools = if config.entities.is_empty() {
        default_entity_pools()
    } else {
        config.entities.clone()
    };
    BehaviorModel::new(&spec, &pools, config.behavior.zipf_alpha)
}

fn parse_timezone(value: Option<&str>) -> Result<Option<Tz>, Box<dyn std::error::Error>> {
    match value {
        Some(name) => {
            let tz: Tz = name
                .parse()
                .map_err(|err| format!("invalid clock.timezone {name}: {err}"))?;
            Ok(Some(tz))
        }
        None => Ok(None),
    }
}

fn parse_start_time(value: Option<&str>) -> Result<DateTime<Utc>, Box<dyn std::error::Error>> {
    match value {
        Some(raw) => {
            let parsed = DateTime::parse_from_rfc3339(raw)?;
            Ok(parsed.with_timezone(&Utc))
        }
        None => Ok(Utc::now()),
    }
}
