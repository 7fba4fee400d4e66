//! Concurrent worker pool that plays agents against a database connector.
//!
//! Each agent is moved into its own worker thread, so no agent is ever
//! driven by two workers. Workers share only the read-only model, the clock,
//! the progress counters and the cancellation token.

pub mod control;
pub mod profiles;
mod worker;

pub use control::{CancellationToken, Progress, ProgressSnapshot};
pub use worker::WorkerExit;

use crate::behavior::model::BehaviorModel;
use crate::core::agents::Agent;
use crate::core::clock::VirtualClock;
use crate::core::config::{HourWindow, SimConfig, ThinkTimeConfig};
use crate::core::traits::{Connector, ExecError, Translator};
use crate::obfuscation::ObfuscationEngine;
use crate::scenarios::get_scenario;
use crate::stats::{DelayGenerator, StatsError};
use chrono_tz::Tz;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use worker::{Session, Submission, WorkerContext};

/// Pacing and run-length settings.
#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub seed: Option<u64>,
    pub quiet_hours: HourWindow,
    pub timezone: Option<Tz>,
    pub idle: Duration,
    pub think: ThinkTimeConfig,
    pub obfuscation_rate: f64,
    pub progress_interval: Duration,
    pub max_duration: Option<Duration>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            seed: None,
            quiet_hours: HourWindow::default(),
            timezone: None,
            idle: Duration::from_millis(250),
            think: ThinkTimeConfig::default(),
            obfuscation_rate: 0.5,
            progress_interval: Duration::from_secs(1),
            max_duration: None,
        }
    }
}

impl HarnessOptions {
    pub fn from_config(config: &SimConfig, timezone: Option<Tz>) -> Self {
        Self {
            seed: config.seed,
            quiet_hours: config.run.quiet_hours,
            timezone,
            idle: Duration::from_millis(config.run.idle_ms),
            think: config.run.think,
            obfuscation_rate: config.run.obfuscation_rate,
            progress_interval: Duration::from_millis(config.run.progress_interval_ms.max(1)),
            max_duration: config.run.max_seconds.map(Duration::from_secs),
        }
    }
}

/// Outcome of [`ExecutionHarness::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub executed: u64,
    pub failed: u64,
    pub workers: usize,
    pub workers_never_connected: usize,
    pub workers_disconnected: usize,
    pub elapsed: Duration,
}

/// Outcome of [`ExecutionHarness::play_scenario`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScenarioSummary {
    pub name: String,
    pub user: Option<String>,
    pub submitted: usize,
    pub executed: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct ExecutionHarness {
    context: WorkerContext,
    progress_interval: Duration,
    max_duration: Option<Duration>,
}

impl ExecutionHarness {
    pub fn new(
        model: Arc<BehaviorModel>,
        clock: VirtualClock,
        translator: Arc<dyn Translator>,
        connector: Arc<dyn Connector>,
        options: HarnessOptions,
    ) -> Result<Self, StatsError> {
        let think = DelayGenerator::new(
            options.think.min_secs,
            options.think.mode_secs,
            options.think.alpha,
        )?;
        Ok(Self {
            context: WorkerContext {
                model,
                translator,
                connector,
                obfuscator: Arc::new(ObfuscationEngine::default()),
                clock,
                think,
                seed: options.seed,
                quiet_hours: options.quiet_hours,
                timezone: options.timezone,
                idle: options.idle,
                obfuscation_rate: options.obfuscation_rate.clamp(0.0, 1.0),
                progress: Progress::default(),
                token: CancellationToken::new(),
            },
            progress_interval: options.progress_interval,
            max_duration: options.max_duration,
        })
    }

    pub fn with_obfuscation(mut self, engine: ObfuscationEngine) -> Self {
        self.context.obfuscator = Arc::new(engine);
        self
    }

    /// Handle that stops the run when cancelled, e.g. from a Ctrl-C handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.context.token.clone()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.context.progress.snapshot()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.context.clock
    }

    /// Runs one worker per agent until the budget elapses, the token is
    /// cancelled, or every worker has exited.
    ///
    /// The token is re-armed once every worker has been joined, so the
    /// harness can run again or play a scenario afterwards.
    pub fn run(&self, agents: Vec<Agent>) -> RunSummary {
        let started = Instant::now();
        let workers = agents.len();
        info!(
            workers,
            speed_up = self.context.clock.speed_up(),
            sim_start = %self.context.clock.start_sim(),
            "run started"
        );

        let handles: Vec<_> = agents
            .into_iter()
            .enumerate()
            .map(|(index, agent)| {
                let context = self.context.clone();
                thread::spawn(move || context.drive(agent, index))
            })
            .collect();

        let deadline = self.max_duration.map(|limit| started + limit);
        let mut last_report = Instant::now();
        let mut last_total = self.context.progress.snapshot().total();
        loop {
            if handles.iter().all(|handle| handle.is_finished()) {
                break;
            }
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                self.context.token.cancel();
                break;
            }
            let wait = match deadline {
                Some(deadline) => self.progress_interval.min(deadline - now),
                None => self.progress_interval,
            };
            if !self.context.token.sleep(wait) {
                break;
            }
            if last_report.elapsed() >= self.progress_interval {
                let snapshot = self.context.progress.snapshot();
                let secs = last_report.elapsed().as_secs_f64().max(f64::EPSILON);
                let rate = snapshot.total().saturating_sub(last_total) as f64 / secs;
                info!(
                    executed = snapshot.executed,
                    failed = snapshot.failed,
                    sim_time = %self.context.clock.current_sim_time(),
                    "progress: {rate:.1} queries/s"
                );
                last_total = snapshot.total();
                last_report = Instant::now();
            }
        }
        self.context.token.cancel();

        let mut never_connected = 0;
        let mut disconnected = 0;
        for handle in handles {
            match handle.join() {
                Ok(WorkerExit::Stopped) => {}
                Ok(WorkerExit::NeverConnected) => never_connected += 1,
                Ok(WorkerExit::Disconnected) => disconnected += 1,
                Err(_) => {
                    warn!("worker thread panicked");
                    disconnected += 1;
                }
            }
        }
        self.context.token.reset();

        let snapshot = self.context.progress.snapshot();
        let summary = RunSummary {
            executed: snapshot.executed,
            failed: snapshot.failed,
            workers,
            workers_never_connected: never_connected,
            workers_disconnected: disconnected,
            elapsed: started.elapsed(),
        };
        info!(
            executed = summary.executed,
            failed = summary.failed,
            never_connected,
            disconnected,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "run finished"
        );
        summary
    }

    /// Submits a named scenario's intents verbatim over one connection.
    ///
    /// Unknown names play nothing. Fails only if the connection cannot be opened.
    pub fn play_scenario(&self, name: &str, target: Option<&str>) -> Result<ScenarioSummary, ExecError> {
        let intents = get_scenario(name, target);
        let mut summary = ScenarioSummary {
            name: name.to_string(),
            user: intents.first().map(|intent| intent.user.clone()),
            submitted: 0,
            executed: 0,
            failed: 0,
            skipped: 0,
        };
        let Some(first) = intents.first() else {
            warn!(scenario = %name, "unknown scenario; nothing to play");
            return Ok(summary);
        };

        let mut rng = self.context.rng_for(0);
        let profile = profiles::sample_profile(first.role, &mut rng);
        let mut session = Session::open(self.context.connector.as_ref(), &first.user, profile)
            .ok_or_else(|| ExecError::Connection(format!("could not connect as {}", first.user)))?;
        debug!(scenario = %name, user = %first.user, host = %session.profile().hostname, "scenario connected");

        for intent in &intents {
            if self.context.token.is_cancelled() {
                break;
            }
            if intent.is_bookkeeping() {
                summary.skipped += 1;
                continue;
            }
            summary.submitted += 1;
            match session.submit(&self.context, intent, &mut rng) {
                Submission::Executed => {
                    self.context.progress.record(true);
                    summary.executed += 1;
                }
                Submission::Failed => {
                    self.context.progress.record(false);
                    summary.failed += 1;
                }
                Submission::Untranslatable => summary.skipped += 1,
                Submission::Lost => {
                    self.context.progress.record(false);
                    summary.failed += 1;
                    break;
                }
            }
        }

        info!(
            scenario = %summary.name,
            submitted = summary.submitted,
            executed = summary.executed,
            failed = summary.failed,
            skipped = summary.skipped,
            "scenario played"
        );
        Ok(summary)
    }
}
