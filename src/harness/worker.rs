use super::control::{CancellationToken, Progress};
use super::profiles::sample_profile;
use crate::behavior::model::BehaviorModel;
use crate::core::agents::Agent;
use crate::core::clock::VirtualClock;
use crate::core::config::HourWindow;
use crate::core::intent::{ClientProfile, Intent, Role};
use crate::core::traits::{Connector, ExecError, Executor, Translator};
use crate::obfuscation::ObfuscationEngine;
use crate::provenance::{tag_statement, ProvenanceTag};
use crate::scheduler::LocalTime;
use crate::stats::DelayGenerator;
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest think-time a worker will wait, in simulated seconds.
const MAX_THINK_SECS: f64 = 3600.0;

/// How a worker left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Stopped,
    NeverConnected,
    Disconnected,
}

/// Result of submitting one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Submission {
    Executed,
    Failed,
    Untranslatable,
    /// Connection dropped and the single reconnect failed.
    Lost,
}

/// Everything a worker thread shares with the harness.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub model: Arc<BehaviorModel>,
    pub translator: Arc<dyn Translator>,
    pub connector: Arc<dyn Connector>,
    pub obfuscator: Arc<ObfuscationEngine>,
    pub clock: VirtualClock,
    pub think: DelayGenerator,
    pub seed: Option<u64>,
    pub quiet_hours: HourWindow,
    pub timezone: Option<Tz>,
    pub idle: Duration,
    pub obfuscation_rate: f64,
    pub progress: Progress,
    pub token: CancellationToken,
}

impl WorkerContext {
    pub fn rng_for(&self, index: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        }
    }

    /// Drives `agent` until cancelled or its connection is lost for good.
    pub fn drive(&self, mut agent: Agent, index: usize) -> WorkerExit {
        let mut rng = self.rng_for(index);
        let profile_role = if agent.malicious { Role::Attacker } else { agent.role };
        let profile = sample_profile(profile_role, &mut rng);
        debug!(user = %agent.username, role = %agent.role, host = %profile.hostname, "worker started");

        let Some(mut session) = Session::open(self.connector.as_ref(), &agent.username, profile) else {
            return WorkerExit::NeverConnected;
        };

        let exit = loop {
            if self.token.is_cancelled() {
                break WorkerExit::Stopped;
            }

            let local = LocalTime::at(self.clock.current_sim_time(), self.timezone);
            if !agent.malicious && self.quiet_hours.contains(local.hour) {
                if !self.token.sleep(self.idle) {
                    break WorkerExit::Stopped;
                }
                continue;
            }

            let intent = agent.step(&self.model, &mut rng);
            if !intent.is_bookkeeping() {
                match session.submit(self, &intent, &mut rng) {
                    Submission::Executed => self.progress.record(true),
                    Submission::Failed => self.progress.record(false),
                    Submission::Untranslatable => {}
                    Submission::Lost => {
                        self.progress.record(false);
                        break WorkerExit::Disconnected;
                    }
                }
            }

            let think = self.think.sample_secs(&mut rng).min(MAX_THINK_SECS);
            if !self.token.sleep(self.clock.real_duration(think)) {
                break WorkerExit::Stopped;
            }
        };

        debug!(user = %agent.username, ?exit, "worker exited");
        exit
    }
}

/// One connection plus the fingerprint it was opened with.
pub(crate) struct Session<'a> {
    connector: &'a dyn Connector,
    user: String,
    profile: ClientProfile,
    executor: Box<dyn Executor>,
}

impl<'a> Session<'a> {
    pub fn open(connector: &'a dyn Connector, user: &str, profile: ClientProfile) -> Option<Self> {
        match connector.connect(user, &profile) {
            Ok(executor) => Some(Self {
                connector,
                user: user.to_string(),
                profile,
                executor,
            }),
            Err(err) => {
                debug!(user = %user, error = %err, "initial connect failed; worker exiting");
                None
            }
        }
    }

    pub fn profile(&self) -> &ClientProfile {
        &self.profile
    }

    /// Renders, optionally obfuscates, tags and executes `intent`.
    pub fn submit(&mut self, ctx: &WorkerContext, intent: &Intent, rng: &mut impl Rng) -> Submission {
        let Some(sql) = ctx.translator.translate(intent) else {
            debug!(user = %intent.user, action = %intent.action, "no SQL rendering; skipped");
            return Submission::Untranslatable;
        };
        let sql = if intent.is_anomalous()
            && ctx.obfuscation_rate > 0.0
            && rng.gen_bool(ctx.obfuscation_rate.min(1.0))
        {
            ctx.obfuscator.obfuscate(&sql, rng).0
        } else {
            sql
        };

        let timestamp = ctx.clock.current_sim_time();
        let statement = tag_statement(&ProvenanceTag::new(intent, &self.profile, timestamp), &sql);
        match self
            .executor
            .execute(intent, &statement, Some(timestamp), Some(&self.profile))
        {
            Ok(true) => Submission::Executed,
            Ok(false) => Submission::Failed,
            Err(ExecError::Execution(msg)) => {
                debug!(user = %self.user, action = %intent.action, error = %msg, "execution failed");
                Submission::Failed
            }
            Err(ExecError::Connection(msg)) => {
                warn!(user = %self.user, error = %msg, "connection dropped; reconnecting");
                self.reconnect()
            }
        }
    }

    /// Single reconnect attempt; the dropped statement is not retried.
    fn reconnect(&mut self) -> Submission {
        match self.connector.connect(&self.user, &self.profile) {
            Ok(executor) => {
                self.executor = executor;
                Submission::Failed
            }
            Err(err) => {
                warn!(user = %self.user, error = %err, "reconnect failed");
                Submission::Lost
            }
        }
    }
}
