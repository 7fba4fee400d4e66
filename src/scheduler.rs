//! Two-layer gating of agent activity in simulated time.
//!
//! The macro layer decides whether a role works at the current local hour and
//! weekday; the micro layer enforces a per-agent cooldown whose length depends
//! on what the agent just did.

use crate::behavior::model::BehaviorModel;
use crate::core::agents::Agent;
use crate::core::clock::{saturating_add, VirtualClock};
use crate::core::config::{ConfigError, HourWindow, ScheduleConfig};
use crate::core::intent::{Intent, Role, LOGIN, LOGOUT, SEARCH_PREFIX, START};
use crate::stats::{DelayGenerator, StatsError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Upper bound for a single cooldown, in simulated seconds.
const MAX_COOLDOWN_SECS: f64 = 4.0 * 3600.0;

/// Hour, weekday and date as seen in the simulation's local timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub hour: u8,
    pub weekday: Weekday,
    pub date: NaiveDate,
}

impl LocalTime {
    pub fn at(now: DateTime<Utc>, timezone: Option<Tz>) -> Self {
        match timezone {
            Some(tz) => {
                let local = now.with_timezone(&tz);
                Self {
                    hour: local.hour() as u8,
                    weekday: local.weekday(),
                    date: local.date_naive(),
                }
            }
            None => Self {
                hour: now.hour() as u8,
                weekday: now.weekday(),
                date: now.date_naive(),
            },
        }
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.weekday, Weekday::Sat | Weekday::Sun)
    }
}

/// Allowed working hours for one role.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkHours {
    pub start_hour: u8,
    pub end_hour: u8,
    /// Chance, rolled once per agent per day, of working past `end_hour`.
    pub overtime_probability: f64,
    pub overtime_hours: u8,
}

impl WorkHours {
    pub fn for_role(role: Role) -> Self {
        let (start_hour, end_hour, overtime_probability, overtime_hours) = match role {
            Role::Sales => (8, 18, 0.1, 2),
            Role::Hr => (9, 17, 0.05, 1),
            Role::Developer => (10, 19, 0.2, 3),
            Role::Admin => (7, 19, 0.15, 2),
            Role::Attacker => (0, 24, 0.0, 0),
        };
        Self {
            start_hour,
            end_hour,
            overtime_probability,
            overtime_hours,
        }
    }

    fn window(&self, overtime: bool) -> HourWindow {
        let mut end = self.end_hour;
        if overtime {
            end = if self.start_hour < self.end_hour {
                end.saturating_add(self.overtime_hours).min(24)
            } else {
                end.saturating_add(self.overtime_hours).min(self.start_hour)
            };
        }
        HourWindow {
            start: self.start_hour,
            end,
        }
    }
}

/// Per-role working-hours policy.
#[derive(Debug, Clone)]
pub struct WorkPolicy {
    hours: HashMap<Role, WorkHours>,
    weekend_override: bool,
    timezone: Option<Tz>,
}

impl Default for WorkPolicy {
    fn default() -> Self {
        Self {
            hours: Role::ALL
                .into_iter()
                .map(|role| (role, WorkHours::for_role(role)))
                .collect(),
            weekend_override: false,
            timezone: None,
        }
    }
}

impl WorkPolicy {
    pub fn from_config(config: &ScheduleConfig, timezone: Option<Tz>) -> Result<Self, ConfigError> {
        let mut policy = Self {
            weekend_override: config.weekend_override,
            timezone,
            ..Self::default()
        };
        for entry in &config.role {
            let role: Role = entry
                .name
                .parse()
                .map_err(|err| ConfigError::Invalid(format!("schedule.role: {err}")))?;
            policy.hours.insert(
                role,
                WorkHours {
                    start_hour: entry.start_hour,
                    end_hour: entry.end_hour,
                    overtime_probability: entry.overtime_probability,
                    overtime_hours: entry.overtime_hours,
                },
            );
        }
        Ok(policy)
    }

    pub fn with_hours(mut self, role: Role, hours: WorkHours) -> Self {
        self.hours.insert(role, hours);
        self
    }

    /// Lets scenarios run on weekends.
    pub fn with_weekend_override(mut self, enabled: bool) -> Self {
        self.weekend_override = enabled;
        self
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    pub fn hours(&self, role: Role) -> WorkHours {
        self.hours
            .get(&role)
            .copied()
            .unwrap_or_else(|| WorkHours::for_role(role))
    }

    pub fn is_working(&self, role: Role, local: LocalTime, overtime: bool) -> bool {
        if local.is_weekend() && !self.weekend_override {
            return false;
        }
        self.hours(role).window(overtime).contains(local.hour)
    }
}

/// Relative cost of an action, which sets the following cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCost {
    Quick,
    Normal,
    Heavy,
}

pub fn action_cost(action: &str) -> ActionCost {
    const HEAVY: [&str; 4] = ["EXPORT_", "DUMP_", "DEBUG_", "BACKUP_"];
    if action == LOGIN || action == LOGOUT || action == START || action.starts_with(SEARCH_PREFIX) {
        ActionCost::Quick
    } else if HEAVY.iter().any(|prefix| action.starts_with(prefix)) {
        ActionCost::Heavy
    } else {
        ActionCost::Normal
    }
}

/// Cooldown generators per action cost, in simulated seconds.
#[derive(Debug, Clone, Copy)]
pub struct CooldownPolicy {
    quick: DelayGenerator,
    normal: DelayGenerator,
    heavy: DelayGenerator,
}

impl CooldownPolicy {
    pub fn new() -> Result<Self, StatsError> {
        Ok(Self {
            quick: DelayGenerator::new(1.0, 4.0, 1.5)?,
            normal: DelayGenerator::new(5.0, 30.0, 1.5)?,
            heavy: DelayGenerator::new(60.0, 300.0, 1.5)?,
        })
    }

    pub fn sample(&self, action: &str, rng: &mut impl Rng) -> Duration {
        let generator = match action_cost(action) {
            ActionCost::Quick => &self.quick,
            ActionCost::Normal => &self.normal,
            ActionCost::Heavy => &self.heavy,
        };
        let secs = generator.sample_secs(rng).min(MAX_COOLDOWN_SECS);
        Duration::milliseconds((secs * 1000.0).round() as i64)
    }
}

/// Drives a set of agents through stepped simulated time.
pub struct Scheduler {
    model: Arc<BehaviorModel>,
    policy: WorkPolicy,
    cooldowns: CooldownPolicy,
    agents: Vec<Agent>,
    overtime: HashMap<usize, (NaiveDate, bool)>,
    now: DateTime<Utc>,
    rng: StdRng,
}

impl Scheduler {
    /// Starts at the clock's current simulated time.
    pub fn new(
        model: Arc<BehaviorModel>,
        policy: WorkPolicy,
        agents: Vec<Agent>,
        clock: &VirtualClock,
        rng: StdRng,
    ) -> Result<Self, StatsError> {
        Self::starting_at(model, policy, agents, clock.current_sim_time(), rng)
    }

    pub fn starting_at(
        model: Arc<BehaviorModel>,
        policy: WorkPolicy,
        agents: Vec<Agent>,
        start: DateTime<Utc>,
        rng: StdRng,
    ) -> Result<Self, StatsError> {
        Ok(Self {
            model,
            policy,
            cooldowns: CooldownPolicy::new()?,
            agents,
            overtime: HashMap::new(),
            now: start,
            rng,
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Advances time by `dt` and evaluates every agent once.
    ///
    /// Returns only the intents emitted this tick; gated agents emit nothing.
    pub fn tick(&mut self, dt: Duration) -> Vec<Intent> {
        self.now = saturating_add(self.now, dt);
        let now = self.now;
        let local = LocalTime::at(now, self.policy.timezone());
        let mut emitted = Vec::new();

        for agent in &mut self.agents {
            let hours = self.policy.hours(agent.role);
            let overtime = overtime_today(
                &mut self.overtime,
                agent.id,
                local.date,
                hours.overtime_probability,
                &mut self.rng,
            );
            if !self.policy.is_working(agent.role, local, overtime) {
                if agent.in_session() {
                    debug!(user = %agent.username, state = %agent.current_state, "end of day; forcing logout");
                    agent.force_start();
                }
                continue;
            }
            if agent.next_eligible_at.is_some_and(|next| now < next) {
                continue;
            }

            let intent = agent.step(&self.model, &mut self.rng);
            let cooldown = self.cooldowns.sample(&intent.action, &mut self.rng);
            agent.next_eligible_at = Some(saturating_add(now, cooldown));
            emitted.push(intent);
        }

        emitted
    }
}

fn overtime_today(
    cache: &mut HashMap<usize, (NaiveDate, bool)>,
    agent_id: usize,
    date: NaiveDate,
    probability: f64,
    rng: &mut impl Rng,
) -> bool {
    if let Some((day, decided)) = cache.get(&agent_id) {
        if *day == date {
            return *decided;
        }
    }
    let decided = probability > 0.0 && rng.gen_bool(probability.clamp(0.0, 1.0));
    cache.insert(agent_id, (date, decided));
    decided
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::catalog::{default_behavior, default_entity_pools, ATTACK_CHAIN};
    use crate::core::agents::SESSION_KEY;
    use crate::core::intent::ParamValue;
    use chrono::TimeZone;
    use rand::SeedableRng;

    fn model() -> Arc<BehaviorModel> {
        Arc::new(
            BehaviorModel::new(&default_behavior(), &default_entity_pools(), 1.2).expect("model"),
        )
    }

    fn no_overtime() -> WorkPolicy {
        let strict = |role| WorkHours {
            overtime_probability: 0.0,
            ..WorkHours::for_role(role)
        };
        WorkPolicy::default()
            .with_hours(Role::Sales, strict(Role::Sales))
            .with_hours(Role::Hr, strict(Role::Hr))
    }

    fn staff() -> Vec<Agent> {
        vec![
            Agent::markov(0, "sales_001", Role::Sales, false),
            Agent::markov(1, "hr_001", Role::Hr, false),
        ]
    }

    #[test]
    fn off_hours_agent_is_silent_and_logged_out() {
        // Monday 20:00 UTC: outside both windows.
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 20, 0, 0).unwrap();
        let mut agents = staff();
        agents[0].current_state = "VIEW_CUSTOMER".to_string();
        agents[0]
            .session_context
            .insert(SESSION_KEY.to_string(), ParamValue::Text("S1".to_string()));
        agents[0]
            .session_context
            .insert("customer_id".to_string(), ParamValue::Id(3));
        let mut scheduler =
            Scheduler::starting_at(model(), no_overtime(), agents, start, StdRng::seed_from_u64(1))
                .expect("scheduler");

        let emitted = scheduler.tick(Duration::seconds(1));
        assert!(emitted.is_empty());
        let sales = &scheduler.agents()[0];
        assert_eq!(sales.current_state, START);
        assert!(sales.session_context.is_empty());
    }

    #[test]
    fn working_agents_step_once_then_cool_down() {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let mut scheduler =
            Scheduler::starting_at(model(), no_overtime(), staff(), start, StdRng::seed_from_u64(2))
                .expect("scheduler");

        let first = scheduler.tick(Duration::seconds(1));
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|intent| intent.action == LOGIN));
        assert!(scheduler.tick(Duration::milliseconds(500)).is_empty());
    }

    #[test]
    fn weekends_are_idle_unless_overridden() {
        let saturday = Utc.with_ymd_and_hms(2024, 3, 9, 10, 0, 0).unwrap();
        let mut idle =
            Scheduler::starting_at(model(), no_overtime(), staff(), saturday, StdRng::seed_from_u64(3))
                .expect("scheduler");
        assert!(idle.tick(Duration::seconds(1)).is_empty());

        let policy = no_overtime().with_weekend_override(true);
        let mut busy =
            Scheduler::starting_at(model(), policy, staff(), saturday, StdRng::seed_from_u64(3))
                .expect("scheduler");
        assert_eq!(busy.tick(Duration::seconds(1)).len(), 2);
    }

    #[test]
    fn a_simulated_day_only_emits_inside_working_hours() {
        let start = Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap();
        let policy = no_overtime();
        let mut scheduler =
            Scheduler::starting_at(model(), policy.clone(), staff(), start, StdRng::seed_from_u64(4))
                .expect("scheduler");
        let mut total = 0;
        for _ in 0..(24 * 60) {
            let emitted = scheduler.tick(Duration::minutes(1));
            let local = LocalTime::at(scheduler.now(), None);
            for intent in &emitted {
                assert!(policy.is_working(intent.role, local, false), "{intent:?} at {local:?}");
            }
            total += emitted.len();
        }
        assert!(total > 0);
    }

    #[test]
    fn attackers_work_around_the_clock_on_weekdays() {
        let night = Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap();
        let agents = vec![Agent::scripted(0, "attacker_001", &ATTACK_CHAIN)];
        let mut scheduler =
            Scheduler::starting_at(model(), WorkPolicy::default(), agents, night, StdRng::seed_from_u64(5))
                .expect("scheduler");
        let emitted = scheduler.tick(Duration::seconds(1));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].anomaly_flag, 1);
    }

    #[test]
    fn overtime_extends_the_window() {
        let hours = WorkHours {
            start_hour: 9,
            end_hour: 17,
            overtime_probability: 1.0,
            overtime_hours: 2,
        };
        let policy = WorkPolicy::default().with_hours(Role::Hr, hours);
        let local = LocalTime::at(Utc.with_ymd_and_hms(2024, 3, 4, 18, 0, 0).unwrap(), None);
        assert!(!policy.is_working(Role::Hr, local, false));
        assert!(policy.is_working(Role::Hr, local, true));
    }

    #[test]
    fn action_costs() {
        assert_eq!(action_cost(LOGIN), ActionCost::Quick);
        assert_eq!(action_cost("SEARCH_CUSTOMER"), ActionCost::Quick);
        assert_eq!(action_cost("EXPORT_TABLE"), ActionCost::Heavy);
        assert_eq!(action_cost("DEBUG_QUERY"), ActionCost::Heavy);
        assert_eq!(action_cost("VIEW_CUSTOMER"), ActionCost::Normal);
    }

    #[test]
    fn local_time_honors_timezone() {
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 23, 30, 0).unwrap();
        let local = LocalTime::at(now, Some(chrono_tz::Europe::Berlin));
        assert_eq!(local.hour, 0);
        assert_eq!(local.weekday, Weekday::Tue);
    }
}
