use crate::behavior::catalog::ATTACK_CHAIN;
use crate::behavior::model::BehaviorModel;
use crate::core::config::{ConfigError, PopulationConfig};
use crate::core::intent::{Intent, ParamValue, Role, START};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::BTreeMap;

/// Context key under which the current session id is memoized.
pub const SESSION_KEY: &str = "session_id";

/// How an agent chooses its next action.
#[derive(Debug, Clone)]
pub enum Driver {
    /// Weighted draws from the role's transition table.
    MarkovDriven,
    /// A fixed chain replayed cyclically; `cursor` points at the next action.
    Scripted { chain: Vec<String>, cursor: usize },
}

/// A simulated identity producing a stream of database actions.
///
/// An agent is mutated on every step and must be driven by at most one
/// worker at a time.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: usize,
    pub username: String,
    pub role: Role,
    pub malicious: bool,
    /// Last action taken.
    pub current_state: String,
    /// Entity ids memoized since LOGIN, plus the session id.
    pub session_context: BTreeMap<String, ParamValue>,
    /// Next simulated time the scheduler may step this agent.
    pub next_eligible_at: Option<DateTime<Utc>>,
    driver: Driver,
}

impl Agent {
    pub fn markov(id: usize, username: impl Into<String>, role: Role, malicious: bool) -> Self {
        Self::with_driver(id, username.into(), role, malicious, Driver::MarkovDriven)
    }

    /// Attacker replaying `chain`; always malicious.
    pub fn scripted(id: usize, username: impl Into<String>, chain: &[&str]) -> Self {
        let chain = chain.iter().map(|action| (*action).to_string()).collect();
        Self::with_driver(
            id,
            username.into(),
            Role::Attacker,
            true,
            Driver::Scripted { chain, cursor: 0 },
        )
    }

    fn with_driver(id: usize, username: String, role: Role, malicious: bool, driver: Driver) -> Self {
        Self {
            id,
            username,
            role,
            malicious,
            current_state: START.to_string(),
            session_context: BTreeMap::new(),
            next_eligible_at: None,
            driver,
        }
    }

    /// Advances the agent by one action.
    pub fn step(&mut self, model: &BehaviorModel, rng: &mut impl Rng) -> Intent {
        model.step(self, rng)
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub(crate) fn driver_mut(&mut self) -> &mut Driver {
        &mut self.driver
    }

    pub fn is_scripted(&self) -> bool {
        matches!(self.driver, Driver::Scripted { .. })
    }

    /// True for malicious-mode and scripted agents.
    pub fn anomaly_flag(&self) -> u8 {
        u8::from(self.malicious || self.is_scripted())
    }

    pub fn session_id(&self) -> Option<String> {
        match self.session_context.get(SESSION_KEY) {
            Some(ParamValue::Text(id)) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn in_session(&self) -> bool {
        self.current_state != START
    }

    /// Simulated end-of-day: drop back to START with an empty context.
    pub fn force_start(&mut self) {
        self.current_state = START.to_string();
        self.session_context.clear();
        if let Driver::Scripted { cursor, .. } = &mut self.driver {
            *cursor = 0;
        }
    }
}

/// Builds the agent population from config.
pub fn build_population(config: &PopulationConfig) -> Result<Vec<Agent>, ConfigError> {
    let mut agents = Vec::new();
    let mut legitimate = Vec::new();
    let mut counters: BTreeMap<Role, usize> = BTreeMap::new();

    for entry in &config.role {
        let role: Role = entry
            .name
            .parse()
            .map_err(|err| ConfigError::Invalid(format!("population.role: {err}")))?;
        if role == Role::Attacker {
            return Err(ConfigError::Invalid(
                "population.role cannot be attacker; use population.attackers".to_string(),
            ));
        }
        legitimate.push(role);
        for _ in 0..entry.count {
            let id = agents.len();
            let username = next_username(&mut counters, role);
            agents.push(Agent::markov(id, username, role, false));
        }
    }

    if config.insiders > 0 && legitimate.is_empty() {
        return Err(ConfigError::Invalid(
            "population.insiders requires at least one legitimate role".to_string(),
        ));
    }
    for n in 0..config.insiders {
        let role = legitimate[n % legitimate.len()];
        let id = agents.len();
        let username = next_username(&mut counters, role);
        agents.push(Agent::markov(id, username, role, true));
    }

    for _ in 0..config.attackers {
        let id = agents.len();
        let username = next_username(&mut counters, Role::Attacker);
        agents.push(Agent::scripted(id, username, &ATTACK_CHAIN));
    }

    Ok(agents)
}

fn next_username(counters: &mut BTreeMap<Role, usize>, role: Role) -> String {
    let count = counters.entry(role).or_insert(0);
    *count += 1;
    format!("{}_{:03}", role.as_str(), count)
}

pub(crate) fn random_alpha(rng: &mut impl Rng, len: usize) -> String {
    const ALPHANUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    (0..len)
        .map(|_| {
            let idx = rng.gen_range(0..ALPHANUM.len());
            ALPHANUM[idx] as char
        })
        .collect()
}
