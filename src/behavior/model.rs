use super::table::{BehaviorSpec, BehaviorTables, TableError};
use crate::core::agents::{random_alpha, Agent, Driver, SESSION_KEY};
use crate::core::config::EntityPoolConfig;
use crate::core::intent::{Intent, ParamValue, Role, LOGIN, LOGOUT, SEARCH_PREFIX, START};
use crate::stats::EntitySampler;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Placeholder parameter attached to every scripted action.
pub const PROBE_KEY: &str = "probe";

/// Per-role Markov state machine with session memory.
///
/// Tables and samplers are read-only; session state lives in the [`Agent`]
/// being stepped. The only shared mutable state is the set of missing rows
/// already reported.
#[derive(Debug)]
pub struct BehaviorModel {
    tables: BehaviorTables,
    samplers: HashMap<String, EntitySampler<u64>>,
    reported_gaps: Mutex<HashSet<(Role, String)>>,
}

impl BehaviorModel {
    /// Validates `spec` and builds a sampler per entity pool.
    pub fn new(
        spec: &BehaviorSpec,
        pools: &[EntityPoolConfig],
        zipf_alpha: f64,
    ) -> Result<Self, TableError> {
        let tables = BehaviorTables::load(spec)?;
        let mut samplers = HashMap::new();
        for pool in pools {
            let ids: Vec<u64> = (0..pool.count)
                .map(|offset| pool.first_id.saturating_add(offset))
                .collect();
            let sampler = EntitySampler::new(ids, zipf_alpha)
                .map_err(|_| TableError::MissingEntityPool(pool.key.clone()))?;
            samplers.insert(pool.key.clone(), sampler);
        }
        for key in tables.requirements.all_keys() {
            if !samplers.contains_key(key) {
                return Err(TableError::MissingEntityPool(key.to_string()));
            }
        }
        Ok(Self {
            tables,
            samplers,
            reported_gaps: Mutex::new(HashSet::new()),
        })
    }

    pub fn tables(&self) -> &BehaviorTables {
        &self.tables
    }

    /// Returns true the first time a missing `(role, state)` row is seen by this model.
    fn note_gap(&self, role: Role, state: &str) -> bool {
        self.reported_gaps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((role, state.to_string()))
    }

    /// Advances `agent` by one action and returns the emitted intent.
    ///
    /// Never fails: a missing (role, state) row sends the agent back to START.
    pub fn step(&self, agent: &mut Agent, rng: &mut impl Rng) -> Intent {
        if agent.is_scripted() {
            return self.step_scripted(agent, rng);
        }

        let next = match self.tables.transitions.row(agent.role, &agent.current_state) {
            Some(row) => row.sample(rng).to_string(),
            None => {
                if self.note_gap(agent.role, &agent.current_state) {
                    warn!(
                        user = %agent.username,
                        role = %agent.role,
                        state = %agent.current_state,
                        "no transition row; falling back to START"
                    );
                }
                START.to_string()
            }
        };

        let session_id = self.enter_state(agent, &next, rng);
        if let Some(family) = next.strip_prefix(SEARCH_PREFIX) {
            agent
                .session_context
                .remove(&format!("{}_id", family.to_lowercase()));
        }

        let mut params = BTreeMap::new();
        for key in self.tables.requirements.required(&next) {
            let value = match agent.session_context.get(key) {
                Some(value) => value.clone(),
                None => {
                    let Some(value) = self.sample_entity(key, rng) else {
                        continue;
                    };
                    agent.session_context.insert(key.clone(), value.clone());
                    value
                }
            };
            params.insert(key.clone(), value);
        }

        agent.current_state = next.clone();
        Intent {
            user: agent.username.clone(),
            role: agent.role,
            action: next,
            params,
            session_id,
            anomaly_flag: agent.anomaly_flag(),
        }
    }

    fn step_scripted(&self, agent: &mut Agent, rng: &mut impl Rng) -> Intent {
        let next = match agent.driver_mut() {
            Driver::Scripted { chain, cursor } if !chain.is_empty() => {
                let action = chain[*cursor % chain.len()].clone();
                *cursor = (*cursor + 1) % chain.len();
                action
            }
            _ => START.to_string(),
        };

        let session_id = self.enter_state(agent, &next, rng);
        let mut params = BTreeMap::new();
        for key in self.tables.requirements.required(&next) {
            if let Some(value) = self.sample_entity(key, rng) {
                params.insert(key.clone(), value);
            }
        }
        params.insert(
            PROBE_KEY.to_string(),
            ParamValue::Id(rng.gen_range(1..=9_999)),
        );

        agent.current_state = next.clone();
        Intent {
            user: agent.username.clone(),
            role: agent.role,
            action: next,
            params,
            session_id,
            anomaly_flag: 1,
        }
    }

    /// Applies the session side effects of entering `next` and returns the
    /// session id the emitted intent belongs to.
    fn enter_state(&self, agent: &mut Agent, next: &str, rng: &mut impl Rng) -> Option<String> {
        match next {
            LOGIN => {
                let session_id = format!("S{}", random_alpha(rng, 12));
                agent.session_context.clear();
                agent
                    .session_context
                    .insert(SESSION_KEY.to_string(), ParamValue::Text(session_id.clone()));
                Some(session_id)
            }
            LOGOUT => {
                let session_id = agent.session_id();
                agent.session_context.clear();
                session_id
            }
            START => {
                agent.session_context.clear();
                None
            }
            _ => agent.session_id(),
        }
    }

    fn sample_entity(&self, key: &str, rng: &mut impl Rng) -> Option<ParamValue> {
        self.samplers
            .get(key)
            .map(|sampler| ParamValue::Id(sampler.sample(rng)))
    }
}
