use crate::core::intent::{Role, START};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

/// Allowed deviation of a row's probability sum from 1.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// Malformed behavior tables. Always fatal at startup.
#[derive(Debug)]
pub enum TableError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    UnknownRole(String),
    EmptyRow { role: Role, state: String },
    InvalidProbability { role: Role, from: String, to: String, value: f64 },
    ProbabilitySum { role: Role, state: String, sum: f64 },
    UndefinedAction { role: Role, from: String, to: String },
    UnknownRequirementAction(String),
    EmptyRequirementKey(String),
    MissingEntityPool(String),
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Io(err) => write!(f, "behavior table io error: {err}"),
            TableError::Parse(err) => write!(f, "behavior table parse error: {err}"),
            TableError::UnknownRole(name) => write!(f, "behavior table has unknown role: {name}"),
            TableError::EmptyRow { role, state } => {
                write!(f, "transition row {role}/{state} has no next states")
            }
            TableError::InvalidProbability {
                role,
                from,
                to,
                value,
            } => write!(f, "transition {role}/{from} -> {to} has invalid probability {value}"),
            TableError::ProbabilitySum { role, state, sum } => {
                write!(f, "transition row {role}/{state} sums to {sum}, expected 1")
            }
            TableError::UndefinedAction { role, from, to } => write!(
                f,
                "transition {role}/{from} -> {to} references an action with no row for {role}"
            ),
            TableError::UnknownRequirementAction(action) => {
                write!(f, "requirements reference undefined action: {action}")
            }
            TableError::EmptyRequirementKey(action) => {
                write!(f, "requirements for {action} contain an empty context key")
            }
            TableError::MissingEntityPool(key) => {
                write!(f, "no entity pool configured for context key: {key}")
            }
        }
    }
}

impl std::error::Error for TableError {}

impl From<std::io::Error> for TableError {
    fn from(err: std::io::Error) -> Self {
        TableError::Io(err)
    }
}

impl From<toml::de::Error> for TableError {
    fn from(err: toml::de::Error) -> Self {
        TableError::Parse(err)
    }
}

/// Raw behavior definition as written in a TOML file.
///
/// `roles.<role>.<state>.<next_state> = probability` and
/// `requirements.<action> = ["context_key", ...]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorSpec {
    #[serde(default)]
    pub roles: BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>,
    #[serde(default)]
    pub requirements: BTreeMap<String, Vec<String>>,
}

impl BehaviorSpec {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, TableError> {
        Ok(toml::from_str(contents)?)
    }

    /// Adds one outgoing row for `role` in state `from`.
    pub fn transition(mut self, role: Role, from: &str, next: &[(&str, f64)]) -> Self {
        let row = self
            .roles
            .entry(role.as_str().to_string())
            .or_default()
            .entry(from.to_string())
            .or_default();
        for (state, probability) in next {
            row.insert((*state).to_string(), *probability);
        }
        self
    }

    pub fn requires(mut self, action: &str, keys: &[&str]) -> Self {
        self.requirements.insert(
            action.to_string(),
            keys.iter().map(|key| (*key).to_string()).collect(),
        );
        self
    }
}

/// Next-state distribution for one (role, state) pair with a precomputed CDF.
#[derive(Debug, Clone)]
pub struct TransitionRow {
    states: Vec<String>,
    cumulative: Vec<f64>,
}

impl TransitionRow {
    /// Weighted draw in O(log n) over the cumulative array.
    pub fn sample(&self, rng: &mut impl Rng) -> &str {
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let roll = rng.gen::<f64>() * total;
        let idx = self
            .cumulative
            .partition_point(|edge| *edge <= roll)
            .min(self.states.len() - 1);
        &self.states[idx]
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let mut previous = 0.0;
        self.states.iter().zip(&self.cumulative).map(move |(state, edge)| {
            let probability = edge - previous;
            previous = *edge;
            (state.as_str(), probability)
        })
    }

    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
}

/// Validated (role, state) -> next-state table.
#[derive(Debug, Clone, Default)]
pub struct TransitionTable {
    rows: HashMap<(Role, String), TransitionRow>,
}

impl TransitionTable {
    pub fn row(&self, role: Role, state: &str) -> Option<&TransitionRow> {
        self.rows.get(&(role, state.to_string()))
    }

    pub fn rows(&self) -> impl Iterator<Item = (&(Role, String), &TransitionRow)> {
        self.rows.iter()
    }

    pub fn roles(&self) -> BTreeSet<Role> {
        self.rows.keys().map(|(role, _)| *role).collect()
    }

    pub fn state_count(&self, role: Role) -> usize {
        self.rows.keys().filter(|(r, _)| *r == role).count()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Validated action -> required context keys table.
#[derive(Debug, Clone, Default)]
pub struct RequirementTable {
    keys: HashMap<String, Vec<String>>,
}

impl RequirementTable {
    pub fn required(&self, action: &str) -> &[String] {
        self.keys.get(action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every context key referenced by any action.
    pub fn all_keys(&self) -> BTreeSet<&str> {
        self.keys
            .values()
            .flat_map(|keys| keys.iter().map(String::as_str))
            .collect()
    }
}

/// Both tables, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct BehaviorTables {
    pub transitions: TransitionTable,
    pub requirements: RequirementTable,
}

impl BehaviorTables {
    pub fn load(spec: &BehaviorSpec) -> Result<Self, TableError> {
        let mut rows = HashMap::new();
        let mut defined_actions = BTreeSet::new();

        for (role_name, states) in &spec.roles {
            let role: Role = role_name
                .parse()
                .map_err(|_| TableError::UnknownRole(role_name.clone()))?;

            for (state, next) in states {
                if next.is_empty() {
                    return Err(TableError::EmptyRow {
                        role,
                        state: state.clone(),
                    });
                }
                let mut sum = 0.0;
                let mut names = Vec::with_capacity(next.len());
                let mut cumulative = Vec::with_capacity(next.len());
                for (to, probability) in next {
                    if !probability.is_finite() || *probability < 0.0 {
                        return Err(TableError::InvalidProbability {
                            role,
                            from: state.clone(),
                            to: to.clone(),
                            value: *probability,
                        });
                    }
                    if !states.contains_key(to) {
                        return Err(TableError::UndefinedAction {
                            role,
                            from: state.clone(),
                            to: to.clone(),
                        });
                    }
                    sum += probability;
                    names.push(to.clone());
                    cumulative.push(sum);
                }
                if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                    return Err(TableError::ProbabilitySum {
                        role,
                        state: state.clone(),
                        sum,
                    });
                }
                defined_actions.insert(state.clone());
                rows.insert(
                    (role, state.clone()),
                    TransitionRow {
                        states: names,
                        cumulative,
                    },
                );
            }
        }

        let mut keys = HashMap::new();
        for (action, required) in &spec.requirements {
            if !defined_actions.contains(action) {
                return Err(TableError::UnknownRequirementAction(action.clone()));
            }
            if required.iter().any(|key| key.trim().is_empty()) {
                return Err(TableError::EmptyRequirementKey(action.clone()));
            }
            keys.insert(action.clone(), required.clone());
        }

        Ok(Self {
            transitions: TransitionTable { rows },
            requirements: RequirementTable { keys },
        })
    }
}

/// Returns true when a table declares a START row for `role`.
pub fn has_entry_point(table: &TransitionTable, role: Role) -> bool {
    table.row(role, START).is_some()
}
