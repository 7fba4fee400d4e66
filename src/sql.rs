//! Default intent-to-SQL rendering.
//!
//! Templates use `{key}` placeholders filled from the intent's params, with
//! an optional fallback written as `{key|default}`. Text values are inserted
//! with single quotes doubled; templates supply their own quoting.

use crate::core::intent::{Intent, ParamValue, LOGIN};
use crate::core::traits::Translator;
use std::collections::{BTreeMap, HashMap};

const TEMPLATES: &[(&str, &str)] = &[
    (LOGIN, "SELECT CURRENT_USER(), @@version"),
    (
        "SEARCH_CUSTOMER",
        "SELECT customer_id, name, email FROM customers WHERE name LIKE 'A%' ORDER BY name LIMIT 50",
    ),
    ("VIEW_CUSTOMER", "SELECT * FROM customers WHERE customer_id = {customer_id}"),
    (
        "UPDATE_CUSTOMER",
        "UPDATE customers SET last_contacted = NOW() WHERE customer_id = {customer_id}",
    ),
    (
        "VIEW_ORDERS",
        "SELECT order_id, total, status FROM orders WHERE customer_id = {customer_id} ORDER BY created_at DESC LIMIT 20",
    ),
    (
        "CREATE_ORDER",
        "INSERT INTO orders (customer_id, product_id, quantity, status) VALUES ({customer_id}, {product_id}, 1, 'new')",
    ),
    (
        "VIEW_DASHBOARD",
        "SELECT status, COUNT(*) FROM orders WHERE created_at >= CURDATE() GROUP BY status",
    ),
    (
        "SEARCH_EMPLOYEE",
        "SELECT employee_id, first_name, last_name FROM employees WHERE department = 'Sales' LIMIT 50",
    ),
    ("VIEW_EMPLOYEE", "SELECT * FROM employees WHERE employee_id = {employee_id}"),
    (
        "UPDATE_EMPLOYEE",
        "UPDATE employees SET updated_at = NOW() WHERE employee_id = {employee_id}",
    ),
    (
        "VIEW_SALARY",
        "SELECT employee_id, base_salary, bonus FROM salaries WHERE employee_id = {employee_id}",
    ),
    (
        "UPDATE_SALARY",
        "UPDATE salaries SET base_salary = base_salary * 1.03 WHERE employee_id = {employee_id}",
    ),
    ("MANAGE_USERS", "UPDATE app_users SET locked = 0 WHERE employee_id = {employee_id}"),
    (
        "RUN_QUERY",
        "SELECT o.order_id, o.total, c.name FROM orders o JOIN customers c ON c.customer_id = o.customer_id WHERE o.order_id = {order_id}",
    ),
    ("DEBUG_QUERY", "EXPLAIN SELECT * FROM orders WHERE order_id = {order_id}"),
    ("VIEW_SCHEMA", "SHOW TABLES"),
    ("EXPORT_TABLE", "SELECT * FROM {table|orders}"),
    (
        "EXPORT_PAYROLL",
        "SELECT e.employee_id, e.first_name, e.last_name, s.base_salary FROM employees e JOIN salaries s ON s.employee_id = e.employee_id LIMIT {limit|1000}",
    ),
    ("CHECK_HEALTH", "SELECT 1"),
    (
        "BACKUP_DATABASE",
        "SELECT table_name, table_rows FROM information_schema.tables WHERE table_schema = DATABASE()",
    ),
    (
        "RECON_SCHEMA",
        "SELECT table_name, column_name FROM information_schema.columns WHERE table_schema = DATABASE()",
    ),
    (
        "SQLI_CLASSIC",
        "SELECT * FROM customers WHERE customer_id = '{probe|1}' OR '1'='1'",
    ),
    (
        "SQLI_UNION",
        "SELECT name, email FROM customers WHERE customer_id = {probe|1} UNION SELECT username, password_hash FROM app_users",
    ),
    ("DUMP_DATA", "SELECT * FROM {table|customers}"),
    ("GRANT_PRIVILEGE", "GRANT SELECT ON hr.salaries TO '{grantee}'@'%'"),
    ("REVOKE_PRIVILEGE", "REVOKE SELECT ON hr.salaries FROM '{grantee}'@'%'"),
    ("DROP_AUDIT_LOG", "DELETE FROM audit_log WHERE created_at < NOW()"),
];

/// Renders intents through per-action templates.
#[derive(Debug, Clone)]
pub struct TemplateTranslator {
    templates: HashMap<String, String>,
}

impl Default for TemplateTranslator {
    fn default() -> Self {
        Self {
            templates: TEMPLATES
                .iter()
                .map(|(action, template)| ((*action).to_string(), (*template).to_string()))
                .collect(),
        }
    }
}

impl TemplateTranslator {
    pub fn with_template(mut self, action: impl Into<String>, template: impl Into<String>) -> Self {
        self.templates.insert(action.into(), template.into());
        self
    }

    pub fn knows(&self, action: &str) -> bool {
        self.templates.contains_key(action)
    }
}

impl Translator for TemplateTranslator {
    fn translate(&self, intent: &Intent) -> Option<String> {
        let template = self.templates.get(&intent.action)?;
        fill(template, &intent.params)
    }
}

/// Substitutes placeholders; `None` if a placeholder has no value or default.
fn fill(template: &str, params: &BTreeMap<String, ParamValue>) -> Option<String> {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}')?;
        let placeholder = &after[..close];
        let (key, default) = match placeholder.split_once('|') {
            Some((key, default)) => (key, Some(default)),
            None => (placeholder, None),
        };
        match (params.get(key), default) {
            (Some(ParamValue::Id(id)), _) => out.push_str(&id.to_string()),
            (Some(ParamValue::Text(text)), _) => out.push_str(&text.replace('\'', "''")),
            (None, Some(default)) => out.push_str(default),
            (None, None) => return None,
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::catalog::{default_behavior, default_entity_pools, ATTACK_CHAIN};
    use crate::behavior::model::BehaviorModel;
    use crate::core::agents::Agent;
    use crate::core::intent::{Role, LOGOUT, START};
    use crate::scenarios::{get_scenario, scenario_names};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn intent(action: &str, params: &[(&str, ParamValue)]) -> Intent {
        Intent {
            user: "sales_001".to_string(),
            role: Role::Sales,
            action: action.to_string(),
            params: params
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect(),
            session_id: None,
            anomaly_flag: 0,
        }
    }

    #[test]
    fn substitutes_params() {
        let translator = TemplateTranslator::default();
        let sql = translator
            .translate(&intent("VIEW_CUSTOMER", &[("customer_id", ParamValue::Id(42))]))
            .expect("sql");
        assert_eq!(sql, "SELECT * FROM customers WHERE customer_id = 42");
    }

    #[test]
    fn defaults_and_missing_params() {
        let translator = TemplateTranslator::default();
        assert_eq!(
            translator.translate(&intent("EXPORT_TABLE", &[])).as_deref(),
            Some("SELECT * FROM orders")
        );
        assert_eq!(translator.translate(&intent("VIEW_CUSTOMER", &[])), None);
        assert_eq!(translator.translate(&intent("UNHEARD_OF", &[])), None);
    }

    #[test]
    fn text_values_are_escaped() {
        let translator = TemplateTranslator::default();
        let sql = translator
            .translate(&intent(
                "GRANT_PRIVILEGE",
                &[("grantee", ParamValue::Text("o'brien".to_string()))],
            ))
            .expect("sql");
        assert_eq!(sql, "GRANT SELECT ON hr.salaries TO 'o''brien'@'%'");
    }

    #[test]
    fn every_generated_action_renders() {
        let model =
            BehaviorModel::new(&default_behavior(), &default_entity_pools(), 1.2).expect("model");
        let translator = TemplateTranslator::default();
        let mut rng = StdRng::seed_from_u64(12);
        let mut agents: Vec<Agent> = [Role::Sales, Role::Hr, Role::Developer, Role::Admin]
            .into_iter()
            .enumerate()
            .map(|(id, role)| Agent::markov(id, format!("{role}_001"), role, false))
            .collect();
        agents.push(Agent::scripted(4, "attacker_001", &ATTACK_CHAIN));

        for agent in &mut agents {
            for _ in 0..300 {
                let intent = agent.step(&model, &mut rng);
                if intent.action == START || intent.action == LOGOUT {
                    continue;
                }
                assert!(translator.translate(&intent).is_some(), "{intent:?}");
            }
        }
        for name in scenario_names() {
            for intent in get_scenario(name, None) {
                if !intent.is_bookkeeping() {
                    assert!(translator.translate(&intent).is_some(), "{intent:?}");
                }
            }
        }
    }
}
