//! Fixed, named attack narratives with ground-truth labels.
//!
//! Scenarios bypass the Markov model entirely: each name maps to a literal
//! intent sequence so a specific story is guaranteed to appear in the data.

use crate::core::intent::{Intent, ParamValue, Role, LOGIN, LOGOUT};
use std::collections::BTreeMap;

pub const INSIDER_SALARY_THEFT: &str = "INSIDER_SALARY_THEFT";
pub const SQLI_EXFILTRATION: &str = "SQLI_EXFILTRATION";
pub const PRIVILEGE_ESCALATION: &str = "PRIVILEGE_ESCALATION";
pub const OFF_HOURS_BULK_EXPORT: &str = "OFF_HOURS_BULK_EXPORT";

/// Names accepted by [`get_scenario`].
pub fn scenario_names() -> &'static [&'static str] {
    &[
        INSIDER_SALARY_THEFT,
        SQLI_EXFILTRATION,
        PRIVILEGE_ESCALATION,
        OFF_HOURS_BULK_EXPORT,
    ]
}

/// Returns the intent sequence for `name`, played as `target` when given.
///
/// Unknown names yield an empty sequence.
pub fn get_scenario(name: &str, target: Option<&str>) -> Vec<Intent> {
    match name {
        INSIDER_SALARY_THEFT => {
            let story = Story::new(target.unwrap_or("sales_007"), Role::Sales, "SCN-INSIDER-0001");
            vec![
                story.step(LOGIN, &[], 0),
                story.step("VIEW_CUSTOMER", &[("customer_id", ParamValue::Id(17))], 0),
                story.step("VIEW_SALARY", &[("employee_id", ParamValue::Id(1_042))], 1),
                story.step("EXPORT_PAYROLL", &[("limit", ParamValue::Id(5_000))], 1),
                story.step(LOGOUT, &[], 0),
            ]
        }
        SQLI_EXFILTRATION => {
            let story = Story::new(target.unwrap_or("attacker_001"), Role::Attacker, "SCN-SQLI-0001");
            vec![
                story.step(LOGIN, &[], 1),
                story.step("RECON_SCHEMA", &[], 1),
                story.step("SQLI_CLASSIC", &[("probe", ParamValue::Id(1))], 1),
                story.step("SQLI_UNION", &[("probe", ParamValue::Id(1))], 1),
                story.step("DUMP_DATA", &[("table", text("customers"))], 1),
                story.step(LOGOUT, &[], 1),
            ]
        }
        PRIVILEGE_ESCALATION => {
            let story = Story::new(target.unwrap_or("developer_004"), Role::Developer, "SCN-PRIVESC-0001");
            vec![
                story.step(LOGIN, &[], 0),
                story.step("RUN_QUERY", &[("order_id", ParamValue::Id(50_012))], 0),
                story.step("GRANT_PRIVILEGE", &[("grantee", text("developer_004"))], 1),
                story.step("VIEW_SALARY", &[("employee_id", ParamValue::Id(1_003))], 1),
                story.step("REVOKE_PRIVILEGE", &[("grantee", text("developer_004"))], 1),
                story.step(LOGOUT, &[], 0),
            ]
        }
        OFF_HOURS_BULK_EXPORT => {
            let story = Story::new(target.unwrap_or("admin_002"), Role::Admin, "SCN-EXPORT-0001");
            vec![
                story.step(LOGIN, &[], 0),
                story.step("CHECK_HEALTH", &[], 0),
                story.step("EXPORT_TABLE", &[("table", text("customers"))], 1),
                story.step("EXPORT_TABLE", &[("table", text("employees"))], 1),
                story.step("DROP_AUDIT_LOG", &[], 1),
                story.step(LOGOUT, &[], 0),
            ]
        }
        _ => Vec::new(),
    }
}

fn text(value: &str) -> ParamValue {
    ParamValue::Text(value.to_string())
}

struct Story<'a> {
    user: &'a str,
    role: Role,
    session_id: &'a str,
}

impl<'a> Story<'a> {
    fn new(user: &'a str, role: Role, session_id: &'a str) -> Self {
        Self {
            user,
            role,
            session_id,
        }
    }

    fn step(&self, action: &str, params: &[(&str, ParamValue)], anomaly_flag: u8) -> Intent {
        Intent {
            user: self.user.to_string(),
            role: self.role,
            action: action.to_string(),
            params: params
                .iter()
                .map(|(key, value)| ((*key).to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
            session_id: Some(self.session_id.to_string()),
            anomaly_flag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insider_salary_theft_labels() {
        let intents = get_scenario(INSIDER_SALARY_THEFT, None);
        let flags: Vec<u8> = intents.iter().map(|intent| intent.anomaly_flag).collect();
        assert_eq!(flags, [0, 0, 1, 1, 0]);
        assert_eq!(intents[0].action, LOGIN);
        assert_eq!(intents[4].action, LOGOUT);
    }

    #[test]
    fn target_identity_overrides_user() {
        let intents = get_scenario(INSIDER_SALARY_THEFT, Some("sales_002"));
        assert!(intents.iter().all(|intent| intent.user == "sales_002"));
        let session = intents[0].session_id.clone();
        assert!(intents.iter().all(|intent| intent.session_id == session));
    }

    #[test]
    fn unknown_scenario_is_empty() {
        assert!(get_scenario("NOPE", None).is_empty());
    }

    #[test]
    fn every_listed_scenario_is_bracketed_by_login_and_logout() {
        for name in scenario_names() {
            let intents = get_scenario(name, None);
            assert!(!intents.is_empty(), "{name}");
            assert_eq!(intents.first().map(|i| i.action.as_str()), Some(LOGIN));
            assert_eq!(intents.last().map(|i| i.action.as_str()), Some(LOGOUT));
            assert!(intents.iter().any(Intent::is_anomalous), "{name}");
        }
    }

    #[test]
    fn scenarios_are_pure() {
        assert_eq!(
            get_scenario(SQLI_EXFILTRATION, None),
            get_scenario(SQLI_EXFILTRATION, None)
        );
    }
}
