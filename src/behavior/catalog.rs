use super::table::BehaviorSpec;
use crate::core::config::EntityPoolConfig;
use crate::core::intent::{Role, LOGIN, LOGOUT, START};

/// Fixed action chain of the scripted attacker, repeated cyclically.
pub const ATTACK_CHAIN: [&str; 5] = [LOGIN, "RECON_SCHEMA", "SQLI_CLASSIC", "DUMP_DATA", LOGOUT];

/// Built-in transition and requirement tables for the legitimate roles.
pub fn default_behavior() -> BehaviorSpec {
    let spec = BehaviorSpec::default();
    let spec = sales(spec);
    let spec = hr(spec);
    let spec = developer(spec);
    let spec = admin(spec);
    spec.requires("VIEW_CUSTOMER", &["customer_id"])
        .requires("UPDATE_CUSTOMER", &["customer_id"])
        .requires("VIEW_ORDERS", &["customer_id"])
        .requires("CREATE_ORDER", &["customer_id", "product_id"])
        .requires("VIEW_EMPLOYEE", &["employee_id"])
        .requires("UPDATE_EMPLOYEE", &["employee_id"])
        .requires("VIEW_SALARY", &["employee_id"])
        .requires("UPDATE_SALARY", &["employee_id"])
        .requires("RUN_QUERY", &["order_id"])
        .requires("DEBUG_QUERY", &["order_id"])
        .requires("MANAGE_USERS", &["employee_id"])
}

fn sales(spec: BehaviorSpec) -> BehaviorSpec {
    let role = Role::Sales;
    spec.transition(role, START, &[(LOGIN, 1.0)])
        .transition(role, LOGIN, &[("SEARCH_CUSTOMER", 0.6), ("VIEW_DASHBOARD", 0.4)])
        .transition(
            role,
            "SEARCH_CUSTOMER",
            &[("SEARCH_CUSTOMER", 0.2), ("VIEW_CUSTOMER", 0.6), (LOGOUT, 0.2)],
        )
        .transition(
            role,
            "VIEW_CUSTOMER",
            &[
                ("UPDATE_CUSTOMER", 0.3),
                ("VIEW_ORDERS", 0.3),
                ("SEARCH_CUSTOMER", 0.3),
                (LOGOUT, 0.1),
            ],
        )
        .transition(
            role,
            "UPDATE_CUSTOMER",
            &[("VIEW_CUSTOMER", 0.5), ("SEARCH_CUSTOMER", 0.3), (LOGOUT, 0.2)],
        )
        .transition(
            role,
            "VIEW_ORDERS",
            &[("CREATE_ORDER", 0.3), ("VIEW_CUSTOMER", 0.4), (LOGOUT, 0.3)],
        )
        .transition(role, "CREATE_ORDER", &[("SEARCH_CUSTOMER", 0.5), (LOGOUT, 0.5)])
        .transition(role, "VIEW_DASHBOARD", &[("SEARCH_CUSTOMER", 0.7), (LOGOUT, 0.3)])
        .transition(role, LOGOUT, &[(START, 1.0)])
}

fn hr(spec: BehaviorSpec) -> BehaviorSpec {
    let role = Role::Hr;
    spec.transition(role, START, &[(LOGIN, 1.0)])
        .transition(role, LOGIN, &[("SEARCH_EMPLOYEE", 0.7), ("VIEW_DASHBOARD", 0.3)])
        .transition(
            role,
            "SEARCH_EMPLOYEE",
            &[("VIEW_EMPLOYEE", 0.7), ("SEARCH_EMPLOYEE", 0.2), (LOGOUT, 0.1)],
        )
        .transition(
            role,
            "VIEW_EMPLOYEE",
            &[
                ("VIEW_SALARY", 0.3),
                ("UPDATE_EMPLOYEE", 0.3),
                ("SEARCH_EMPLOYEE", 0.3),
                (LOGOUT, 0.1),
            ],
        )
        .transition(
            role,
            "VIEW_SALARY",
            &[
                ("UPDATE_SALARY", 0.2),
                ("VIEW_EMPLOYEE", 0.4),
                ("SEARCH_EMPLOYEE", 0.3),
                (LOGOUT, 0.1),
            ],
        )
        .transition(role, "UPDATE_SALARY", &[("SEARCH_EMPLOYEE", 0.6), (LOGOUT, 0.4)])
        .transition(role, "UPDATE_EMPLOYEE", &[("SEARCH_EMPLOYEE", 0.6), (LOGOUT, 0.4)])
        .transition(role, "VIEW_DASHBOARD", &[("SEARCH_EMPLOYEE", 0.8), (LOGOUT, 0.2)])
        .transition(role, LOGOUT, &[(START, 1.0)])
}

fn developer(spec: BehaviorSpec) -> BehaviorSpec {
    let role = Role::Developer;
    spec.transition(role, START, &[(LOGIN, 1.0)])
        .transition(
            role,
            LOGIN,
            &[("RUN_QUERY", 0.5), ("DEBUG_QUERY", 0.2), ("VIEW_SCHEMA", 0.3)],
        )
        .transition(
            role,
            "RUN_QUERY",
            &[
                ("RUN_QUERY", 0.4),
                ("DEBUG_QUERY", 0.2),
                ("VIEW_SCHEMA", 0.2),
                (LOGOUT, 0.2),
            ],
        )
        .transition(role, "DEBUG_QUERY", &[("RUN_QUERY", 0.6), (LOGOUT, 0.4)])
        .transition(
            role,
            "VIEW_SCHEMA",
            &[("RUN_QUERY", 0.7), ("EXPORT_TABLE", 0.1), (LOGOUT, 0.2)],
        )
        .transition(role, "EXPORT_TABLE", &[("RUN_QUERY", 0.5), (LOGOUT, 0.5)])
        .transition(role, LOGOUT, &[(START, 1.0)])
}

fn admin(spec: BehaviorSpec) -> BehaviorSpec {
    let role = Role::Admin;
    spec.transition(role, START, &[(LOGIN, 1.0)])
        .transition(
            role,
            LOGIN,
            &[("CHECK_HEALTH", 0.5), ("MANAGE_USERS", 0.3), ("BACKUP_DATABASE", 0.2)],
        )
        .transition(
            role,
            "CHECK_HEALTH",
            &[
                ("CHECK_HEALTH", 0.3),
                ("MANAGE_USERS", 0.3),
                ("BACKUP_DATABASE", 0.1),
                (LOGOUT, 0.3),
            ],
        )
        .transition(
            role,
            "MANAGE_USERS",
            &[("CHECK_HEALTH", 0.4), ("MANAGE_USERS", 0.2), (LOGOUT, 0.4)],
        )
        .transition(role, "BACKUP_DATABASE", &[("CHECK_HEALTH", 0.5), (LOGOUT, 0.5)])
        .transition(role, LOGOUT, &[(START, 1.0)])
}

/// Entity pools used when the config declares none.
pub fn default_entity_pools() -> Vec<EntityPoolConfig> {
    [
        ("customer_id", 2_000, 1),
        ("employee_id", 400, 1_000),
        ("order_id", 10_000, 50_000),
        ("product_id", 250, 1),
    ]
    .into_iter()
    .map(|(key, count, first_id)| EntityPoolConfig {
        key: key.to_string(),
        count,
        first_id,
    })
    .collect()
}
