//! Synthetic client fingerprints.
//!
//! Staff connect from office workstations on private ranges; attackers show
//! up with tooling from public addresses.

use crate::core::intent::{ClientProfile, Role};
use rand::seq::SliceRandom;
use rand::Rng;

const OFFICE_OS: [&str; 4] = ["Windows 11", "Windows 10", "macOS 14.4", "Ubuntu 22.04"];
const ATTACKER_OS: [&str; 2] = ["Kali GNU/Linux Rolling", "Ubuntu 20.04"];
const OFFICE_CONNECTORS: [&str; 3] = ["ODBC Driver 18", "JDBC 8.2", "libpq 16"];
const ATTACKER_CONNECTORS: [&str; 2] = ["python-requests/2.31", "PyMySQL 1.1"];
const ATTACKER_PROGRAMS: [&str; 3] = ["sqlmap/1.8", "python3", "curl/8.5"];

fn programs_for(role: Role) -> &'static [&'static str] {
    match role {
        Role::Sales => &["SalesPortal", "Excel", "CRM Desktop"],
        Role::Hr => &["HRIS Client", "Excel", "PayrollManager"],
        Role::Developer => &["DBeaver 24.0", "psql", "IntelliJ IDEA", "python3"],
        Role::Admin => &["SSMS 20", "pgAdmin 4", "psql"],
        Role::Attacker => &ATTACKER_PROGRAMS,
    }
}

/// Samples a fingerprint for `role`; sampled once per worker.
pub fn sample_profile(role: Role, rng: &mut impl Rng) -> ClientProfile {
    let attacker = role == Role::Attacker;
    let (os_pool, connectors): (&[&str], &[&str]) = if attacker {
        (&ATTACKER_OS, &ATTACKER_CONNECTORS)
    } else {
        (&OFFICE_OS, &OFFICE_CONNECTORS)
    };
    let hostname = if attacker {
        format!("host-{:04x}", rng.gen_range(0..=0xffff_u32))
    } else {
        format!("WS-{}-{:04}", role.as_str().to_uppercase(), rng.gen_range(1..10_000))
    };
    let source_ip = if attacker {
        random_public_ip(rng)
    } else {
        random_private_ip(rng)
    };
    ClientProfile {
        os: pick(os_pool, rng),
        program: pick(programs_for(role), rng),
        connector: pick(connectors, rng),
        hostname,
        source_ip,
    }
}

fn pick(values: &[&str], rng: &mut impl Rng) -> String {
    values
        .choose(rng)
        .map(|value| (*value).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn random_public_ip(rng: &mut impl Rng) -> String {
    loop {
        let first = rng.gen_range(1..=223);
        if first == 10 || first == 127 || first == 172 || first == 192 {
            continue;
        }
        return format!(
            "{}.{}.{}.{}",
            first,
            rng.gen_range(0..=255),
            rng.gen_range(0..=255),
            rng.gen_range(1..=254)
        );
    }
}

fn random_private_ip(rng: &mut impl Rng) -> String {
    match rng.gen_range(0..3) {
        0 => format!(
            "10.{}.{}.{}",
            rng.gen_range(0..=255),
            rng.gen_range(0..=255),
            rng.gen_range(1..=254)
        ),
        1 => format!(
            "192.168.{}.{}",
            rng.gen_range(0..=255),
            rng.gen_range(1..=254)
        ),
        _ => format!(
            "172.{}.{}.{}",
            rng.gen_range(16..=31),
            rng.gen_range(0..=255),
            rng.gen_range(1..=254)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn staff_profiles_use_office_pools() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let profile = sample_profile(Role::Hr, &mut rng);
            assert!(OFFICE_OS.contains(&profile.os.as_str()));
            assert!(programs_for(Role::Hr).contains(&profile.program.as_str()));
            assert!(profile.hostname.starts_with("WS-HR-"));
            let first: u8 = profile.source_ip.split('.').next().unwrap().parse().unwrap();
            assert!(matches!(first, 10 | 172 | 192), "{}", profile.source_ip);
        }
    }

    #[test]
    fn attacker_profiles_use_toolkit_pools() {
        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..50 {
            let profile = sample_profile(Role::Attacker, &mut rng);
            assert!(ATTACKER_PROGRAMS.contains(&profile.program.as_str()));
            assert!(!profile.source_ip.starts_with("10."));
            assert!(!profile.source_ip.starts_with("192."));
        }
    }
}
