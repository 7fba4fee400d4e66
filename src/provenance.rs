//! Ground-truth tag prepended to every executed statement.
//!
//! Format (one line, fields in this order):
//! `/* SIM_META:<user>|<ip>|<reserved>|ID:<session>|BEH:<action>|ANO:<0|1>|PROG:<program>|OS:<os>|CONN:<connector>|HOST:<host>|TS:<iso8601> */`

use crate::core::intent::{ClientProfile, Intent};
use chrono::{DateTime, SecondsFormat, Utc};

const OPEN: &str = "/* SIM_META:";
const CLOSE: &str = " */";
const EMPTY: &str = "-";

/// Parsed or to-be-rendered provenance fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceTag {
    pub user: String,
    pub ip: String,
    pub reserved: String,
    pub session: String,
    pub behavior: String,
    pub anomaly: u8,
    pub program: String,
    pub os: String,
    pub connector: String,
    pub host: String,
    pub timestamp: String,
}

impl ProvenanceTag {
    pub fn new(intent: &Intent, profile: &ClientProfile, timestamp: DateTime<Utc>) -> Self {
        Self {
            user: intent.user.clone(),
            ip: profile.source_ip.clone(),
            reserved: EMPTY.to_string(),
            session: intent
                .session_id
                .clone()
                .unwrap_or_else(|| EMPTY.to_string()),
            behavior: intent.action.clone(),
            anomaly: u8::from(intent.is_anomalous()),
            program: profile.program.clone(),
            os: profile.os.clone(),
            connector: profile.connector.clone(),
            host: profile.hostname.clone(),
            timestamp: timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{OPEN}{}|{}|{}|ID:{}|BEH:{}|ANO:{}|PROG:{}|OS:{}|CONN:{}|HOST:{}|TS:{}{CLOSE}",
            clean(&self.user),
            clean(&self.ip),
            clean(&self.reserved),
            clean(&self.session),
            clean(&self.behavior),
            self.anomaly,
            clean(&self.program),
            clean(&self.os),
            clean(&self.connector),
            clean(&self.host),
            clean(&self.timestamp),
        )
    }

    /// Finds and parses the first tag in `text`.
    pub fn parse(text: &str) -> Option<Self> {
        let start = text.find(OPEN)? + OPEN.len();
        let len = text[start..].find(CLOSE)?;
        let body = &text[start..start + len];
        let fields: Vec<&str> = body.split('|').collect();
        let [user, ip, reserved, session, behavior, anomaly, program, os, connector, host, timestamp] =
            fields.as_slice()
        else {
            return None;
        };
        let anomaly = match anomaly.strip_prefix("ANO:")? {
            "0" => 0,
            "1" => 1,
            _ => return None,
        };
        Some(Self {
            user: (*user).to_string(),
            ip: (*ip).to_string(),
            reserved: (*reserved).to_string(),
            session: session.strip_prefix("ID:")?.to_string(),
            behavior: behavior.strip_prefix("BEH:")?.to_string(),
            anomaly,
            program: program.strip_prefix("PROG:")?.to_string(),
            os: os.strip_prefix("OS:")?.to_string(),
            connector: connector.strip_prefix("CONN:")?.to_string(),
            host: host.strip_prefix("HOST:")?.to_string(),
            timestamp: timestamp.strip_prefix("TS:")?.to_string(),
        })
    }
}

/// Prepends the rendered tag to `sql`. Must run after any obfuscation.
pub fn tag_statement(tag: &ProvenanceTag, sql: &str) -> String {
    format!("{}\n{}", tag.render(), sql)
}

fn clean(value: &str) -> String {
    let value = value
        .replace(['|', '\n', '\r'], "_")
        .replace("*/", "*_/");
    if value.is_empty() {
        EMPTY.to_string()
    } else {
        value
    }
}
