//! Per-request guard decision log.
//!
//! One JSON line per guarded request on the `ipguard::decision` target.

use std::time::Instant;

use chrono::Utc;
use ipguard_core::GuardResult;
use serde::Serialize;
use uuid::Uuid;

pub const DECISION_TARGET: &str = "ipguard::decision";

#[derive(Debug, Clone, Serialize)]
pub struct GuardLog {
    pub request_id: Uuid,
    pub timestamp: String,
    pub method: String,
    pub path: String,
    pub client: String,
    pub allowed: bool,
    pub reason: String,
    /// Whether a deny was turned into a 403.
    pub enforced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub elapsed_us: u64,
    #[serde(skip)]
    start: Instant,
}

impl GuardLog {
    pub fn new(method: &str, path: &str, start: Instant) -> Self {
        GuardLog {
            request_id: Uuid::now_v7(),
            timestamp: Utc::now().to_rfc3339(),
            method: method.to_string(),
            path: path.to_string(),
            client: String::new(),
            allowed: false,
            reason: String::new(),
            enforced: false,
            status: None,
            elapsed_us: 0,
            start,
        }
    }

    pub fn record_decision(&mut self, result: &GuardResult) {
        self.client = result.client.clone();
        self.allowed = result.allowed;
        self.reason = result.reason.to_string();
    }

    pub fn set_enforced(&mut self) {
        self.enforced = true;
    }

    pub fn add_response(&mut self, status: u16) {
        self.status = Some(status);
    }

    pub fn finalize(&mut self) {
        self.elapsed_us = u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX);
    }

    /// Write the record as a JSON line.
    pub fn emit(&self) {
        match serde_json::to_string(self) {
            Ok(line) => tracing::info!(target: DECISION_TARGET, "{}", line),
            Err(e) => tracing::warn!("failed to serialize guard log: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipguard_core::evaluate_rules;

    #[test]
    fn test_log_records_decision() {
        let mut log = GuardLog::new("GET", "/files", Instant::now());
        log.record_decision(&evaluate_rules("10.0.0.0/8", "", "10.1.1.1"));
        log.add_response(200);
        log.finalize();

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["method"], "GET");
        assert_eq!(json["path"], "/files");
        assert_eq!(json["client"], "10.1.1.1");
        assert_eq!(json["allowed"], true);
        assert_eq!(json["reason"], "allowed:default(10.0.0.0/8)");
        assert_eq!(json["enforced"], false);
        assert_eq!(json["status"], 200);
        assert!(json["elapsed_us"].is_u64());
        assert!(json.get("start").is_none());
    }

    #[test]
    fn test_request_ids_are_v7_and_unique() {
        let a = GuardLog::new("GET", "/", Instant::now());
        let b = GuardLog::new("GET", "/", Instant::now());
        assert_eq!(a.request_id.get_version_num(), 7);
        assert_ne!(a.request_id, b.request_id);
        assert!(chrono::DateTime::parse_from_rfc3339(&a.timestamp).is_ok());
    }
}
