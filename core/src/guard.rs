//! Guard decision: verdict plus a reason naming the matched rule.
//!
//! The verdict walks the merged rules (default first). The reason probes the
//! file half first and then the default half, so a candidate admitted by both
//! is reported as a user (file) match.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::address::normalize_candidate;
use crate::ruleset::{Provenance, RuleSet};

/// Why a candidate was admitted or refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasonTag {
    /// Matched a file-provenance rule (the rule text).
    AllowedUser(String),
    /// Matched a default-provenance rule (the rule text).
    AllowedDefault(String),
    DeniedNoMatch,
    /// The candidate is an IPv6 literal with no IPv4 form.
    DeniedUnsupportedFormat(String),
}

impl ReasonTag {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ReasonTag::AllowedUser(_) | ReasonTag::AllowedDefault(_))
    }
}

impl fmt::Display for ReasonTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonTag::AllowedUser(token) => write!(f, "allowed:user({})", token),
            ReasonTag::AllowedDefault(token) => write!(f, "allowed:default({})", token),
            ReasonTag::DeniedNoMatch => f.write_str("denied:no-match"),
            ReasonTag::DeniedUnsupportedFormat(addr) => {
                write!(f, "denied:ip-format-not-supported({})", addr)
            }
        }
    }
}

impl Serialize for ReasonTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of evaluating one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardResult {
    /// Candidate after IPv6 loopback / mapped normalization.
    pub client: String,
    pub allowed: bool,
    pub reason: ReasonTag,
}

/// Derive the reason for a normalized candidate.
pub fn reason_for(rules: &RuleSet, candidate: &str) -> ReasonTag {
    if let Some(rule) = rules.matched(Provenance::File, candidate) {
        return ReasonTag::AllowedUser(rule.text.clone());
    }
    if let Some(rule) = rules.matched(Provenance::Default, candidate) {
        return ReasonTag::AllowedDefault(rule.text.clone());
    }
    if candidate.contains(':') {
        return ReasonTag::DeniedUnsupportedFormat(candidate.to_string());
    }
    ReasonTag::DeniedNoMatch
}

/// Evaluate a raw client address against a compiled rule set.
pub fn evaluate(rules: &RuleSet, raw_address: &str) -> GuardResult {
    let client = normalize_candidate(raw_address);
    let allowed = rules.is_allowed(&client);
    let reason = reason_for(rules, &client);
    GuardResult {
        client,
        allowed,
        reason,
    }
}

/// Compile `default` and `file` rule text and evaluate one address.
pub fn evaluate_rules(default_rules: &str, file_rules: &str, raw_address: &str) -> GuardResult {
    evaluate(&RuleSet::compile(default_rules, file_rules), raw_address)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RFC1918: &str = "10.0.0.0~10.255.255.255|172.16.0.0~172.31.255.255|192.168.0.0~192.168.255.255";

    #[test]
    fn test_scenario_b_file_rule_reported_first() {
        let result = evaluate_rules(RFC1918, "172.30.1.10-173.30.1.45", "172.30.1.20");
        assert!(result.allowed);
        assert_eq!(result.reason.to_string(), "allowed:user(172.30.1.10-173.30.1.45)");
    }

    #[test]
    fn test_scenario_c_default_rule() {
        let result = evaluate_rules(RFC1918, "", "192.168.1.10");
        assert!(result.allowed);
        assert_eq!(
            result.reason.to_string(),
            "allowed:default(192.168.0.0-192.168.255.255)"
        );
    }

    #[test]
    fn test_scenario_d_no_match() {
        let result = evaluate_rules(RFC1918, "172.30.1.10-173.30.1.45", "8.8.8.8");
        assert!(!result.allowed);
        assert_eq!(result.reason, ReasonTag::DeniedNoMatch);
        assert_eq!(result.reason.to_string(), "denied:no-match");
    }

    #[test]
    fn test_unsupported_ipv6() {
        let result = evaluate_rules(RFC1918, "", "2001:db8::1");
        assert!(!result.allowed);
        assert_eq!(result.client, "2001:db8::1");
        assert_eq!(
            result.reason.to_string(),
            "denied:ip-format-not-supported(2001:db8::1)"
        );
    }

    #[test]
    fn test_loopback_and_mapped_are_rewritten() {
        let result = evaluate_rules("127.0.0.1", "", "::1");
        assert_eq!(result.client, "127.0.0.1");
        assert!(result.allowed);
        assert_eq!(result.reason.to_string(), "allowed:default(127.0.0.1)");

        let result = evaluate_rules(RFC1918, "", "::ffff:192.168.0.5");
        assert_eq!(result.client, "192.168.0.5");
        assert!(result.allowed);
    }

    #[test]
    fn test_verdict_agrees_with_reason() {
        let set = RuleSet::compile(RFC1918, "203.0.113.*|junk");
        for candidate in ["10.1.1.1", "203.0.113.9", "8.8.4.4", "::1", "fe80::1", ""] {
            let result = evaluate(&set, candidate);
            assert_eq!(result.allowed, result.reason.is_allowed(), "{:?}", candidate);
        }
    }

    #[test]
    fn test_blank_candidate_denied() {
        let result = evaluate_rules(RFC1918, "", "   ");
        assert!(!result.allowed);
        assert_eq!(result.client, "");
        assert_eq!(result.reason, ReasonTag::DeniedNoMatch);
    }

    #[test]
    fn test_result_serializes_reason_as_string() {
        let result = evaluate_rules("10.0.0.0/8", "", "10.0.0.1");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["client"], "10.0.0.1");
        assert_eq!(json["allowed"], true);
        assert_eq!(json["reason"], "allowed:default(10.0.0.0/8)");
    }
}
