//! WASM bindings for ipguard-core.
//!
//! Lets a browser-side rule editor validate, classify and try rules with the
//! same engine the gate runs.

use serde::Serialize;
use wasm_bindgen::prelude::*;

use crate::{classify, evaluate_rules, invalid_tokens, to_ipv4_if_possible, InvalidToken, INVALID_IP_FORMAT};

// ═══════════════════════════════════════════════════════════════════════════
// Validation API
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct ValidationReport {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    invalid: Vec<InvalidToken>,
}

/// Validate rule text. Returns a JSON report listing every invalid token.
#[wasm_bindgen(js_name = validateRules)]
pub fn validate_rules(rules: &str) -> Result<String, JsError> {
    let invalid = invalid_tokens(rules);
    let report = ValidationReport {
        valid: invalid.is_empty(),
        code: (!invalid.is_empty()).then_some(INVALID_IP_FORMAT),
        invalid,
    };
    serde_json::to_string(&report).map_err(|e| JsError::new(&e.to_string()))
}

/// Classify a single token. Returns the token object, or `null` when it fits
/// no notation.
#[wasm_bindgen(js_name = classifyToken)]
pub fn classify_token(token: &str) -> Result<JsValue, JsError> {
    match classify(token.trim()) {
        Some(kind) => serde_wasm_bindgen::to_value(&kind).map_err(|e| JsError::new(&e.to_string())),
        None => Ok(JsValue::NULL),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Evaluation API
// ═══════════════════════════════════════════════════════════════════════════

/// Evaluate an address against default and file rule text.
/// Returns `{client, allowed, reason}` as JSON.
#[wasm_bindgen(js_name = evaluateAddress)]
pub fn evaluate_address(default_rules: &str, file_rules: &str, address: &str) -> Result<String, JsError> {
    let result = evaluate_rules(default_rules, file_rules, address);
    serde_json::to_string(&result).map_err(|e| JsError::new(&e.to_string()))
}

/// IPv4 form of an address literal, or `undefined` for unsupported IPv6.
#[wasm_bindgen(js_name = normalizeAddress)]
pub fn normalize_address(address: &str) -> Option<String> {
    to_ipv4_if_possible(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rules_report() {
        let json: serde_json::Value =
            serde_json::from_str(&validate_rules("10.0.0.0/8|bogus").unwrap()).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["code"], "INVALID_IP_FORMAT");
        assert_eq!(json["invalid"][0]["position"], 2);
        assert_eq!(json["invalid"][0]["token"], "bogus");

        let json: serde_json::Value =
            serde_json::from_str(&validate_rules("10.0.0.0/8").unwrap()).unwrap();
        assert_eq!(json["valid"], true);
        assert!(json.get("code").is_none());
    }

    #[test]
    fn test_evaluate_address_json() {
        let json: serde_json::Value =
            serde_json::from_str(&evaluate_address("10.0.0.0/8", "8.8.8.8", "8.8.8.8").unwrap()).unwrap();
        assert_eq!(json["allowed"], true);
        assert_eq!(json["reason"], "allowed:user(8.8.8.8)");
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("::1").as_deref(), Some("127.0.0.1"));
        assert_eq!(normalize_address("2001:db8::1"), None);
    }
}
