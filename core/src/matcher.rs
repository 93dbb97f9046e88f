//! Rule membership tests.
//!
//! Every function here is total: a malformed candidate or an unclassifiable
//! token is "no match", never an error.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::address::Address;
use crate::classify::{classify, Rule, RuleToken};
use crate::tokenizer::tokenize;

impl RuleToken {
    /// Membership of a parsed address.
    ///
    /// `Exact` compares numerically here and wildcard fields see the
    /// canonical spelling of each octet. [`Rule::matches`] compares both
    /// against the candidate text as written.
    pub fn contains(&self, candidate: Address) -> bool {
        match self {
            RuleToken::Cidr { network, prefix } => {
                Ipv4Net::new(Ipv4Addr::from(*network), *prefix)
                    .map(|net| net.contains(&Ipv4Addr::from(candidate)))
                    .unwrap_or(false)
            }
            RuleToken::Range { lo, hi } => {
                let (lo, hi) = ((*lo).min(*hi), (*lo).max(*hi));
                lo <= candidate && candidate <= hi
            }
            RuleToken::Wildcard { octets } => octets
                .iter()
                .zip(candidate.octets())
                .all(|(spec, value)| spec.admits(&value.to_string())),
            RuleToken::Exact { address } => *address == candidate,
        }
    }
}

impl Rule {
    /// Whether a normalized candidate literal falls under this rule.
    ///
    /// Exact rules match on string equality with the rule text, so
    /// `10.0.0.01` does not match a candidate of `10.0.0.1`. Fixed wildcard
    /// fields compare the same way, field by field.
    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        if candidate.contains(':') {
            return false;
        }
        let Ok(addr) = Address::parse(candidate) else {
            return false;
        };
        match &self.token {
            RuleToken::Exact { .. } => candidate == self.text,
            RuleToken::Wildcard { octets } => candidate
                .split('.')
                .zip(octets.iter())
                .all(|(field, spec)| spec.admits(field)),
            token => token.contains(addr),
        }
    }
}

/// Lenient single-token match: unclassifiable tokens never match.
pub fn token_matches(candidate: &str, token: &str) -> bool {
    Rule::parse(token).is_some_and(|rule| rule.matches(candidate))
}

/// First token of `rules`, in textual order, that admits `candidate`.
pub fn find_matched_token<'a>(candidate: &str, rules: &'a str) -> Option<&'a str> {
    tokenize(rules)
        .into_iter()
        .find(|token| token_matches(candidate, token))
}

/// Any-match verdict over a rule string.
pub fn is_allowed(candidate: &str, rules: &str) -> bool {
    find_matched_token(candidate, rules).is_some()
}

/// Classify every token of `rules`, skipping the unclassifiable ones.
pub fn compile_rules(rules: &str) -> Vec<Rule> {
    tokenize(rules)
        .into_iter()
        .filter_map(|token| {
            classify(token).map(|kind| Rule {
                text: token.to_string(),
                token: kind,
            })
        })
        .collect()
}
