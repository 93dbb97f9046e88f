//! Rule token classification.
//!
//! Each token is tested against four lexical patterns in a fixed order and
//! takes the first that fits: CIDR, range, wildcard, exact address.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Serialize, Serializer};

use crate::address::Address;

const OCTET: &str = r"(?:25[0-5]|2[0-4]\d|[01]?\d?\d)";

/// One field of a wildcard pattern.
///
/// A fixed field keeps the digits as written: `01` and `1` are different
/// fields, the same way exact rules compare by text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OctetSpec {
    Fixed(String),
    Any,
}

impl OctetSpec {
    /// Whether a candidate field, as written, fits.
    pub fn admits(&self, field: &str) -> bool {
        match self {
            OctetSpec::Fixed(fixed) => fixed == field,
            OctetSpec::Any => true,
        }
    }
}

impl fmt::Display for OctetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OctetSpec::Fixed(field) => f.write_str(field),
            OctetSpec::Any => f.write_str("*"),
        }
    }
}

impl Serialize for OctetSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OctetSpec::Fixed(field) => serializer.serialize_str(field),
            OctetSpec::Any => serializer.serialize_str("*"),
        }
    }
}

/// The four rule notations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleToken {
    /// `a.b.c.d/p` with `p` in 0..=32.
    Cidr { network: Address, prefix: u8 },
    /// `a.b.c.d-e.f.g.h`; endpoints are stored ordered.
    Range { lo: Address, hi: Address },
    /// `a.b.*.*`; at least one field is `*`.
    Wildcard { octets: [OctetSpec; 4] },
    /// A plain dotted quad.
    Exact { address: Address },
}

impl RuleToken {
    /// Build a range from endpoints in either order.
    pub fn range(a: Address, b: Address) -> Self {
        RuleToken::Range { lo: a.min(b), hi: a.max(b) }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            RuleToken::Cidr { .. } => "cidr",
            RuleToken::Range { .. } => "range",
            RuleToken::Wildcard { .. } => "wildcard",
            RuleToken::Exact { .. } => "exact",
        }
    }
}

impl fmt::Display for RuleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleToken::Cidr { network, prefix } => write!(f, "{}/{}", network, prefix),
            RuleToken::Range { lo, hi } => write!(f, "{}-{}", lo, hi),
            RuleToken::Wildcard { octets } => write!(
                f,
                "{}.{}.{}.{}",
                octets[0], octets[1], octets[2], octets[3]
            ),
            RuleToken::Exact { address } => write!(f, "{}", address),
        }
    }
}

/// A classified token together with the text it was written as.
///
/// The text is what reason strings cite and what exact rules compare against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub text: String,
    pub token: RuleToken,
}

impl Rule {
    /// Classify a trimmed token. `None` when it fits no notation.
    pub fn parse(text: &str) -> Option<Rule> {
        let text = text.trim();
        classify(text).map(|token| Rule {
            text: text.to_string(),
            token,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Lexical patterns
// ═══════════════════════════════════════════════════════════════════════════

fn compile(pattern: String) -> Option<Regex> {
    Regex::new(&pattern).ok()
}

fn ipv4() -> String {
    format!(r"{o}\.{o}\.{o}\.{o}", o = OCTET)
}

fn cidr_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(format!(r"^({})/(\d{{1,2}})$", ipv4())))
        .as_ref()
}

fn range_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(format!(r"^({ip})\s*[-~]\s*({ip})$", ip = ipv4())))
        .as_ref()
}

fn wildcard_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        compile(format!(
            r"^({o}|\*)\.({o}|\*)\.({o}|\*)\.({o}|\*)$",
            o = OCTET
        ))
    })
    .as_ref()
}

fn exact_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(format!(r"^{}$", ipv4()))).as_ref()
}

fn classify_cidr(token: &str) -> Option<RuleToken> {
    let caps = cidr_regex()?.captures(token)?;
    let network = Address::parse(caps.get(1)?.as_str()).ok()?;
    let prefix: u8 = caps.get(2)?.as_str().parse().ok()?;
    if prefix > 32 {
        return None;
    }
    Some(RuleToken::Cidr { network, prefix })
}

fn classify_range(token: &str) -> Option<RuleToken> {
    let caps = range_regex()?.captures(token)?;
    let start = Address::parse(caps.get(1)?.as_str()).ok()?;
    let end = Address::parse(caps.get(2)?.as_str()).ok()?;
    Some(RuleToken::range(start, end))
}

fn classify_wildcard(token: &str) -> Option<RuleToken> {
    let caps = wildcard_regex()?.captures(token)?;
    let mut fields = Vec::with_capacity(4);
    for i in 1..=4 {
        match caps.get(i)?.as_str() {
            "*" => fields.push(OctetSpec::Any),
            field => fields.push(OctetSpec::Fixed(field.to_string())),
        }
    }
    // Without a `*` the token is a plain address.
    if !fields.contains(&OctetSpec::Any) {
        return None;
    }
    let octets: [OctetSpec; 4] = fields.try_into().ok()?;
    Some(RuleToken::Wildcard { octets })
}

fn classify_exact(token: &str) -> Option<RuleToken> {
    if !exact_regex()?.is_match(token) {
        return None;
    }
    Address::parse(token)
        .ok()
        .map(|address| RuleToken::Exact { address })
}

/// Classify a single trimmed token. First matching notation wins.
pub fn classify(token: &str) -> Option<RuleToken> {
    classify_cidr(token)
        .or_else(|| classify_range(token))
        .or_else(|| classify_wildcard(token))
        .or_else(|| classify_exact(token))
}

/// Whether a token fits any notation.
pub fn is_classifiable(token: &str) -> bool {
    classify(token).is_some()
}
