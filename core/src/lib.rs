//! # IP Guard Core
//!
//! IPv4 allow-list rule engine.
//!
//! Rule text mixes four notations, separated by `,`, `|`, `;` or line breaks:
//!
//! ```text
//! 203.0.113.7                 exact address
//! 10.0.0.0/8                  CIDR block
//! 172.30.1.10-172.30.1.20     inclusive range (`~` also accepted)
//! 192.168.1.*                 octet wildcard
//! ```
//!
//! Rules come from two sources, an operator default and an optional allow
//! file. They are merged as `default|file`; the verdict is any-match over the
//! merged text, and the reason names the first matching rule, probing the
//! file half before the default half.
//!
//! ## Modules
//!
//! - `address` - IPv4 model and IPv6 loopback / mapped normalization
//! - `tokenizer` - Separator splitting and `~` range normalization
//! - `classify` - Token classification into rule notations
//! - `matcher` - Membership tests
//! - `ruleset` - Merged default + file rule set
//! - `guard` - Verdict and reason
//! - `validate` - Strict validation with positional errors
//! - `wasm` - WebAssembly bindings for JavaScript

mod address;
mod classify;
mod guard;
mod matcher;
mod ruleset;
mod tokenizer;
mod validate;
pub mod wasm;

pub use address::*;
pub use classify::*;
pub use guard::*;
pub use matcher::*;
pub use ruleset::*;
pub use tokenizer::*;
pub use validate::*;
