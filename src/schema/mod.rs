//! Schema module - rule descriptors, rule-string parsing, boundary policies and
//! run configuration.

mod boundary;
mod config;
mod rule;
mod rulestring;
mod seed;

pub use boundary::*;
pub use config::*;
pub use rule::*;
pub use rulestring::*;
pub use seed::*;
