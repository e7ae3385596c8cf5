//! Site Tweaker Rule Synthesizer
//!
//! This crate compiles the settings into the single declarative rule that
//! strips response security headers for the configured domains.

pub mod builder;
pub mod optimizer;

pub use builder::{build_rule, synthesize, HeaderRule, CSP_RULE_ID, CSP_RULE_PRIORITY};
pub use optimizer::{collect_domains, expand_domains};
