//! Domain and path pattern matching
//!
//! Domain patterns are either an exact domain or `*.base`, which matches
//! `base` itself and any subdomain of it. Path patterns come in three forms:
//!
//! - `^...` is a regular expression searched in the path
//! - anything containing `*` is a glob, anchored at both ends
//! - everything else is a literal prefix
//!
//! A pattern that fails to compile never matches.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use fancy_regex::Regex;

use crate::url::path_and_query;

/// Compiled patterns kept across navigations; cleared wholesale when full.
const PATTERN_CACHE_LIMIT: usize = 512;
static PATTERN_CACHE: OnceLock<Mutex<HashMap<String, Option<Regex>>>> = OnceLock::new();

/// Check a normalized domain against one domain pattern.
///
/// Comparison is case-sensitive; domains are normalized upstream.
pub fn matches_domain(domain: &str, pattern: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            domain == base
                || (domain.len() > base.len()
                    && domain.ends_with(base)
                    && domain.as_bytes()[domain.len() - base.len() - 1] == b'.')
        }
        None => domain == pattern,
    }
}

/// Check a path (pathname + query) against a list of path patterns.
///
/// An empty list matches every path; otherwise any matching pattern wins.
pub fn matches_path<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    patterns
        .iter()
        .any(|pattern| matches_path_pattern(path, pattern.as_ref()))
}

/// Check a full page URL against a script's URL patterns.
///
/// A URL without a usable host fails closed.
pub fn matches_url<S: AsRef<str>>(url: &str, patterns: &[S]) -> bool {
    if patterns.is_empty() {
        return true;
    }
    match path_and_query(url) {
        Some(path) => matches_path(&path, patterns),
        None => false,
    }
}

fn matches_path_pattern(path: &str, pattern: &str) -> bool {
    if pattern.starts_with('^') {
        return regex_matches(pattern, path);
    }
    if pattern.contains('*') {
        return regex_matches(&glob_to_regex(pattern), path);
    }
    path.starts_with(pattern)
}

/// Lookaround and backreferences are supported, so patterns written for
/// browser `RegExp` behave the same here.
fn regex_matches(source: &str, path: &str) -> bool {
    let Some(re) = compiled(source) else {
        return false;
    };
    match re.is_match(path) {
        Ok(matched) => matched,
        Err(e) => {
            log::warn!("path pattern {:?} gave up on {:?}: {}", source, path, e);
            false
        }
    }
}

fn compiled(source: &str) -> Option<Regex> {
    let cache = PATTERN_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if let Some(entry) = cache.get(source) {
        return entry.clone();
    }

    let entry = match Regex::new(source) {
        Ok(re) => Some(re),
        Err(e) => {
            log::warn!("ignoring invalid path pattern {:?}: {}", source, e);
            None
        }
    };
    if cache.len() >= PATTERN_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(source.to_string(), entry.clone());
    entry
}

fn glob_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(fancy_regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{}$", body)
}
