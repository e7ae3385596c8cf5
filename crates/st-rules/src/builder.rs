//! Header-stripping rule construction
//!
//! At most one rule exists at a time, always under [`CSP_RULE_ID`]. It is
//! serialized in the browser's declarative network request shape:
//!
//! ```json
//! {
//!   "id": 1,
//!   "priority": 1,
//!   "action": {
//!     "type": "modifyHeaders",
//!     "responseHeaders": [{ "header": "content-security-policy", "operation": "remove" }]
//!   },
//!   "condition": {
//!     "requestDomains": ["foo.com", "www.foo.com"],
//!     "resourceTypes": ["main_frame", "sub_frame"]
//!   }
//! }
//! ```

use serde::{Serialize, Serializer};

use st_core::{HeaderName, ResourceType, Settings};

use crate::optimizer::{collect_domains, expand_domains};

/// Fixed id of the header-stripping rule.
pub const CSP_RULE_ID: u32 = 1;
/// Fixed priority of the header-stripping rule.
pub const CSP_RULE_PRIORITY: u32 = 1;

/// The single declarative rule stripping response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub id: u32,
    pub priority: u32,
    /// Response headers removed, in [`HeaderName::ALL`] order
    pub remove_headers: Vec<HeaderName>,
    /// Each configured domain and its `www.` subdomain
    pub request_domains: Vec<String>,
    /// Always main-document and sub-document loads
    pub resource_types: ResourceType,
}

impl HeaderRule {
    /// JSON value in the declarative network request shape.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// =============================================================================
// Declarative Shape
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DnrRule<'a> {
    id: u32,
    priority: u32,
    action: DnrAction<'a>,
    condition: DnrCondition<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DnrAction<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    response_headers: Vec<DnrHeaderOp<'a>>,
}

#[derive(Serialize)]
struct DnrHeaderOp<'a> {
    header: &'a str,
    operation: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DnrCondition<'a> {
    request_domains: &'a [String],
    resource_types: Vec<&'static str>,
}

impl Serialize for HeaderRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DnrRule {
            id: self.id,
            priority: self.priority,
            action: DnrAction {
                kind: "modifyHeaders",
                response_headers: self
                    .remove_headers
                    .iter()
                    .map(|header| DnrHeaderOp {
                        header: header.as_str(),
                        operation: "remove",
                    })
                    .collect(),
            },
            condition: DnrCondition {
                request_domains: &self.request_domains,
                resource_types: self.resource_types.names(),
            },
        }
        .serialize(serializer)
    }
}

// =============================================================================
// Synthesis
// =============================================================================

/// Build the rule for a domain set and header set.
///
/// Either set being empty means no rule.
pub fn build_rule(domains: &[String], headers: &[HeaderName]) -> Option<HeaderRule> {
    if domains.is_empty() || headers.is_empty() {
        return None;
    }

    Some(HeaderRule {
        id: CSP_RULE_ID,
        priority: CSP_RULE_PRIORITY,
        remove_headers: headers.to_vec(),
        request_domains: expand_domains(domains),
        resource_types: ResourceType::DOCUMENT,
    })
}

/// Derive the active rule from settings, or `None` when no rule should exist.
pub fn synthesize(settings: &Settings) -> Option<HeaderRule> {
    if !settings.enabled {
        log::debug!("extension disabled, no header rule");
        return None;
    }

    let domains = collect_domains(settings);
    let headers = settings.headers.enabled();
    let rule = build_rule(&domains, &headers);

    log::debug!(
        "header rule: {} domains, {} headers, active={}",
        domains.len(),
        headers.len(),
        rule.is_some()
    );
    rule
}
