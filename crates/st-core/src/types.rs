//! Core type definitions for Site Tweaker
//!
//! These types map directly to the persisted settings JSON and are shared
//! by the resolver, the rule synthesizer and the runtime.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Response Headers
// =============================================================================

/// Response security headers that can be stripped for a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HeaderName {
    #[serde(rename = "content-security-policy")]
    ContentSecurityPolicy,
    #[serde(rename = "content-security-policy-report-only")]
    ContentSecurityPolicyReportOnly,
    #[serde(rename = "x-webkit-csp")]
    XWebkitCsp,
    #[serde(rename = "x-content-security-policy")]
    XContentSecurityPolicy,
    #[serde(rename = "x-content-security-policy-report-only")]
    XContentSecurityPolicyReportOnly,
    #[serde(rename = "x-webkit-csp-report-only")]
    XWebkitCspReportOnly,
    #[serde(rename = "report-to")]
    ReportTo,
    #[serde(rename = "reporting-endpoints")]
    ReportingEndpoints,
}

impl HeaderName {
    /// Every strippable header, in display order.
    pub const ALL: [HeaderName; 8] = [
        Self::ContentSecurityPolicy,
        Self::ContentSecurityPolicyReportOnly,
        Self::XWebkitCsp,
        Self::XContentSecurityPolicy,
        Self::XContentSecurityPolicyReportOnly,
        Self::XWebkitCspReportOnly,
        Self::ReportTo,
        Self::ReportingEndpoints,
    ];

    /// Wire name of the header (lowercase).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContentSecurityPolicy => "content-security-policy",
            Self::ContentSecurityPolicyReportOnly => "content-security-policy-report-only",
            Self::XWebkitCsp => "x-webkit-csp",
            Self::XContentSecurityPolicy => "x-content-security-policy",
            Self::XContentSecurityPolicyReportOnly => "x-content-security-policy-report-only",
            Self::XWebkitCspReportOnly => "x-webkit-csp-report-only",
            Self::ReportTo => "report-to",
            Self::ReportingEndpoints => "reporting-endpoints",
        }
    }

    /// Parse a header name, ignoring ASCII case.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|header| header.as_str().eq_ignore_ascii_case(name))
    }
}

/// "Strip this header" flags keyed by header name.
///
/// Unknown keys in stored settings are dropped; missing keys read as `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, bool>", into = "BTreeMap<String, bool>")]
pub struct HeaderSet {
    flags: BTreeMap<HeaderName, bool>,
}

impl HeaderSet {
    /// A set with every header flag cleared.
    pub fn none() -> Self {
        Self {
            flags: HeaderName::ALL.into_iter().map(|h| (h, false)).collect(),
        }
    }

    pub fn is_enabled(&self, header: HeaderName) -> bool {
        self.flags.get(&header).copied().unwrap_or(false)
    }

    pub fn set(&mut self, header: HeaderName, strip: bool) {
        self.flags.insert(header, strip);
    }

    /// Headers flagged for stripping, in [`HeaderName::ALL`] order.
    pub fn enabled(&self) -> Vec<HeaderName> {
        HeaderName::ALL
            .into_iter()
            .filter(|header| self.is_enabled(*header))
            .collect()
    }
}

impl Default for HeaderSet {
    fn default() -> Self {
        Self {
            flags: HeaderName::ALL.into_iter().map(|h| (h, true)).collect(),
        }
    }
}

impl From<BTreeMap<String, bool>> for HeaderSet {
    fn from(raw: BTreeMap<String, bool>) -> Self {
        let mut set = Self::none();
        for (name, strip) in raw {
            if let Some(header) = HeaderName::parse(&name) {
                set.set(header, strip);
            }
        }
        set
    }
}

impl From<HeaderSet> for BTreeMap<String, bool> {
    fn from(set: HeaderSet) -> Self {
        set.flags
            .into_iter()
            .map(|(header, strip)| (header.as_str().to_string(), strip))
            .collect()
    }
}

// =============================================================================
// Resource Types (bit mask for rule conditions)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUB_FRAME = 1 << 5;   // iframe/frame
        const MAIN_FRAME = 1 << 6;  // top-level document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;

        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUB_FRAME.bits();
    }
}

impl ResourceType {
    const NAMES: [(ResourceType, &'static str); 12] = [
        (Self::MAIN_FRAME, "main_frame"),
        (Self::SUB_FRAME, "sub_frame"),
        (Self::STYLESHEET, "stylesheet"),
        (Self::SCRIPT, "script"),
        (Self::IMAGE, "image"),
        (Self::FONT, "font"),
        (Self::OBJECT, "object"),
        (Self::XMLHTTPREQUEST, "xmlhttprequest"),
        (Self::PING, "ping"),
        (Self::MEDIA, "media"),
        (Self::WEBSOCKET, "websocket"),
        (Self::OTHER, "other"),
    ];

    /// Browser resource type strings for every bit set in the mask.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(ty, _)| self.contains(*ty))
            .map(|(_, name)| *name)
            .collect()
    }
}

// =============================================================================
// Scripts
// =============================================================================

/// How a script's code is delivered into the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    /// Executed in the page's own JavaScript context
    #[default]
    Js,
    /// Inserted as a stylesheet
    Css,
}

/// A user script owned by a [`Site`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(rename = "type", default)]
    pub kind: ScriptKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub auto_run: bool,
    /// Empty list matches every path.
    #[serde(default)]
    pub url_patterns: Vec<String>,
}

/// A user-declared site and the scripts attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    /// Normalized: lowercase, no scheme, no path, no leading `www.`
    pub domain: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub csp_enabled: bool,
    #[serde(default, deserialize_with = "lenient_list")]
    pub scripts: Vec<Script>,
}

impl Site {
    pub fn script(&self, script_id: &str) -> Option<&Script> {
        self.scripts.iter().find(|script| script.id == script_id)
    }
}

// =============================================================================
// Remote Sources
// =============================================================================

/// A script published by a remote [`Source`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceScript {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub auto_run: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Back-reference to the owning source
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csp_bypass: Option<Vec<String>>,
}

/// Environment variable declared by a source manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A remotely fetched bundle of scripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    pub last_fetched: Option<i64>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, deserialize_with = "lenient_list")]
    pub scripts: Vec<SourceScript>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    #[serde(default)]
    pub env_values: BTreeMap<String, String>,
}

impl Source {
    pub fn script(&self, script_id: &str) -> Option<&SourceScript> {
        self.scripts.iter().find(|script| script.id == script_id)
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Root configuration, persisted as a single value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub floating_ui_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_inject_enabled: bool,
    #[serde(default)]
    pub headers: HeaderSet,
    #[serde(default, deserialize_with = "lenient_list")]
    pub sites: Vec<Site>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub sources: Vec<Source>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            floating_ui_enabled: true,
            auto_inject_enabled: true,
            headers: HeaderSet::default(),
            sites: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl Settings {
    pub fn site(&self, site_id: &str) -> Option<&Site> {
        self.sites.iter().find(|site| site.id == site_id)
    }

    pub fn source(&self, source_id: &str) -> Option<&Source> {
        self.sources.iter().find(|source| source.id == source_id)
    }

    /// The enabled site registered for a normalized domain.
    pub fn enabled_site_for(&self, domain: &str) -> Option<&Site> {
        self.sites
            .iter()
            .find(|site| site.enabled && site.domain == domain)
    }
}

fn default_true() -> bool {
    true
}

/// Parse every entry of a stored array that can be parsed, dropping the rest
/// with a warning. Anything other than an array reads as empty.
pub(crate) fn skip_invalid<T: DeserializeOwned>(value: Option<&serde_json::Value>) -> Vec<T> {
    let Some(entries) = value.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match T::deserialize(entry) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("skipping unreadable stored record: {}", e);
                None
            }
        })
        .collect()
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(skip_invalid(Some(&raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_fill_missing_fields() {
        let settings: Settings = serde_json::from_str(r#"{"sites": []}"#).unwrap();
        assert!(settings.enabled);
        assert!(settings.auto_inject_enabled);
        assert_eq!(settings.headers.enabled().len(), 8);
    }

    #[test]
    fn test_header_set_ignores_unknown_keys() {
        let headers: HeaderSet = serde_json::from_str(
            r#"{"content-security-policy": true, "x-frame-options": true, "report-to": false}"#,
        )
        .unwrap();
        assert_eq!(headers.enabled(), vec![HeaderName::ContentSecurityPolicy]);
    }

    #[test]
    fn test_script_type_field() {
        let script: Script = serde_json::from_str(
            r#"{"id": "s1", "name": "Dark", "code": "body{}", "type": "css", "autoRun": true}"#,
        )
        .unwrap();
        assert_eq!(script.kind, ScriptKind::Css);
        assert!(script.enabled);
        assert!(script.url_patterns.is_empty());

        let json = serde_json::to_value(&script).unwrap();
        assert_eq!(json["type"], "css");
        assert_eq!(json["autoRun"], true);
    }

    #[test]
    fn test_unreadable_records_are_skipped() {
        let settings: Settings = serde_json::from_str(
            r#"{"sites": [
                {"id": "a", "domain": "keep.com", "scripts": [
                    {"id": "s1", "name": "Good"},
                    {"id": "s2", "name": 5}
                ]},
                {"domain": "no-id.com"}
            ], "sources": [
                {"id": "src1", "url": "https://github.com/a/b", "scripts": [
                    {"id": "x1", "name": "Orphan"}
                ]}
            ]}"#,
        )
        .unwrap();

        assert_eq!(settings.sites.len(), 1);
        assert_eq!(settings.sites[0].domain, "keep.com");
        assert_eq!(settings.sites[0].scripts.len(), 1);
        assert_eq!(settings.sources.len(), 1);
        assert!(settings.sources[0].scripts.is_empty());
    }

    #[test]
    fn test_resource_type_names() {
        assert_eq!(ResourceType::DOCUMENT.names(), vec!["main_frame", "sub_frame"]);
        assert_eq!((ResourceType::SCRIPT | ResourceType::PING).names(), vec!["script", "ping"]);
        assert!(ResourceType::empty().names().is_empty());
    }
}
