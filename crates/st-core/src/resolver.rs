//! Script resolution
//!
//! Given the settings and a page's (domain, path), work out which site and
//! source scripts apply, and split them into auto-run and manual sets.

use serde::Serialize;

use crate::pattern::{matches_domain, matches_path, matches_url};
use crate::types::{Script, ScriptKind, Settings, Site, SourceScript};

// =============================================================================
// Script Identity
// =============================================================================

/// Where a resolved script comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptOrigin {
    Site,
    Source,
}

/// Enough to look a script up again later: owner kind, owner id, script id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptIdentity {
    pub origin: ScriptOrigin,
    pub owner_id: String,
    pub script_id: String,
}

impl ScriptIdentity {
    pub fn site(site_id: &str, script_id: &str) -> Self {
        Self {
            origin: ScriptOrigin::Site,
            owner_id: site_id.to_string(),
            script_id: script_id.to_string(),
        }
    }

    pub fn source(source_id: &str, script_id: &str) -> Self {
        Self {
            origin: ScriptOrigin::Source,
            owner_id: source_id.to_string(),
            script_id: script_id.to_string(),
        }
    }
}

/// A script ready for delivery, detached from the settings it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedScript {
    pub identity: ScriptIdentity,
    pub name: String,
    pub code: String,
    pub kind: ScriptKind,
    pub auto_run: bool,
}

impl ResolvedScript {
    pub fn from_site(site: &Site, script: &Script) -> Self {
        Self {
            identity: ScriptIdentity::site(&site.id, &script.id),
            name: script.name.clone(),
            code: script.code.clone(),
            kind: script.kind,
            auto_run: script.auto_run,
        }
    }

    /// Source scripts are always JavaScript.
    pub fn from_source(script: &SourceScript) -> Self {
        Self {
            identity: ScriptIdentity::source(&script.source_id, &script.id),
            name: script.name.clone(),
            code: script.code.clone(),
            kind: ScriptKind::Js,
            auto_run: script.auto_run,
        }
    }
}

// =============================================================================
// Matches
// =============================================================================

/// Scripts applicable to one (domain, path).
#[derive(Debug, Clone, Default)]
pub struct ScriptMatches<'a> {
    /// The enabled site registered for the domain, if any
    pub site: Option<&'a Site>,
    /// Enabled scripts of that site, not yet filtered by URL pattern
    pub site_scripts: Vec<&'a Script>,
    /// Enabled scripts of enabled sources whose domain and path patterns match
    pub source_scripts: Vec<&'a SourceScript>,
}

impl<'a> ScriptMatches<'a> {
    pub fn is_empty(&self) -> bool {
        self.site_scripts.is_empty() && self.source_scripts.is_empty()
    }

    /// Auto-run scripts in delivery order: site scripts, then source scripts.
    ///
    /// Site scripts are filtered here by their URL patterns against `url`.
    pub fn auto_run(&self, url: &str) -> Vec<ResolvedScript> {
        let mut out = Vec::new();
        if let Some(site) = self.site {
            out.extend(
                self.site_scripts
                    .iter()
                    .filter(|script| script.auto_run && matches_url(url, &script.url_patterns))
                    .map(|script| ResolvedScript::from_site(site, script)),
            );
        }
        out.extend(
            self.source_scripts
                .iter()
                .filter(|script| script.auto_run)
                .map(|script| ResolvedScript::from_source(script)),
        );
        out
    }

    /// Enabled scripts that only run on explicit request.
    pub fn manual(&self) -> Vec<ResolvedScript> {
        let mut out = Vec::new();
        if let Some(site) = self.site {
            out.extend(
                self.site_scripts
                    .iter()
                    .filter(|script| !script.auto_run)
                    .map(|script| ResolvedScript::from_site(site, script)),
            );
        }
        out.extend(
            self.source_scripts
                .iter()
                .filter(|script| !script.auto_run)
                .map(|script| ResolvedScript::from_source(script)),
        );
        out
    }
}

/// Resolve the scripts applicable to a normalized domain and a path.
///
/// Returns nothing when the extension is globally disabled.
pub fn resolve<'a>(settings: &'a Settings, domain: &str, path: &str) -> ScriptMatches<'a> {
    if !settings.enabled {
        return ScriptMatches::default();
    }

    let site = settings.enabled_site_for(domain);
    let site_scripts = site
        .map(|site| site.scripts.iter().filter(|script| script.enabled).collect())
        .unwrap_or_default();

    ScriptMatches {
        site,
        site_scripts,
        source_scripts: matching_source_scripts(settings, domain, path),
    }
}

/// Enabled source scripts whose domain and path patterns match.
///
/// No deduplication by name across sources; identity is (source, script).
pub fn matching_source_scripts<'a>(
    settings: &'a Settings,
    domain: &str,
    path: &str,
) -> Vec<&'a SourceScript> {
    settings
        .sources
        .iter()
        .filter(|source| source.enabled)
        .flat_map(|source| source.scripts.iter())
        .filter(|script| {
            script.enabled
                && script
                    .domains
                    .iter()
                    .any(|pattern| matches_domain(domain, pattern))
                && matches_path(path, &script.paths)
        })
        .collect()
}

// =============================================================================
// Page Data
// =============================================================================

/// Data handed to the in-page floating UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteData {
    pub site: Option<Site>,
    pub scripts: Vec<Script>,
    pub source_scripts: Vec<SourceScript>,
}

/// Site data for a page, or `None` when there is nothing to show.
///
/// Gated on both the global toggle and the floating UI toggle.
pub fn site_data_for_page(settings: &Settings, domain: &str, path: &str) -> Option<SiteData> {
    if !settings.enabled || !settings.floating_ui_enabled {
        return None;
    }

    let path = if path.is_empty() { "/" } else { path };
    let matches = resolve(settings, domain, path);
    if matches.site.is_none() && matches.source_scripts.is_empty() {
        return None;
    }

    Some(SiteData {
        site: matches.site.cloned(),
        scripts: matches.site_scripts.into_iter().cloned().collect(),
        source_scripts: matches.source_scripts.into_iter().cloned().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Source;

    fn script(id: &str, auto_run: bool, enabled: bool, patterns: &[&str]) -> Script {
        Script {
            id: id.to_string(),
            name: id.to_uppercase(),
            code: format!("console.log('{}')", id),
            kind: ScriptKind::Js,
            enabled,
            auto_run,
            url_patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn source_script(source_id: &str, id: &str, auto_run: bool, domains: &[&str], paths: &[&str]) -> SourceScript {
        SourceScript {
            id: id.to_string(),
            name: id.to_uppercase(),
            code: String::new(),
            auto_run,
            domains: domains.iter().map(|d| d.to_string()).collect(),
            paths: paths.iter().map(|p| p.to_string()).collect(),
            enabled: true,
            source_id: source_id.to_string(),
            csp_bypass: None,
        }
    }

    fn source(id: &str, scripts: Vec<SourceScript>) -> Source {
        Source {
            id: id.to_string(),
            url: format!("https://github.com/acme/{}", id),
            token: None,
            name: id.to_string(),
            description: String::new(),
            enabled: true,
            last_fetched: None,
            last_error: None,
            version: "1.0.0".to_string(),
            scripts,
            env: Vec::new(),
            env_values: Default::default(),
        }
    }

    fn settings() -> Settings {
        Settings {
            sites: vec![Site {
                id: "site1".to_string(),
                domain: "foo.com".to_string(),
                enabled: true,
                csp_enabled: true,
                scripts: vec![
                    script("a", true, true, &[]),
                    script("b", true, true, &["/app"]),
                    script("m", false, true, &[]),
                    script("off", true, false, &[]),
                ],
            }],
            sources: vec![
                source("src1", vec![
                    source_script("src1", "c", true, &["*.foo.com"], &[]),
                    source_script("src1", "d", false, &["foo.com"], &["/docs/*"]),
                ]),
                source("src2", vec![source_script("src2", "c", true, &["bar.com"], &[])]),
            ],
            ..Settings::default()
        }
    }

    #[test]
    fn test_resolve_site_and_sources() {
        let settings = settings();
        let matches = resolve(&settings, "foo.com", "/app/home");
        assert_eq!(matches.site.map(|s| s.id.as_str()), Some("site1"));
        let site_ids: Vec<_> = matches.site_scripts.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(site_ids, vec!["a", "b", "m"]);
        let source_ids: Vec<_> = matches.source_scripts.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(source_ids, vec!["c"]);
    }

    #[test]
    fn test_auto_run_order_and_url_patterns() {
        let settings = settings();
        let matches = resolve(&settings, "foo.com", "/app/home");
        let names: Vec<_> = matches
            .auto_run("https://foo.com/app/home")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["A", "B", "C"]);

        let matches = resolve(&settings, "foo.com", "/other");
        let names: Vec<_> = matches
            .auto_run("https://foo.com/other")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["A", "C"]);
    }

    #[test]
    fn test_manual_subset() {
        let settings = settings();
        let manual = resolve(&settings, "foo.com", "/docs/intro").manual();
        let ids: Vec<_> = manual.iter().map(|s| s.identity.clone()).collect();
        assert_eq!(
            ids,
            vec![ScriptIdentity::site("site1", "m"), ScriptIdentity::source("src1", "d")]
        );
    }

    #[test]
    fn test_globally_disabled_resolves_nothing() {
        let mut settings = settings();
        settings.enabled = false;
        assert!(resolve(&settings, "foo.com", "/").is_empty());
    }

    #[test]
    fn test_disabled_source_is_skipped() {
        let mut settings = settings();
        settings.sources[0].enabled = false;
        let matches = resolve(&settings, "api.foo.com", "/");
        assert!(matches.site.is_none());
        assert!(matches.source_scripts.is_empty());
    }

    #[test]
    fn test_same_script_id_in_two_sources() {
        let mut settings = settings();
        settings.sources[1].scripts[0].domains = vec!["foo.com".to_string()];
        let matches = resolve(&settings, "foo.com", "/");
        let owners: Vec<_> = matches.source_scripts.iter().map(|s| s.source_id.as_str()).collect();
        assert_eq!(owners, vec!["src1", "src2"]);
    }

    #[test]
    fn test_site_data_for_page() {
        let mut settings = settings();
        let data = site_data_for_page(&settings, "foo.com", "").unwrap();
        assert_eq!(data.scripts.len(), 3);
        assert_eq!(data.source_scripts.len(), 1);

        assert!(site_data_for_page(&settings, "unknown.org", "/").is_none());

        settings.floating_ui_enabled = false;
        assert!(site_data_for_page(&settings, "foo.com", "/").is_none());
    }
}
