//! Mutations on the settings tree
//!
//! Every mutation keeps the tree's invariants: site domains are unique and
//! normalized, source ids are unique, and removing a site removes its scripts.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::id::generate_id;
use crate::types::{skip_invalid, Script, ScriptKind, Settings, Site, Source, SourceScript};
use crate::url::normalize_domain;

/// Error type for settings lookups and mutations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("Site not found")]
    SiteNotFound,
    #[error("Script not found")]
    ScriptNotFound,
    #[error("Source not found")]
    SourceNotFound,
    #[error("Invalid domain: {0:?}")]
    InvalidDomain(String),
    #[error("Failed to generate id: {0}")]
    Id(String),
}

impl From<getrandom::Error> for SettingsError {
    fn from(e: getrandom::Error) -> Self {
        Self::Id(e.to_string())
    }
}

/// Fields for a new site script; everything else takes defaults.
#[derive(Debug, Clone, Default)]
pub struct ScriptDraft {
    pub name: Option<String>,
    pub code: String,
    pub kind: ScriptKind,
    pub auto_run: bool,
    pub url_patterns: Vec<String>,
}

impl Settings {
    /// Interpret a raw stored value. Anything without a `sites` array is
    /// treated as never saved.
    ///
    /// Unreadable records are skipped one by one and a mistyped top-level
    /// field falls back to its default, so one bad entry never costs the
    /// rest of the tree.
    pub fn from_stored(stored: Option<serde_json::Value>) -> Self {
        let value = match stored {
            Some(value) if value.get("sites").map_or(false, |s| s.is_array()) => value,
            _ => return Self::default(),
        };

        match Self::deserialize(&value) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("stored settings partly unreadable: {}", e);
                Self::salvage(&value)
            }
        }
    }

    fn salvage(value: &serde_json::Value) -> Self {
        let defaults = Self::default();
        Self {
            enabled: stored_field(value, "enabled").unwrap_or(defaults.enabled),
            floating_ui_enabled: stored_field(value, "floatingUiEnabled")
                .unwrap_or(defaults.floating_ui_enabled),
            auto_inject_enabled: stored_field(value, "autoInjectEnabled")
                .unwrap_or(defaults.auto_inject_enabled),
            headers: stored_field(value, "headers").unwrap_or(defaults.headers),
            sites: skip_invalid(value.get("sites")),
            sources: skip_invalid(value.get("sources")),
        }
    }

    // -------------------------------------------------------------------------
    // Global toggles
    // -------------------------------------------------------------------------

    pub fn toggle_global(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.enabled
    }

    pub fn toggle_floating_ui(&mut self) -> bool {
        self.floating_ui_enabled = !self.floating_ui_enabled;
        self.floating_ui_enabled
    }

    pub fn toggle_auto_inject(&mut self) -> bool {
        self.auto_inject_enabled = !self.auto_inject_enabled;
        self.auto_inject_enabled
    }

    // -------------------------------------------------------------------------
    // Sites
    // -------------------------------------------------------------------------

    /// Register a site. Returns the existing site when the domain is taken.
    pub fn add_site(&mut self, input: &str) -> Result<&Site, SettingsError> {
        let domain = normalize_domain(input);
        if domain.is_empty() {
            return Err(SettingsError::InvalidDomain(input.to_string()));
        }

        if let Some(idx) = self.sites.iter().position(|site| site.domain == domain) {
            return Ok(&self.sites[idx]);
        }

        self.sites.push(Site {
            id: generate_id()?,
            domain,
            enabled: true,
            csp_enabled: false,
            scripts: Vec::new(),
        });
        Ok(&self.sites[self.sites.len() - 1])
    }

    pub fn site_mut(&mut self, site_id: &str) -> Result<&mut Site, SettingsError> {
        self.sites
            .iter_mut()
            .find(|site| site.id == site_id)
            .ok_or(SettingsError::SiteNotFound)
    }

    /// Remove a site together with all of its scripts.
    pub fn remove_site(&mut self, site_id: &str) -> bool {
        let before = self.sites.len();
        self.sites.retain(|site| site.id != site_id);
        self.sites.len() != before
    }

    pub fn toggle_site(&mut self, site_id: &str) -> Result<bool, SettingsError> {
        let site = self.site_mut(site_id)?;
        site.enabled = !site.enabled;
        Ok(site.enabled)
    }

    pub fn toggle_site_csp(&mut self, site_id: &str) -> Result<bool, SettingsError> {
        let site = self.site_mut(site_id)?;
        site.csp_enabled = !site.csp_enabled;
        Ok(site.csp_enabled)
    }

    // -------------------------------------------------------------------------
    // Site scripts
    // -------------------------------------------------------------------------

    pub fn add_script(&mut self, site_id: &str, draft: ScriptDraft) -> Result<&Script, SettingsError> {
        let id = generate_id()?;
        let site = self.site_mut(site_id)?;
        site.scripts.push(Script {
            id,
            name: draft.name.unwrap_or_else(|| "New Script".to_string()),
            code: draft.code,
            kind: draft.kind,
            enabled: true,
            auto_run: draft.auto_run,
            url_patterns: draft.url_patterns,
        });
        Ok(&site.scripts[site.scripts.len() - 1])
    }

    pub fn script_mut(&mut self, site_id: &str, script_id: &str) -> Result<&mut Script, SettingsError> {
        self.site_mut(site_id)?
            .scripts
            .iter_mut()
            .find(|script| script.id == script_id)
            .ok_or(SettingsError::ScriptNotFound)
    }

    pub fn update_script<F>(&mut self, site_id: &str, script_id: &str, update: F) -> Result<&Script, SettingsError>
    where
        F: FnOnce(&mut Script),
    {
        let script = self.script_mut(site_id, script_id)?;
        update(script);
        Ok(script)
    }

    pub fn remove_script(&mut self, site_id: &str, script_id: &str) -> Result<bool, SettingsError> {
        let site = self.site_mut(site_id)?;
        let before = site.scripts.len();
        site.scripts.retain(|script| script.id != script_id);
        Ok(site.scripts.len() != before)
    }

    pub fn toggle_script(&mut self, site_id: &str, script_id: &str) -> Result<bool, SettingsError> {
        let script = self.script_mut(site_id, script_id)?;
        script.enabled = !script.enabled;
        Ok(script.enabled)
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    pub fn source_by_url(&self, url: &str) -> Option<&Source> {
        self.sources.iter().find(|source| source.url == url)
    }

    pub fn source_mut(&mut self, source_id: &str) -> Result<&mut Source, SettingsError> {
        self.sources
            .iter_mut()
            .find(|source| source.id == source_id)
            .ok_or(SettingsError::SourceNotFound)
    }

    /// Insert a source unless one with the same URL exists; returns the stored one.
    pub fn add_source(&mut self, source: Source) -> &Source {
        if let Some(idx) = self.sources.iter().position(|s| s.url == source.url) {
            return &self.sources[idx];
        }
        self.sources.push(source);
        &self.sources[self.sources.len() - 1]
    }

    /// Swap in a refreshed copy of an existing source.
    pub fn replace_source(&mut self, source: Source) -> Result<(), SettingsError> {
        let slot = self.source_mut(&source.id)?;
        *slot = source;
        Ok(())
    }

    pub fn remove_source(&mut self, source_id: &str) -> bool {
        let before = self.sources.len();
        self.sources.retain(|source| source.id != source_id);
        self.sources.len() != before
    }

    pub fn toggle_source(&mut self, source_id: &str) -> Result<bool, SettingsError> {
        let source = self.source_mut(source_id)?;
        source.enabled = !source.enabled;
        Ok(source.enabled)
    }

    pub fn toggle_source_script(&mut self, source_id: &str, script_id: &str) -> Result<bool, SettingsError> {
        let script: &mut SourceScript = self
            .source_mut(source_id)?
            .scripts
            .iter_mut()
            .find(|script| script.id == script_id)
            .ok_or(SettingsError::ScriptNotFound)?;
        script.enabled = !script.enabled;
        Ok(script.enabled)
    }

    pub fn update_source_token(&mut self, source_id: &str, token: Option<String>) -> Result<(), SettingsError> {
        self.source_mut(source_id)?.token = token;
        Ok(())
    }
}

fn stored_field<T: DeserializeOwned>(value: &serde_json::Value, key: &str) -> Option<T> {
    let field = value.get(key)?;
    match T::deserialize(field) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            log::warn!("ignoring stored {}: {}", key, e);
            None
        }
    }
}
