//! Remote source references and manifests
//!
//! A source points at a GitHub repository (optionally a branch and a
//! sub-directory) holding a manifest file plus the script files it lists.
//! Fetching is the caller's business; this module only parses references,
//! builds file URLs and folds a fetched manifest into a [`Source`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::id::generate_id;
use crate::settings::SettingsError;
use crate::types::{EnvVar, Source, SourceScript};

/// Manifest file name at the root of a source.
pub const CONFIG_FILE: &str = "site-tweaker.json";

const DEFAULT_BRANCH: &str = "main";

// =============================================================================
// Repository Reference
// =============================================================================

/// A parsed `github.com/owner/repo[/tree|blob/branch/path]` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubRef {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub path: String,
}

impl GitHubRef {
    pub fn parse(input: &str) -> Option<Self> {
        let host = crate::url::extract_host(input)?;
        if !host.eq_ignore_ascii_case("github.com") {
            return None;
        }

        let path = crate::url::path_and_query(input)?;
        let path = path.split('?').next().unwrap_or("");
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            return None;
        }

        let (branch, sub_path) = match parts.get(2) {
            Some(&"tree") | Some(&"blob") => (
                parts.get(3).copied().unwrap_or(DEFAULT_BRANCH),
                parts.get(4..).map(|rest| rest.join("/")).unwrap_or_default(),
            ),
            _ => (DEFAULT_BRANCH, String::new()),
        };

        Some(Self {
            owner: parts[0].to_string(),
            repo: parts[1].to_string(),
            branch: branch.to_string(),
            path: sub_path,
        })
    }

    /// Raw content URL of a file relative to the source directory.
    pub fn raw_file_url(&self, file: &str) -> String {
        let base = if self.path.is_empty() {
            String::new()
        } else {
            format!("{}/", self.path)
        };
        format!(
            "https://raw.githubusercontent.com/{}/{}/{}/{}{}",
            self.owner, self.repo, self.branch, base, file
        )
    }

    /// Short `owner/repo[/path]` label.
    pub fn display(&self) -> String {
        if self.path.is_empty() {
            format!("{}/{}", self.owner, self.repo)
        } else {
            format!("{}/{}/{}", self.owner, self.repo, self.path)
        }
    }
}

// =============================================================================
// Manifest
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestMatch {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestScript {
    pub name: String,
    pub file: String,
    #[serde(default)]
    pub auto_run: bool,
    #[serde(default, rename = "match")]
    pub matches: ManifestMatch,
    #[serde(default)]
    pub csp_bypass: Option<Vec<String>>,
}

/// Contents of a source's manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceManifest {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    pub scripts: Vec<ManifestScript>,
}

impl SourceManifest {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

// =============================================================================
// Source Lifecycle
// =============================================================================

impl Source {
    /// A fresh, never-fetched source.
    pub fn new(url: &str, token: Option<String>) -> Result<Self, SettingsError> {
        Ok(Self {
            id: generate_id()?,
            url: url.to_string(),
            token,
            name: String::new(),
            description: String::new(),
            enabled: true,
            last_fetched: None,
            last_error: None,
            version: String::new(),
            scripts: Vec::new(),
            env: Vec::new(),
            env_values: BTreeMap::new(),
        })
    }

    /// Fold a fetched manifest and its script bodies into the source.
    ///
    /// `codes` pairs up with `manifest.scripts` by position. Script ids are
    /// regenerated; env values the user already entered are kept.
    pub fn apply_manifest(
        &mut self,
        manifest: SourceManifest,
        codes: Vec<String>,
        now_ms: i64,
    ) -> Result<(), SettingsError> {
        let mut scripts = Vec::with_capacity(manifest.scripts.len());
        for (entry, code) in manifest.scripts.into_iter().zip(codes) {
            scripts.push(SourceScript {
                id: generate_id()?,
                name: entry.name,
                code,
                auto_run: entry.auto_run,
                domains: entry.matches.domains,
                paths: entry.matches.paths,
                enabled: true,
                source_id: self.id.clone(),
                csp_bypass: entry.csp_bypass,
            });
        }

        self.name = manifest.name;
        self.description = manifest.description.unwrap_or_default();
        self.version = manifest.version;
        self.env = manifest.env;
        self.scripts = scripts;
        self.last_fetched = Some(now_ms);
        self.last_error = None;
        Ok(())
    }

    /// Record a failed refresh; previously fetched scripts stay in place.
    pub fn record_error(&mut self, error: impl Into<String>, now_ms: i64) {
        self.last_error = Some(error.into());
        self.last_fetched = Some(now_ms);
    }
}
