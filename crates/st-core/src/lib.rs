//! Site Tweaker Core Library
//!
//! This crate provides the configuration model and the pure matching logic
//! behind Site Tweaker: deciding which user scripts apply to a page, and
//! which presentation state a tab should show.
//!
//! # Architecture
//!
//! Everything here is synchronous and side-effect free. The persisted
//! [`Settings`] value is the single input; callers read it from storage,
//! ask a question of it, and act on the answer. Async coordination with the
//! browser lives in `st-runtime`.
//!
//! # Modules
//!
//! - `types`: Settings, sites, scripts, sources and header flags
//! - `url`: Allocation-free URL slicing (host, path, domain)
//! - `pattern`: Domain and path pattern matching
//! - `resolver`: Applicable scripts for a (domain, path) pair
//! - `icon`: Three-state toolbar icon derivation
//! - `menu`: Context menu plan for manually runnable scripts
//! - `settings`: Mutations on the settings tree
//! - `source`: Remote source references and manifests

pub mod icon;
pub mod id;
pub mod menu;
pub mod pattern;
pub mod resolver;
pub mod settings;
pub mod source;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use icon::IconState;
pub use menu::{MenuEntry, MenuPlan};
pub use pattern::{matches_domain, matches_path};
pub use resolver::{resolve, ResolvedScript, ScriptIdentity, ScriptMatches, ScriptOrigin, SiteData};
pub use settings::{ScriptDraft, SettingsError};
pub use source::{GitHubRef, SourceManifest};
pub use types::{
    EnvVar, HeaderName, HeaderSet, ResourceType, Script, ScriptKind, Settings, Site, Source,
    SourceScript,
};
pub use url::{extract_domain, normalize_domain, path_and_query};
