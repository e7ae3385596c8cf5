//! Browser collaborator traits.
//!
//! Each trait covers one host API family. Implementations are free to be
//! slow or to fail; the coordinator never holds internal state borrowed
//! across one of these calls.

use std::rc::Rc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use st_core::{IconState, Settings, Source};
use st_rules::HeaderRule;

use crate::error::HostError;

/// Browser tab identifier.
pub type TabId = i32;

/// Snapshot of an open tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Persisted settings; the sole source of truth.
#[async_trait(?Send)]
pub trait SettingsStore {
    async fn read(&self) -> Result<Settings, HostError>;
    async fn write(&self, settings: &Settings) -> Result<(), HostError>;
}

/// Delivers code into a tab's page.
#[async_trait(?Send)]
pub trait PageInjector {
    /// Insert a stylesheet.
    async fn insert_style(&self, tab: TabId, css: &str) -> Result<(), HostError>;
    /// Run JavaScript in the page's own context, not the extension's.
    async fn execute_in_page(&self, tab: TabId, code: &str) -> Result<(), HostError>;
}

/// Declarative network rule storage.
#[async_trait(?Send)]
pub trait RuleEngine {
    /// Remove the rule with `rule_id`, then install `rule` if given.
    async fn replace_rule(&self, rule_id: u32, rule: Option<&HeaderRule>) -> Result<(), HostError>;
}

/// The extension's context menu tree.
#[async_trait(?Send)]
pub trait MenuHost {
    async fn clear(&self) -> Result<(), HostError>;
    async fn create_entry(&self, id: &str, parent_id: Option<&str>, title: &str) -> Result<(), HostError>;
}

/// Tab queries and tab-local presentation.
#[async_trait(?Send)]
pub trait TabHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError>;
    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError>;
    async fn set_icon(&self, tab: TabId, state: IconState) -> Result<(), HostError>;
    /// Tell the tab's content side that a same-document navigation happened.
    async fn notify_url_changed(&self, tab: TabId, url: &str) -> Result<(), HostError>;
}

/// Refreshes a remote source. Never fails: errors land in `last_error`.
#[async_trait(?Send)]
pub trait SourceFetcher {
    async fn refresh(&self, source: Source) -> Source;
}

/// The full set of collaborators a coordinator talks to.
#[derive(Clone)]
pub struct Host {
    pub store: Rc<dyn SettingsStore>,
    pub injector: Rc<dyn PageInjector>,
    pub rules: Rc<dyn RuleEngine>,
    pub menus: Rc<dyn MenuHost>,
    pub tabs: Rc<dyn TabHost>,
    pub fetcher: Rc<dyn SourceFetcher>,
}

impl Host {
    /// Use one object for every collaborator role.
    pub fn from_single<T>(host: Rc<T>) -> Self
    where
        T: SettingsStore + PageInjector + RuleEngine + MenuHost + TabHost + SourceFetcher + 'static,
    {
        Self {
            store: host.clone(),
            injector: host.clone(),
            rules: host.clone(),
            menus: host.clone(),
            tabs: host.clone(),
            fetcher: host,
        }
    }
}
