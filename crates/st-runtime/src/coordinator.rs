//! Injection coordinator
//!
//! Owns the process-wide mutable state of the background side:
//!
//! - the in-flight header rule sync, as a shared [`Task`]
//! - per-tab injection state, keyed by tab id
//! - the context menu (see [`ContextMenu`])
//!
//! # Rule sync
//!
//! Every settings change starts a new sync and supersedes the previous one.
//! A sync first waits for its predecessor, then bails out if it has itself
//! been superseded, so host rule writes never overlap and the last write
//! always reflects the settings read after the final change.
//!
//! # Auto-run injection
//!
//! Per tab: `Idle` (no entry) -> `Pending(url)` -> `Injected(url)`. A load
//! complete for the URL already pending or injected is a no-op. A committed
//! top-level navigation to another URL drops the entry.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::FutureExt;
use serde::Deserialize;

use st_core::menu::{MENU_PARENT_ID, MENU_PARENT_TITLE};
use st_core::resolver::site_data_for_page;
use st_core::{
    extract_domain, path_and_query, resolve, IconState, ResolvedScript, ScriptIdentity,
    ScriptKind, ScriptOrigin, Settings, SettingsError, SiteData, Source,
};
use st_rules::{synthesize, CSP_RULE_ID, CSP_RULE_PRIORITY};

use crate::error::{CoordinatorError, HostError};
use crate::event::{
    BrowserEvent, CurrentTabInfo, ExecutionOutcome, Message, Response, TabStatus, TransitionType,
};
use crate::host::{Host, TabId};
use crate::menu::ContextMenu;
use crate::Task;

// =============================================================================
// Configuration
// =============================================================================

/// Whether explicitly requested script runs honor the global toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManualExecution {
    /// Run whenever asked, even with the extension globally disabled
    #[default]
    Always,
    /// Refuse while the extension is globally disabled
    RequireEnabled,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoordinatorConfig {
    pub manual_execution: ManualExecution,
    pub menu_parent_id: String,
    pub menu_parent_title: String,
    pub rule_id: u32,
    pub rule_priority: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            manual_execution: ManualExecution::Always,
            menu_parent_id: MENU_PARENT_ID.to_string(),
            menu_parent_title: MENU_PARENT_TITLE.to_string(),
            rule_id: CSP_RULE_ID,
            rule_priority: CSP_RULE_PRIORITY,
        }
    }
}

// =============================================================================
// Injection State
// =============================================================================

/// Auto-run progress for one tab. Absence from the map means idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionState {
    Pending(String),
    Injected(String),
}

impl InjectionState {
    pub fn url(&self) -> &str {
        match self {
            Self::Pending(url) | Self::Injected(url) => url,
        }
    }
}

/// What an auto-run pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRun {
    /// This URL was already handled for the tab
    Duplicate,
    /// The tab navigated away or closed while waiting
    Superseded,
    /// Global or auto-inject toggle is off
    Disabled,
    /// Settings could not be read; the tab stays idle
    Unavailable,
    /// Scripts were delivered in order; `failed` of them reported an error
    Ran { attempted: usize, failed: usize },
}

// =============================================================================
// Coordinator
// =============================================================================

/// Background-side core. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Rc<Inner>,
}

struct Inner {
    host: Host,
    config: CoordinatorConfig,
    tabs: RefCell<HashMap<TabId, InjectionState>>,
    rule_task: RefCell<Option<Task>>,
    rule_generation: Cell<u64>,
    menu: ContextMenu,
}

impl Coordinator {
    pub fn new(host: Host, config: CoordinatorConfig) -> Self {
        let menu = ContextMenu::new(host.clone(), &config.menu_parent_id, &config.menu_parent_title);
        Self {
            inner: Rc::new(Inner {
                host,
                config,
                tabs: RefCell::new(HashMap::new()),
                rule_task: RefCell::new(None),
                rule_generation: Cell::new(0),
                menu,
            }),
        }
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn menu(&self) -> &ContextMenu {
        &self.inner.menu
    }

    pub fn injection_state(&self, tab: TabId) -> Option<InjectionState> {
        self.inner.tabs.borrow().get(&tab).cloned()
    }

    /// Initial rule sync at process start.
    pub async fn start(&self) -> Result<(), HostError> {
        self.refresh_rules().await
    }

    // -------------------------------------------------------------------------
    // Events and messages
    // -------------------------------------------------------------------------

    /// React to one browser event. Failures are logged, never returned.
    pub async fn handle_event(&self, event: BrowserEvent) {
        match event {
            BrowserEvent::TabUpdated { tab_id, status, url, active } => match (status, url) {
                (Some(TabStatus::Complete), Some(url)) => {
                    self.update_icon(tab_id, Some(&url)).await;
                    self.inject_auto_run(tab_id, &url).await;
                    if active {
                        self.rebuild_menu(&url).await;
                    }
                }
                (_, Some(url)) => self.update_icon(tab_id, Some(&url)).await,
                _ => {}
            },
            BrowserEvent::HistoryStateUpdated { tab_id, frame_id, url } => {
                if frame_id != 0 {
                    return;
                }
                self.update_icon(tab_id, Some(&url)).await;
                self.inject_auto_run(tab_id, &url).await;
                self.rebuild_menu(&url).await;
                if let Err(e) = self.inner.host.tabs.notify_url_changed(tab_id, &url).await {
                    log::debug!("tab {} did not take the url change: {}", tab_id, e);
                }
            }
            BrowserEvent::NavigationCommitted { tab_id, frame_id, url, transition_type } => {
                self.on_navigation_committed(tab_id, frame_id, &url, transition_type);
            }
            BrowserEvent::TabActivated { tab_id, url } => {
                self.update_icon(tab_id, url.as_deref()).await;
                if let Some(url) = url {
                    self.rebuild_menu(&url).await;
                }
            }
            BrowserEvent::TabRemoved { tab_id } => self.forget_tab(tab_id),
            BrowserEvent::SettingsChanged { keys } => {
                if !keys.iter().any(|key| key == "settings") {
                    return;
                }
                if let Err(e) = self.refresh_rules().await {
                    log::warn!("header rule update failed, will retry on next change: {}", e);
                }
            }
            BrowserEvent::MenuClicked { entry_id, tab_id } => {
                let (Some(tab), Some(target)) = (tab_id, self.inner.menu.target(&entry_id)) else {
                    return;
                };
                if let Err(e) = self.execute(&target, tab).await {
                    log::warn!("menu entry {} failed on tab {}: {}", entry_id, tab, e);
                }
            }
        }
    }

    /// Answer an in-extension request. `sender_tab` fills in a missing tab id.
    pub async fn handle_message(&self, message: Message, sender_tab: Option<TabId>) -> Response {
        match message {
            Message::ExecuteScript { site_id, script_id, tab_id } => {
                let outcome = match tab_id.or(sender_tab) {
                    Some(tab) => self.execute_site_script(&site_id, &script_id, tab).await,
                    None => CoordinatorError::NoTab.into_outcome(),
                };
                Response::Execution(outcome)
            }
            Message::ExecuteSourceScript { source_id, script_id, tab_id } => {
                let outcome = match tab_id.or(sender_tab) {
                    Some(tab) => self.execute_source_script(&source_id, &script_id, tab).await,
                    None => CoordinatorError::NoTab.into_outcome(),
                };
                Response::Execution(outcome)
            }
            Message::GetSiteData { domain, path } => {
                let path = path.unwrap_or_else(|| "/".to_string());
                match self.site_data_for_page(&domain, &path).await {
                    Ok(data) => Response::SiteData(data),
                    Err(e) => {
                        log::warn!("site data for {} unavailable: {}", domain, e);
                        Response::SiteData(None)
                    }
                }
            }
            Message::GetCurrentTabInfo => Response::TabInfo(self.current_tab_info().await),
        }
    }

    // -------------------------------------------------------------------------
    // Rule sync
    // -------------------------------------------------------------------------

    /// Start a rule sync against the latest settings, superseding any pending one.
    ///
    /// The returned task resolves once the host rule reflects this sync (or a
    /// later one). Host failures surface as the task's error.
    pub fn refresh_rules(&self) -> Task {
        let generation = self.inner.rule_generation.get() + 1;
        self.inner.rule_generation.set(generation);

        let previous = self.inner.rule_task.borrow_mut().take();
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);

        let task = async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            match weak.upgrade() {
                Some(inner) => inner.sync_rules(generation).await,
                None => Ok(()),
            }
        }
        .boxed_local()
        .shared();

        *self.inner.rule_task.borrow_mut() = Some(task.clone());
        task
    }

    /// Wait until no rule sync is in flight.
    async fn await_rules(&self) {
        loop {
            let generation = self.inner.rule_generation.get();
            let task = self.inner.rule_task.borrow().clone();
            let Some(task) = task else {
                return;
            };
            if let Err(e) = task.await {
                log::warn!("continuing after failed header rule update: {}", e);
            }
            if self.inner.rule_generation.get() == generation {
                return;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Auto-run injection
    // -------------------------------------------------------------------------

    /// Inject the auto-run scripts for a page, at most once per tab and URL.
    pub async fn inject_auto_run(&self, tab: TabId, url: &str) -> AutoRun {
        {
            let mut tabs = self.inner.tabs.borrow_mut();
            if tabs.get(&tab).map_or(false, |state| state.url() == url) {
                log::debug!("tab {} already handled {}", tab, url);
                return AutoRun::Duplicate;
            }
            tabs.insert(tab, InjectionState::Pending(url.to_string()));
        }

        self.await_rules().await;

        let settings = match self.inner.host.store.read().await {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("cannot read settings for tab {}: {}", tab, e);
                self.abandon(tab, url);
                return AutoRun::Unavailable;
            }
        };

        if !self.is_pending(tab, url) {
            return AutoRun::Superseded;
        }

        if !settings.enabled || !settings.auto_inject_enabled {
            self.mark_injected(tab, url);
            return AutoRun::Disabled;
        }

        let scripts = match extract_domain(url) {
            Some(domain) => {
                let path = path_and_query(url).unwrap_or_else(|| "/".to_string());
                let matches = resolve(&settings, &domain, &path);
                log::debug!(
                    "tab {}: {} site and {} source scripts match {}{}",
                    tab,
                    matches.site_scripts.len(),
                    matches.source_scripts.len(),
                    domain,
                    path
                );
                matches.auto_run(url)
            }
            None => Vec::new(),
        };

        let mut failed = 0;
        for script in &scripts {
            log::debug!("injecting auto-run script {:?} into tab {}", script.name, tab);
            if let Err(e) = self.deliver(tab, script).await {
                log::warn!("script {:?} failed on tab {}: {}", script.name, tab, e);
                failed += 1;
            }
        }

        self.mark_injected(tab, url);
        AutoRun::Ran {
            attempted: scripts.len(),
            failed,
        }
    }

    fn on_navigation_committed(&self, tab: TabId, frame_id: i32, url: &str, transition: TransitionType) {
        if frame_id != 0 || transition == TransitionType::AutoSubframe {
            return;
        }
        let mut tabs = self.inner.tabs.borrow_mut();
        if tabs.get(&tab).map_or(false, |state| state.url() != url) {
            tabs.remove(&tab);
        }
    }

    /// Drop all state kept for a tab.
    pub fn forget_tab(&self, tab: TabId) {
        self.inner.tabs.borrow_mut().remove(&tab);
    }

    fn is_pending(&self, tab: TabId, url: &str) -> bool {
        matches!(self.inner.tabs.borrow().get(&tab), Some(InjectionState::Pending(u)) if u == url)
    }

    fn mark_injected(&self, tab: TabId, url: &str) {
        let mut tabs = self.inner.tabs.borrow_mut();
        if let Some(state) = tabs.get_mut(&tab) {
            if *state == InjectionState::Pending(url.to_string()) {
                *state = InjectionState::Injected(url.to_string());
            }
        }
    }

    fn abandon(&self, tab: TabId, url: &str) {
        if self.is_pending(tab, url) {
            self.inner.tabs.borrow_mut().remove(&tab);
        }
    }

    async fn deliver(&self, tab: TabId, script: &ResolvedScript) -> Result<(), HostError> {
        let injector = &self.inner.host.injector;
        match script.kind {
            ScriptKind::Css => injector.insert_style(tab, &script.code).await,
            ScriptKind::Js => injector.execute_in_page(tab, &script.code).await,
        }
    }

    // -------------------------------------------------------------------------
    // Manual execution
    // -------------------------------------------------------------------------

    pub async fn execute_site_script(&self, site_id: &str, script_id: &str, tab: TabId) -> ExecutionOutcome {
        self.execute(&ScriptIdentity::site(site_id, script_id), tab)
            .await
            .into()
    }

    pub async fn execute_source_script(&self, source_id: &str, script_id: &str, tab: TabId) -> ExecutionOutcome {
        self.execute(&ScriptIdentity::source(source_id, script_id), tab)
            .await
            .into()
    }

    /// Run one script on request. Independent of the auto-run state.
    pub async fn execute(&self, identity: &ScriptIdentity, tab: TabId) -> Result<(), CoordinatorError> {
        self.await_rules().await;

        let settings = self.inner.host.store.read().await?;
        if self.inner.config.manual_execution == ManualExecution::RequireEnabled && !settings.enabled {
            return Err(CoordinatorError::Disabled);
        }

        let script = lookup(&settings, identity)?;
        log::debug!("running {:?} on tab {} by request", script.name, tab);
        self.deliver(tab, &script).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Presentation
    // -------------------------------------------------------------------------

    async fn update_icon(&self, tab: TabId, url: Option<&str>) {
        let result: Result<(), HostError> = async {
            let settings = self.inner.host.store.read().await?;
            let state = IconState::derive(&settings, url);
            self.inner.host.tabs.set_icon(tab, state).await
        }
        .await;
        if let Err(e) = result {
            log::debug!("icon update for tab {} failed: {}", tab, e);
        }
    }

    async fn rebuild_menu(&self, url: &str) {
        if let Err(e) = self.inner.menu.rebuild(url).await {
            log::warn!("context menu rebuild failed: {}", e);
        }
    }

    pub async fn site_data_for_page(&self, domain: &str, path: &str) -> Result<Option<SiteData>, HostError> {
        let settings = self.inner.host.store.read().await?;
        Ok(site_data_for_page(&settings, domain, path))
    }

    pub async fn current_tab_info(&self) -> CurrentTabInfo {
        match self.inner.host.tabs.active_tab().await {
            Ok(Some(tab)) if tab.url.is_some() => CurrentTabInfo {
                tab_id: Some(tab.id),
                domain: tab.url.as_deref().and_then(extract_domain),
                url: tab.url,
            },
            Ok(_) => CurrentTabInfo::default(),
            Err(e) => {
                log::debug!("active tab lookup failed: {}", e);
                CurrentTabInfo::default()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    /// Add a source by URL, fetching it once. An existing source with the
    /// same URL is returned as is.
    pub async fn add_source(&self, url: &str, token: Option<String>) -> Result<Source, CoordinatorError> {
        let settings = self.inner.host.store.read().await?;
        if let Some(existing) = settings.source_by_url(url) {
            return Ok(existing.clone());
        }

        let fetched = self.inner.host.fetcher.refresh(Source::new(url, token)?).await;

        // Settings may have changed during the fetch
        let mut settings = self.inner.host.store.read().await?;
        let stored = settings.add_source(fetched).clone();
        self.inner.host.store.write(&settings).await?;
        Ok(stored)
    }

    /// Refresh one source and persist the result.
    pub async fn refresh_source(&self, source_id: &str) -> Result<Source, CoordinatorError> {
        let source = self
            .inner
            .host
            .store
            .read()
            .await?
            .source(source_id)
            .cloned()
            .ok_or(SettingsError::SourceNotFound)?;

        let refreshed = self.inner.host.fetcher.refresh(source).await;
        if let Some(error) = &refreshed.last_error {
            log::warn!("source {} refresh failed: {}", refreshed.url, error);
        }

        let mut settings = self.inner.host.store.read().await?;
        settings.replace_source(refreshed.clone())?;
        self.inner.host.store.write(&settings).await?;
        Ok(refreshed)
    }

    /// Refresh every source in order; returns how many were refreshed.
    pub async fn refresh_all_sources(&self) -> Result<usize, CoordinatorError> {
        let ids: Vec<String> = self
            .inner
            .host
            .store
            .read()
            .await?
            .sources
            .iter()
            .map(|source| source.id.clone())
            .collect();

        let mut refreshed = 0;
        for id in &ids {
            match self.refresh_source(id).await {
                Ok(_) => refreshed += 1,
                // Removed while we were busy
                Err(CoordinatorError::Settings(SettingsError::SourceNotFound)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(refreshed)
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.rule_generation.get() == generation
    }

    async fn sync_rules(self: Rc<Self>, generation: u64) -> Result<(), HostError> {
        if !self.is_current(generation) {
            log::debug!("header rule sync {} superseded", generation);
            return Ok(());
        }

        let settings = self.host.store.read().await?;
        if !self.is_current(generation) {
            log::debug!("header rule sync {} superseded", generation);
            return Ok(());
        }

        let rule = synthesize(&settings).map(|mut rule| {
            rule.id = self.config.rule_id;
            rule.priority = self.config.rule_priority;
            rule
        });
        self.host
            .rules
            .replace_rule(self.config.rule_id, rule.as_ref())
            .await?;

        match &rule {
            Some(rule) => log::info!(
                "header rule active for {} domains, stripping {} headers",
                rule.request_domains.len(),
                rule.remove_headers.len()
            ),
            None => log::info!("header rule removed"),
        }

        self.refresh_all_icons(&settings).await;
        Ok(())
    }

    async fn refresh_all_icons(&self, settings: &Settings) {
        let tabs = match self.host.tabs.query_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                log::debug!("tab query failed: {}", e);
                return;
            }
        };
        for tab in tabs {
            let state = IconState::derive(settings, tab.url.as_deref());
            if let Err(e) = self.host.tabs.set_icon(tab.id, state).await {
                log::debug!("icon update for tab {} failed: {}", tab.id, e);
            }
        }
    }
}

fn lookup(settings: &Settings, identity: &ScriptIdentity) -> Result<ResolvedScript, SettingsError> {
    match identity.origin {
        ScriptOrigin::Site => {
            let site = settings
                .site(&identity.owner_id)
                .ok_or(SettingsError::SiteNotFound)?;
            let script = site
                .script(&identity.script_id)
                .ok_or(SettingsError::ScriptNotFound)?;
            Ok(ResolvedScript::from_site(site, script))
        }
        ScriptOrigin::Source => {
            let script = settings
                .source(&identity.owner_id)
                .ok_or(SettingsError::SourceNotFound)?
                .script(&identity.script_id)
                .ok_or(SettingsError::ScriptNotFound)?;
            Ok(ResolvedScript::from_source(script))
        }
    }
}

impl CoordinatorError {
    fn into_outcome(self) -> ExecutionOutcome {
        Err(self).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{sample_settings, Call, FakeHost};
    use crate::host::TabInfo;

    const FOO: &str = "https://foo.com/";

    fn complete(tab_id: TabId, url: &str) -> BrowserEvent {
        BrowserEvent::TabUpdated {
            tab_id,
            status: Some(TabStatus::Complete),
            url: Some(url.to_string()),
            active: false,
        }
    }

    fn commit(tab_id: TabId, frame_id: i32, url: &str, transition_type: TransitionType) -> BrowserEvent {
        BrowserEvent::NavigationCommitted {
            tab_id,
            frame_id,
            url: url.to_string(),
            transition_type,
        }
    }

    #[tokio::test]
    async fn test_start_installs_rule_and_icons() {
        let host = FakeHost::with_settings(sample_settings());
        host.tabs.borrow_mut().push(TabInfo {
            id: 1,
            url: Some(FOO.into()),
            active: true,
        });
        host.tabs.borrow_mut().push(TabInfo {
            id: 2,
            url: Some("https://bar.com/".into()),
            active: false,
        });

        let coordinator = host.coordinator();
        coordinator.start().await.unwrap();

        assert_eq!(
            host.calls(),
            vec![
                Call::ReplaceRule(CSP_RULE_ID, Some(vec!["foo.com".into(), "www.foo.com".into()])),
                Call::Icon(1, IconState::Active),
                Call::Icon(2, IconState::Outline),
            ]
        );
    }

    #[tokio::test]
    async fn test_complete_load_injects_once() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        coordinator.handle_event(complete(1, FOO)).await;
        assert_eq!(host.delivered(), vec!["auto()", "body {}", "remote()"]);
        assert!(host.calls().contains(&Call::Icon(1, IconState::Active)));
        assert!(host.calls().contains(&Call::Style(1, "body {}".into())));
        assert_eq!(
            coordinator.injection_state(1),
            Some(InjectionState::Injected(FOO.into()))
        );

        // Redundant completion signal for the same document
        coordinator.handle_event(complete(1, FOO)).await;
        assert_eq!(host.delivered().len(), 3);
        assert_eq!(coordinator.inject_auto_run(1, FOO).await, AutoRun::Duplicate);
    }

    #[tokio::test]
    async fn test_concurrent_completions_inject_once() {
        let host = FakeHost::with_settings(sample_settings());
        host.slow_reads.set(true);
        let coordinator = host.coordinator();

        let (first, second) = futures::join!(
            coordinator.inject_auto_run(1, FOO),
            coordinator.inject_auto_run(1, FOO)
        );
        assert_eq!(first, AutoRun::Ran { attempted: 3, failed: 0 });
        assert_eq!(second, AutoRun::Duplicate);
        assert_eq!(host.delivered().len(), 3);
    }

    #[tokio::test]
    async fn test_real_navigation_allows_reinjection() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();
        coordinator.handle_event(complete(1, FOO)).await;

        // Sub-frame loads and non-top frames never reset the tab
        coordinator
            .handle_event(commit(1, 0, "https://foo.com/ad", TransitionType::AutoSubframe))
            .await;
        coordinator
            .handle_event(commit(1, 3, "https://foo.com/frame", TransitionType::Link))
            .await;
        assert_eq!(
            coordinator.injection_state(1),
            Some(InjectionState::Injected(FOO.into()))
        );

        // Committing the same URL keeps the tab marked
        coordinator
            .handle_event(commit(1, 0, FOO, TransitionType::Reload))
            .await;
        assert!(coordinator.injection_state(1).is_some());

        coordinator
            .handle_event(commit(1, 0, "https://foo.com/next", TransitionType::Link))
            .await;
        assert_eq!(coordinator.injection_state(1), None);

        coordinator
            .handle_event(complete(1, "https://foo.com/next"))
            .await;
        assert_eq!(host.delivered().len(), 6);
    }

    #[tokio::test]
    async fn test_history_state_injects_immediately() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        coordinator
            .handle_event(BrowserEvent::HistoryStateUpdated {
                tab_id: 4,
                frame_id: 0,
                url: "https://foo.com/inbox".into(),
            })
            .await;

        assert_eq!(host.delivered().len(), 3);
        assert!(host
            .calls()
            .contains(&Call::UrlChanged(4, "https://foo.com/inbox".into())));
        // Manual scripts for the new page land in the menu
        assert!(host.calls().contains(&Call::MenuCreate(
            "site-script-s2".into(),
            Some("site-tweaker-parent".into()),
            "Manual".into()
        )));

        // Sub-frame history changes are ignored
        host.take_calls();
        coordinator
            .handle_event(BrowserEvent::HistoryStateUpdated {
                tab_id: 4,
                frame_id: 2,
                url: "https://foo.com/other".into(),
            })
            .await;
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_script_does_not_stop_the_rest() {
        let host = FakeHost::with_settings(sample_settings());
        host.failing.borrow_mut().insert("auto()".into());
        let coordinator = host.coordinator();

        let report = coordinator.inject_auto_run(1, FOO).await;
        assert_eq!(report, AutoRun::Ran { attempted: 3, failed: 1 });
        assert_eq!(host.delivered(), vec!["auto()", "body {}", "remote()"]);
        assert_eq!(
            coordinator.injection_state(1),
            Some(InjectionState::Injected(FOO.into()))
        );
    }

    #[tokio::test]
    async fn test_auto_inject_toggle() {
        let mut settings = sample_settings();
        settings.auto_inject_enabled = false;
        let host = FakeHost::with_settings(settings);
        let coordinator = host.coordinator();

        assert_eq!(coordinator.inject_auto_run(1, FOO).await, AutoRun::Disabled);
        assert!(host.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_url_patterns_filter_site_scripts() {
        let mut settings = sample_settings();
        settings.sites[0].scripts[0].url_patterns = vec!["/app*".into()];
        let host = FakeHost::with_settings(settings);
        let coordinator = host.coordinator();

        coordinator.inject_auto_run(1, FOO).await;
        assert_eq!(host.delivered(), vec!["body {}", "remote()"]);

        coordinator.inject_auto_run(2, "https://foo.com/app/home").await;
        assert_eq!(host.delivered()[2..].to_vec(), vec!["auto()", "body {}", "remote()"]);
    }

    #[tokio::test]
    async fn test_globally_disabled() {
        let mut settings = sample_settings();
        settings.enabled = false;
        let host = FakeHost::with_settings(settings);
        host.tabs.borrow_mut().push(TabInfo {
            id: 1,
            url: Some(FOO.into()),
            active: true,
        });
        let coordinator = host.coordinator();

        coordinator.start().await.unwrap();
        coordinator.handle_event(complete(1, FOO)).await;

        assert_eq!(host.rule_writes(), vec![None]);
        assert!(host.delivered().is_empty());
        assert!(host.calls().contains(&Call::Icon(1, IconState::Disabled)));

        // Explicit requests still run by default
        let outcome = coordinator.execute_site_script("site1", "s2", 1).await;
        assert_eq!(outcome, ExecutionOutcome::ok());
        assert_eq!(host.delivered(), vec!["manual()"]);

        let strict = host.coordinator_with(CoordinatorConfig {
            manual_execution: ManualExecution::RequireEnabled,
            ..CoordinatorConfig::default()
        });
        let outcome = strict.execute_site_script("site1", "s2", 1).await;
        assert_eq!(outcome, ExecutionOutcome::failed("Extension is disabled"));
    }

    #[tokio::test]
    async fn test_manual_execution_errors() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        let outcome = coordinator.execute_site_script("nope", "s1", 1).await;
        assert_eq!(outcome, ExecutionOutcome::failed("Site not found"));
        let outcome = coordinator.execute_site_script("site1", "nope", 1).await;
        assert_eq!(outcome, ExecutionOutcome::failed("Script not found"));
        let outcome = coordinator.execute_source_script("nope", "x1", 1).await;
        assert_eq!(outcome, ExecutionOutcome::failed("Source not found"));

        host.failing.borrow_mut().insert("tool()".into());
        let outcome = coordinator.execute_source_script("src1", "x2", 1).await;
        assert_eq!(outcome, ExecutionOutcome::failed("cannot run tool()"));

        // Manual runs never touch auto-run tracking
        assert_eq!(coordinator.injection_state(1), None);
    }

    #[tokio::test]
    async fn test_manual_css_goes_to_stylesheet() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        let outcome = coordinator.execute_site_script("site1", "s3", 7).await;
        assert!(outcome.success);
        assert_eq!(host.calls(), vec![Call::Style(7, "body {}".into())]);
    }

    #[tokio::test]
    async fn test_rule_updates_coalesce() {
        let host = FakeHost::with_settings(sample_settings());
        host.slow_reads.set(true);
        let coordinator = host.coordinator();

        let first = coordinator.refresh_rules();
        let second = async {
            host.settings.borrow_mut().sites[0].domain = "bar.com".into();
            host.settings.borrow_mut().sources.clear();
            coordinator.refresh_rules().await
        };
        let (first, second) = futures::join!(first, second);
        first.unwrap();
        second.unwrap();

        assert_eq!(
            host.rule_writes(),
            vec![Some(vec!["bar.com".to_string(), "www.bar.com".to_string()])]
        );
    }

    #[tokio::test]
    async fn test_rule_lands_before_injection() {
        let host = FakeHost::with_settings(sample_settings());
        host.slow_reads.set(true);
        let coordinator = host.coordinator();

        futures::join!(
            coordinator.handle_event(BrowserEvent::SettingsChanged {
                keys: vec!["settings".into()],
            }),
            coordinator.handle_event(complete(1, FOO))
        );

        let calls = host.calls();
        let rule = calls
            .iter()
            .position(|call| matches!(call, Call::ReplaceRule(..)))
            .unwrap();
        let first_script = calls
            .iter()
            .position(|call| matches!(call, Call::Exec(..) | Call::Style(..)))
            .unwrap();
        assert!(rule < first_script);
    }

    #[tokio::test]
    async fn test_unrelated_storage_keys_ignored() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        coordinator
            .handle_event(BrowserEvent::SettingsChanged {
                keys: vec!["editorTheme".into()],
            })
            .await;
        assert!(host.rule_writes().is_empty());
    }

    #[tokio::test]
    async fn test_tab_removed_clears_state() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        coordinator.handle_event(complete(5, FOO)).await;
        assert!(coordinator.injection_state(5).is_some());

        coordinator
            .handle_event(BrowserEvent::TabRemoved { tab_id: 5 })
            .await;
        assert_eq!(coordinator.injection_state(5), None);
    }

    #[tokio::test]
    async fn test_menu_click_runs_script() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        coordinator
            .handle_event(BrowserEvent::TabActivated {
                tab_id: 1,
                url: Some(FOO.into()),
            })
            .await;
        assert_eq!(coordinator.menu().len(), 2);
        host.take_calls();

        coordinator
            .handle_event(BrowserEvent::MenuClicked {
                entry_id: "source-script-src1-x2".into(),
                tab_id: Some(1),
            })
            .await;
        assert_eq!(host.calls(), vec![Call::Exec(1, "tool()".into())]);

        // Unknown entries and clicks without a tab do nothing
        host.take_calls();
        coordinator
            .handle_event(BrowserEvent::MenuClicked {
                entry_id: "site-tweaker-parent".into(),
                tab_id: Some(1),
            })
            .await;
        coordinator
            .handle_event(BrowserEvent::MenuClicked {
                entry_id: "site-script-s2".into(),
                tab_id: None,
            })
            .await;
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_messages() {
        let host = FakeHost::with_settings(sample_settings());
        host.tabs.borrow_mut().push(TabInfo {
            id: 9,
            url: Some("https://www.foo.com/a?b=1".into()),
            active: true,
        });
        let coordinator = host.coordinator();

        let response = coordinator
            .handle_message(
                Message::ExecuteScript {
                    site_id: "site1".into(),
                    script_id: "s2".into(),
                    tab_id: None,
                },
                None,
            )
            .await;
        assert_eq!(response, Response::Execution(ExecutionOutcome::failed("No tab ID")));

        let response = coordinator
            .handle_message(
                Message::ExecuteSourceScript {
                    source_id: "src1".into(),
                    script_id: "x2".into(),
                    tab_id: None,
                },
                Some(3),
            )
            .await;
        assert_eq!(response, Response::Execution(ExecutionOutcome::ok()));
        assert_eq!(host.calls(), vec![Call::Exec(3, "tool()".into())]);

        let response = coordinator.handle_message(Message::GetCurrentTabInfo, None).await;
        assert_eq!(
            response,
            Response::TabInfo(CurrentTabInfo {
                tab_id: Some(9),
                url: Some("https://www.foo.com/a?b=1".into()),
                domain: Some("foo.com".into()),
            })
        );

        let response = coordinator
            .handle_message(
                Message::GetSiteData {
                    domain: "foo.com".into(),
                    path: None,
                },
                None,
            )
            .await;
        let data = match response {
            Response::SiteData(Some(data)) => data,
            other => panic!("expected site data, got {:?}", other),
        };
        assert_eq!(data.site.map(|site| site.id), Some("site1".to_string()));
        assert_eq!(data.scripts.len(), 3);
        assert_eq!(data.source_scripts.len(), 2);
    }

    #[tokio::test]
    async fn test_site_data_respects_floating_ui_toggle() {
        let mut settings = sample_settings();
        settings.floating_ui_enabled = false;
        let host = FakeHost::with_settings(settings);
        let coordinator = host.coordinator();

        let data = coordinator.site_data_for_page("foo.com", "/").await.unwrap();
        assert_eq!(data, None);
    }

    #[tokio::test]
    async fn test_refresh_source_persists() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        let refreshed = coordinator.refresh_source("src1").await.unwrap();
        assert_eq!(refreshed.version, "2.0.0");
        assert_eq!(host.settings.borrow().sources[0].version, "2.0.0");
        assert!(host.calls().contains(&Call::Write));

        host.fail_fetch.set(true);
        let refreshed = coordinator.refresh_source("src1").await.unwrap();
        assert_eq!(refreshed.last_error.as_deref(), Some("404 Not Found"));
        // Previously fetched scripts survive a failed refresh
        assert_eq!(host.settings.borrow().sources[0].scripts.len(), 2);

        let err = coordinator.refresh_source("missing").await.unwrap_err();
        assert_eq!(err, CoordinatorError::Settings(SettingsError::SourceNotFound));

        assert_eq!(coordinator.refresh_all_sources().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_source_dedupes_by_url() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator();

        let existing = coordinator
            .add_source("https://github.com/acme/tweaks", None)
            .await
            .unwrap();
        assert_eq!(existing.id, "src1");
        assert!(host.calls().is_empty());

        let added = coordinator
            .add_source("https://github.com/other/tweaks", Some("ghp_x".into()))
            .await
            .unwrap();
        assert_eq!(added.token.as_deref(), Some("ghp_x"));
        assert_eq!(host.settings.borrow().sources.len(), 2);
        assert_eq!(
            host.calls(),
            vec![Call::Fetch("https://github.com/other/tweaks".into()), Call::Write]
        );
    }

    #[tokio::test]
    async fn test_tab_closed_while_pending() {
        let host = FakeHost::with_settings(sample_settings());
        host.slow_reads.set(true);
        let coordinator = host.coordinator();

        let (report, ()) = futures::join!(coordinator.inject_auto_run(1, FOO), async {
            coordinator.forget_tab(1);
        });
        assert_eq!(report, AutoRun::Superseded);
        assert!(host.delivered().is_empty());
        assert_eq!(coordinator.injection_state(1), None);
    }

    #[tokio::test]
    async fn test_rule_uses_configured_id() {
        let host = FakeHost::with_settings(sample_settings());
        let coordinator = host.coordinator_with(CoordinatorConfig {
            rule_id: 42,
            ..CoordinatorConfig::default()
        });
        coordinator.refresh_rules().await.unwrap();
        assert!(matches!(host.calls()[0], Call::ReplaceRule(42, Some(_))));
    }

    #[test]
    fn test_config_json() {
        let config: CoordinatorConfig =
            serde_json::from_str(r#"{"manualExecution": "require-enabled", "ruleId": 7}"#).unwrap();
        assert_eq!(config.manual_execution, ManualExecution::RequireEnabled);
        assert_eq!(config.rule_id, 7);
        assert_eq!(config.menu_parent_id, "site-tweaker-parent");
    }
}
