//! Recording in-memory host for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use async_trait::async_trait;
use serde_json::json;

use st_core::{IconState, Settings, Source};
use st_rules::HeaderRule;

use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::error::HostError;
use crate::host::{Host, MenuHost, PageInjector, RuleEngine, SettingsStore, SourceFetcher, TabHost, TabId, TabInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Style(TabId, String),
    Exec(TabId, String),
    /// Domains of the installed rule, `None` for a removal
    ReplaceRule(u32, Option<Vec<String>>),
    MenuClear,
    MenuCreate(String, Option<String>, String),
    Icon(TabId, IconState),
    UrlChanged(TabId, String),
    Write,
    Fetch(String),
}

#[derive(Default)]
pub struct FakeHost {
    pub settings: RefCell<Settings>,
    pub calls: RefCell<Vec<Call>>,
    /// Code strings whose delivery fails
    pub failing: RefCell<HashSet<String>>,
    pub tabs: RefCell<Vec<TabInfo>>,
    /// Yield once to the executor before every settings read
    pub slow_reads: Cell<bool>,
    pub fail_fetch: Cell<bool>,
}

impl FakeHost {
    pub fn with_settings(settings: Settings) -> Rc<Self> {
        Rc::new(Self {
            settings: RefCell::new(settings),
            ..Self::default()
        })
    }

    pub fn coordinator(self: &Rc<Self>) -> Coordinator {
        self.coordinator_with(CoordinatorConfig::default())
    }

    pub fn coordinator_with(self: &Rc<Self>, config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(Host::from_single(self.clone()), config)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    /// Delivered code, in delivery order.
    pub fn delivered(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Style(_, code) | Call::Exec(_, code) => Some(code.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn rule_writes(&self) -> Vec<Option<Vec<String>>> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::ReplaceRule(_, domains) => Some(domains.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn deliver(&self, call: Call, code: &str) -> Result<(), HostError> {
        self.record(call);
        if self.failing.borrow().contains(code) {
            return Err(HostError::new(format!("cannot run {}", code)));
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl SettingsStore for FakeHost {
    async fn read(&self) -> Result<Settings, HostError> {
        if self.slow_reads.get() {
            tokio::task::yield_now().await;
        }
        Ok(self.settings.borrow().clone())
    }

    async fn write(&self, settings: &Settings) -> Result<(), HostError> {
        self.record(Call::Write);
        *self.settings.borrow_mut() = settings.clone();
        Ok(())
    }
}

#[async_trait(?Send)]
impl PageInjector for FakeHost {
    async fn insert_style(&self, tab: TabId, css: &str) -> Result<(), HostError> {
        self.deliver(Call::Style(tab, css.to_string()), css)
    }

    async fn execute_in_page(&self, tab: TabId, code: &str) -> Result<(), HostError> {
        self.deliver(Call::Exec(tab, code.to_string()), code)
    }
}

#[async_trait(?Send)]
impl RuleEngine for FakeHost {
    async fn replace_rule(&self, rule_id: u32, rule: Option<&HeaderRule>) -> Result<(), HostError> {
        self.record(Call::ReplaceRule(
            rule_id,
            rule.map(|rule| rule.request_domains.clone()),
        ));
        Ok(())
    }
}

#[async_trait(?Send)]
impl MenuHost for FakeHost {
    async fn clear(&self) -> Result<(), HostError> {
        self.record(Call::MenuClear);
        Ok(())
    }

    async fn create_entry(&self, id: &str, parent_id: Option<&str>, title: &str) -> Result<(), HostError> {
        self.record(Call::MenuCreate(
            id.to_string(),
            parent_id.map(str::to_string),
            title.to_string(),
        ));
        Ok(())
    }
}

#[async_trait(?Send)]
impl TabHost for FakeHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        Ok(self.tabs.borrow().clone())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        Ok(self.tabs.borrow().iter().find(|tab| tab.active).cloned())
    }

    async fn set_icon(&self, tab: TabId, state: IconState) -> Result<(), HostError> {
        self.record(Call::Icon(tab, state));
        Ok(())
    }

    async fn notify_url_changed(&self, tab: TabId, url: &str) -> Result<(), HostError> {
        self.record(Call::UrlChanged(tab, url.to_string()));
        Ok(())
    }
}

#[async_trait(?Send)]
impl SourceFetcher for FakeHost {
    async fn refresh(&self, mut source: Source) -> Source {
        self.record(Call::Fetch(source.url.clone()));
        if self.fail_fetch.get() {
            source.record_error("404 Not Found", 2);
        } else {
            source.version = "2.0.0".into();
            source.last_fetched = Some(1);
            source.last_error = None;
        }
        source
    }
}

/// One CSP-enabled site with three scripts plus one source with two.
pub fn sample_settings() -> Settings {
    serde_json::from_value(json!({
        "sites": [{
            "id": "site1",
            "domain": "foo.com",
            "cspEnabled": true,
            "scripts": [
                {"id": "s1", "name": "Auto", "code": "auto()", "autoRun": true},
                {"id": "s2", "name": "Manual", "code": "manual()"},
                {"id": "s3", "name": "Style", "code": "body {}", "type": "css", "autoRun": true}
            ]
        }],
        "sources": [{
            "id": "src1",
            "url": "https://github.com/acme/tweaks",
            "name": "Acme",
            "scripts": [
                {"id": "x1", "name": "Remote", "code": "remote()", "autoRun": true,
                 "domains": ["*.foo.com"], "sourceId": "src1"},
                {"id": "x2", "name": "Tool", "code": "tool()",
                 "domains": ["foo.com"], "sourceId": "src1"}
            ]
        }]
    }))
    .unwrap()
}
