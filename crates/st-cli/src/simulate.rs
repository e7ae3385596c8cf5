//! Replay browser events against a coordinator with a console host.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use async_trait::async_trait;
use serde::Deserialize;

use st_core::{IconState, Settings};
use st_rules::HeaderRule;
use st_runtime::{
    BrowserEvent, Coordinator, CoordinatorConfig, Host, HostError, MenuHost, Message, PageInjector,
    RuleEngine, TabHost, TabId, TabInfo,
};

use crate::fetch::github_fetcher;
use crate::settings_file::MemoryStore;

/// One entry of a simulation file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Message {
        message: Message,
        #[serde(default, rename = "senderTab")]
        sender_tab: Option<TabId>,
    },
    Event(BrowserEvent),
}

/// Records every host side effect as a printable line.
#[derive(Default)]
pub struct ConsoleHost {
    lines: RefCell<Vec<String>>,
    tabs: RefCell<BTreeMap<TabId, TabInfo>>,
}

impl ConsoleHost {
    fn emit(&self, line: String) {
        self.lines.borrow_mut().push(line);
    }

    pub fn take_lines(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }

    /// Track open tabs the way the browser would before delivering `event`.
    fn observe(&self, event: &BrowserEvent) {
        let mut tabs = self.tabs.borrow_mut();
        match event {
            BrowserEvent::TabUpdated { tab_id, url, active, .. } => {
                let tab = tabs.entry(*tab_id).or_insert_with(|| TabInfo {
                    id: *tab_id,
                    url: None,
                    active: false,
                });
                if url.is_some() {
                    tab.url = url.clone();
                }
                tab.active |= *active;
            }
            BrowserEvent::HistoryStateUpdated { tab_id, frame_id: 0, url } => {
                if let Some(tab) = tabs.get_mut(tab_id) {
                    tab.url = Some(url.clone());
                }
            }
            BrowserEvent::TabActivated { tab_id, url } => {
                for tab in tabs.values_mut() {
                    tab.active = false;
                }
                let tab = tabs.entry(*tab_id).or_insert_with(|| TabInfo {
                    id: *tab_id,
                    url: None,
                    active: false,
                });
                tab.active = true;
                if url.is_some() {
                    tab.url = url.clone();
                }
            }
            BrowserEvent::TabRemoved { tab_id } => {
                tabs.remove(tab_id);
            }
            _ => {}
        }
    }
}

#[async_trait(?Send)]
impl PageInjector for ConsoleHost {
    async fn insert_style(&self, tab: TabId, css: &str) -> Result<(), HostError> {
        self.emit(format!("tab {}: insert style ({} bytes)", tab, css.len()));
        Ok(())
    }

    async fn execute_in_page(&self, tab: TabId, code: &str) -> Result<(), HostError> {
        self.emit(format!("tab {}: run script ({} bytes)", tab, code.len()));
        Ok(())
    }
}

#[async_trait(?Send)]
impl RuleEngine for ConsoleHost {
    async fn replace_rule(&self, rule_id: u32, rule: Option<&HeaderRule>) -> Result<(), HostError> {
        match rule {
            Some(rule) => self.emit(format!(
                "rule {}: strip {} headers on {}",
                rule_id,
                rule.remove_headers.len(),
                rule.request_domains.join(", ")
            )),
            None => self.emit(format!("rule {}: removed", rule_id)),
        }
        Ok(())
    }
}

#[async_trait(?Send)]
impl MenuHost for ConsoleHost {
    async fn clear(&self) -> Result<(), HostError> {
        self.emit("menu: clear".to_string());
        Ok(())
    }

    async fn create_entry(&self, id: &str, parent_id: Option<&str>, title: &str) -> Result<(), HostError> {
        let indent = if parent_id.is_some() { "  " } else { "" };
        self.emit(format!("menu: {}{} [{}]", indent, title, id));
        Ok(())
    }
}

#[async_trait(?Send)]
impl TabHost for ConsoleHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        Ok(self.tabs.borrow().values().cloned().collect())
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        Ok(self.tabs.borrow().values().find(|tab| tab.active).cloned())
    }

    async fn set_icon(&self, tab: TabId, state: IconState) -> Result<(), HostError> {
        self.emit(format!("tab {}: icon {}", tab, state.as_str()));
        Ok(())
    }

    async fn notify_url_changed(&self, tab: TabId, url: &str) -> Result<(), HostError> {
        self.emit(format!("tab {}: url changed to {}", tab, url));
        Ok(())
    }
}

pub fn parse_steps(text: &str) -> Result<Vec<Step>, String> {
    serde_json::from_str(text).map_err(|e| format!("Invalid simulation file: {}", e))
}

/// Run every step in order; returns the transcript.
pub async fn run_simulation(
    settings: Settings,
    config: CoordinatorConfig,
    steps: Vec<Step>,
) -> Result<Vec<String>, String> {
    let console = Rc::new(ConsoleHost::default());
    let host = Host {
        store: Rc::new(MemoryStore::new(settings)),
        injector: console.clone(),
        rules: console.clone(),
        menus: console.clone(),
        tabs: console.clone(),
        fetcher: Rc::new(github_fetcher()?),
    };
    let coordinator = Coordinator::new(host, config);

    let mut transcript = Vec::new();
    coordinator
        .start()
        .await
        .map_err(|e| format!("Initial rule sync failed: {}", e))?;
    transcript.push("> start".to_string());
    transcript.extend(console.take_lines());

    for step in steps {
        match step {
            Step::Event(event) => {
                transcript.push(format!("> {:?}", event));
                console.observe(&event);
                coordinator.handle_event(event).await;
            }
            Step::Message { message, sender_tab } => {
                transcript.push(format!("> {:?}", message));
                let response = coordinator.handle_message(message, sender_tab).await;
                let response = serde_json::to_string(&response)
                    .map_err(|e| format!("Failed to serialize response: {}", e))?;
                console.emit(format!("reply: {}", response));
            }
        }
        transcript.extend(console.take_lines());
    }

    Ok(transcript)
}
