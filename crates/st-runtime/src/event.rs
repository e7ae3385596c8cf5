//! Typed browser events and in-extension messages.
//!
//! Both arrive from JavaScript as JSON objects tagged by `type`.

use serde::{Deserialize, Serialize};

use st_core::SiteData;

use crate::error::CoordinatorError;
use crate::host::TabId;

/// Load status reported with a tab update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
    #[serde(other)]
    Unloaded,
}

/// How a frame navigation was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Link,
    Typed,
    AutoBookmark,
    /// Sub-frame loaded automatically (ads, widgets); never a real navigation
    AutoSubframe,
    ManualSubframe,
    Generated,
    StartPage,
    FormSubmit,
    Reload,
    Keyword,
    KeywordGenerated,
    #[serde(other)]
    Other,
}

/// Browser events the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrowserEvent {
    /// Tab status or URL changed; `url` is the tab's current URL.
    #[serde(rename_all = "camelCase")]
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        status: Option<TabStatus>,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        active: bool,
    },
    /// Same-document navigation (history API); no load-complete follows.
    #[serde(rename_all = "camelCase")]
    HistoryStateUpdated {
        tab_id: TabId,
        frame_id: i32,
        url: String,
    },
    #[serde(rename_all = "camelCase")]
    NavigationCommitted {
        tab_id: TabId,
        frame_id: i32,
        url: String,
        transition_type: TransitionType,
    },
    #[serde(rename_all = "camelCase")]
    TabActivated {
        tab_id: TabId,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    TabRemoved { tab_id: TabId },
    /// Storage change carrying the changed keys.
    SettingsChanged { keys: Vec<String> },
    #[serde(rename_all = "camelCase")]
    MenuClicked {
        entry_id: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
}

/// Requests from the popup, editor or in-page UI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    ExecuteScript {
        site_id: String,
        script_id: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    #[serde(rename_all = "camelCase")]
    ExecuteSourceScript {
        source_id: String,
        script_id: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    GetSiteData {
        domain: String,
        #[serde(default)]
        path: Option<String>,
    },
    GetCurrentTabInfo,
}

/// Result of a manual script run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

impl From<Result<(), CoordinatorError>> for ExecutionOutcome {
    fn from(result: Result<(), CoordinatorError>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

/// The active tab as seen by the popup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentTabInfo {
    pub tab_id: Option<TabId>,
    pub url: Option<String>,
    pub domain: Option<String>,
}

/// Reply to a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Execution(ExecutionOutcome),
    SiteData(Option<SiteData>),
    TabInfo(CurrentTabInfo),
}
