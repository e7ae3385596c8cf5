//! Browser collaborators backed by a JavaScript bindings object.
//!
//! The extension's background script passes one object whose methods wrap
//! the browser APIs (`chrome.storage`, `chrome.scripting`, ...). Every method
//! may return a plain value or a Promise. Structured values cross the
//! boundary through `serde_wasm_bindgen`, maps as plain objects.
//!
//! Expected methods: `readSettings`, `writeSettings`, `insertStyle`,
//! `executeInPage`, `replaceRule`, `clearMenu`, `createMenuEntry`,
//! `queryTabs`, `activeTab`, `setIcon`, `notifyUrlChanged`, `httpGet`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use js_sys::{Array, Function, Object, Promise, Reflect};
use serde::de::DeserializeOwned;
use serde::Serialize;
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;

use st_core::{IconState, Settings};
use st_rules::HeaderRule;
use st_runtime::{
    HostError, HttpClient, HttpResponse, MenuHost, PageInjector, RuleEngine, SettingsStore, TabHost,
    TabId, TabInfo,
};

#[derive(Clone)]
pub struct JsHost {
    bindings: Object,
}

impl JsHost {
    pub fn new(bindings: Object) -> Self {
        Self { bindings }
    }

    async fn call(&self, method: &str, args: &[JsValue]) -> Result<JsValue, HostError> {
        let func = Reflect::get(&self.bindings, &JsValue::from_str(method))
            .ok()
            .and_then(|value| value.dyn_into::<Function>().ok())
            .ok_or_else(|| HostError::new(format!("host binding {} is missing", method)))?;

        let arguments = Array::new();
        for arg in args {
            arguments.push(arg);
        }

        let value = func.apply(&self.bindings, &arguments).map_err(js_error)?;
        JsFuture::from(Promise::resolve(&value))
            .await
            .map_err(js_error)
    }
}

// =============================================================================
// Serde Bridge
// =============================================================================

pub(crate) fn js_error(value: JsValue) -> HostError {
    if let Some(message) = value.as_string() {
        return HostError::new(message);
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return HostError::new(String::from(error.message()));
    }
    HostError::new(format!("{:?}", value))
}

pub(crate) fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, HostError> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| HostError::new(e.to_string()))
}

pub(crate) fn from_js<T: DeserializeOwned>(value: JsValue) -> Result<T, HostError> {
    serde_wasm_bindgen::from_value(value).map_err(|e| HostError::new(e.to_string()))
}

/// A stored settings value; `undefined` and `null` read as never saved.
pub(crate) fn settings_from_js(value: JsValue) -> Result<Settings, HostError> {
    let stored: Option<serde_json::Value> = from_js(value)?;
    Ok(Settings::from_stored(stored))
}

// =============================================================================
// Collaborators
// =============================================================================

#[async_trait(?Send)]
impl SettingsStore for JsHost {
    async fn read(&self) -> Result<Settings, HostError> {
        settings_from_js(self.call("readSettings", &[]).await?)
    }

    async fn write(&self, settings: &Settings) -> Result<(), HostError> {
        self.call("writeSettings", &[to_js(settings)?]).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl PageInjector for JsHost {
    async fn insert_style(&self, tab: TabId, css: &str) -> Result<(), HostError> {
        self.call("insertStyle", &[JsValue::from(tab), JsValue::from_str(css)])
            .await?;
        Ok(())
    }

    async fn execute_in_page(&self, tab: TabId, code: &str) -> Result<(), HostError> {
        self.call("executeInPage", &[JsValue::from(tab), JsValue::from_str(code)])
            .await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl RuleEngine for JsHost {
    async fn replace_rule(&self, rule_id: u32, rule: Option<&HeaderRule>) -> Result<(), HostError> {
        let rule = match rule {
            Some(rule) => to_js(rule)?,
            None => JsValue::NULL,
        };
        self.call("replaceRule", &[JsValue::from(rule_id), rule]).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl MenuHost for JsHost {
    async fn clear(&self) -> Result<(), HostError> {
        self.call("clearMenu", &[]).await?;
        Ok(())
    }

    async fn create_entry(&self, id: &str, parent_id: Option<&str>, title: &str) -> Result<(), HostError> {
        let parent = parent_id.map(JsValue::from_str).unwrap_or(JsValue::NULL);
        self.call(
            "createMenuEntry",
            &[JsValue::from_str(id), parent, JsValue::from_str(title)],
        )
        .await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl TabHost for JsHost {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        from_js(self.call("queryTabs", &[]).await?)
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        from_js(self.call("activeTab", &[]).await?)
    }

    async fn set_icon(&self, tab: TabId, state: IconState) -> Result<(), HostError> {
        let paths: BTreeMap<String, String> = state
            .paths()
            .into_iter()
            .map(|(size, path)| (size.to_string(), path))
            .collect();
        self.call(
            "setIcon",
            &[JsValue::from(tab), JsValue::from_str(state.as_str()), to_js(&paths)?],
        )
        .await?;
        Ok(())
    }

    async fn notify_url_changed(&self, tab: TabId, url: &str) -> Result<(), HostError> {
        self.call("notifyUrlChanged", &[JsValue::from(tab), JsValue::from_str(url)])
            .await?;
        Ok(())
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsResponse {
    status: u16,
    #[serde(default)]
    status_text: String,
    #[serde(default)]
    body: String,
}

#[async_trait(?Send)]
impl HttpClient for JsHost {
    async fn get(&self, url: &str, token: Option<&str>) -> Result<HttpResponse, HostError> {
        let token = token.map(JsValue::from_str).unwrap_or(JsValue::NULL);
        let response: JsResponse = from_js(self.call("httpGet", &[JsValue::from_str(url), token]).await?)?;
        Ok(HttpResponse {
            status: response.status,
            status_text: response.status_text,
            body: response.body,
        })
    }
}
