//! WebAssembly bindings for Site Tweaker
//!
//! Two surfaces:
//!
//! - stateless helpers (pattern matching, rule synthesis, icon state) that
//!   the popup and editor call directly
//! - [`Background`], the long-lived coordinator the background script
//!   feeds browser events and messages into

mod host;

use std::rc::Rc;
use std::sync::Once;

use js_sys::{Array, Object, Promise};
use log::Level;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use st_core::{extract_domain, normalize_domain, path_and_query, resolve, IconState, MenuPlan, Settings};
use st_rules::synthesize;
use st_runtime::{BrowserEvent, Coordinator, CoordinatorConfig, GitHubFetcher, Host, HostError, Message};

use crate::host::{from_js, settings_from_js, to_js, JsHost};

static LOGGER: Once = Once::new();

/// Install the panic hook and console logger. Later calls change nothing.
#[wasm_bindgen]
pub fn init(log_level: Option<String>) {
    console_error_panic_hook::set_once();

    let level = log_level
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::Info);
    LOGGER.call_once(|| wasm_logger::init(wasm_logger::Config::new(level)));
}

fn js_error(error: HostError) -> JsValue {
    JsValue::from_str(error.message())
}

fn read_settings(value: JsValue) -> Result<Settings, JsValue> {
    settings_from_js(value).map_err(js_error)
}

fn now_ms() -> i64 {
    js_sys::Date::now() as i64
}

// =============================================================================
// Stateless Helpers
// =============================================================================

#[wasm_bindgen]
pub fn matches_domain_pattern(domain: &str, pattern: &str) -> bool {
    st_core::matches_domain(domain, pattern)
}

#[wasm_bindgen]
pub fn matches_path_patterns(path: &str, patterns: JsValue) -> bool {
    let patterns: Vec<String> = Array::from(&patterns)
        .iter()
        .filter_map(|value| value.as_string())
        .collect();
    st_core::matches_path(path, &patterns)
}

#[wasm_bindgen]
pub fn normalize_domain_js(input: &str) -> String {
    normalize_domain(input)
}

#[wasm_bindgen]
pub fn extract_domain_js(url: &str) -> Option<String> {
    extract_domain(url)
}

/// The header-stripping rule for `settings`, or `null` when none applies.
#[wasm_bindgen]
pub fn synthesize_rule(settings: JsValue) -> Result<JsValue, JsValue> {
    let settings = read_settings(settings)?;
    match synthesize(&settings) {
        Some(rule) => to_js(&rule).map_err(js_error),
        None => Ok(JsValue::NULL),
    }
}

#[wasm_bindgen]
pub fn icon_state(settings: JsValue, url: Option<String>) -> Result<String, JsValue> {
    let settings = read_settings(settings)?;
    Ok(IconState::derive(&settings, url.as_deref()).as_str().to_string())
}

/// `{ autoRun, manual }` script lists for a page URL.
#[wasm_bindgen]
pub fn resolve_scripts(settings: JsValue, url: &str) -> Result<JsValue, JsValue> {
    let settings = read_settings(settings)?;
    let domain = extract_domain(url).unwrap_or_default();
    let path = path_and_query(url).unwrap_or_else(|| "/".to_string());
    let matches = resolve(&settings, &domain, &path);

    let result = serde_json::json!({
        "autoRun": matches.auto_run(url),
        "manual": matches.manual(),
    });
    to_js(&result).map_err(js_error)
}

/// Context menu entries for a page URL, parent first.
#[wasm_bindgen]
pub fn menu_entries(settings: JsValue, url: &str) -> Result<JsValue, JsValue> {
    let settings = read_settings(settings)?;
    let domain = extract_domain(url).unwrap_or_default();
    let path = path_and_query(url).unwrap_or_else(|| "/".to_string());
    let plan = MenuPlan::build(&resolve(&settings, &domain, &path).manual());

    let entries = Array::new();
    for entry in &plan.entries {
        let object = Object::new();
        let _ = js_sys::Reflect::set(&object, &"id".into(), &JsValue::from_str(&entry.id));
        let _ = js_sys::Reflect::set(&object, &"title".into(), &JsValue::from_str(&entry.title));
        if let Some(parent) = &entry.parent_id {
            let _ = js_sys::Reflect::set(&object, &"parentId".into(), &JsValue::from_str(parent));
        }
        entries.push(&object);
    }
    Ok(entries.into())
}

// =============================================================================
// Background
// =============================================================================

/// Background-side coordinator. Construct once per extension process.
#[wasm_bindgen]
pub struct Background {
    coordinator: Coordinator,
}

#[wasm_bindgen]
impl Background {
    /// `bindings` wraps the browser APIs; `config` is optional.
    #[wasm_bindgen(constructor)]
    pub fn new(bindings: Object, config: JsValue) -> Result<Background, JsValue> {
        let config: CoordinatorConfig = if config.is_undefined() || config.is_null() {
            CoordinatorConfig::default()
        } else {
            from_js(config).map_err(js_error)?
        };

        let js = Rc::new(JsHost::new(bindings));
        let host = Host {
            store: js.clone(),
            injector: js.clone(),
            rules: js.clone(),
            menus: js.clone(),
            tabs: js.clone(),
            fetcher: Rc::new(GitHubFetcher::new(JsHost::clone(&js), now_ms)),
        };

        Ok(Self {
            coordinator: Coordinator::new(host, config),
        })
    }

    /// Initial header rule sync.
    pub fn start(&self) -> Promise {
        let coordinator = self.coordinator.clone();
        future_to_promise(async move {
            coordinator.start().await.map_err(js_error)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(js_name = handleEvent)]
    pub fn handle_event(&self, event: JsValue) -> Result<Promise, JsValue> {
        let event: BrowserEvent = from_js(event).map_err(js_error)?;
        let coordinator = self.coordinator.clone();
        Ok(future_to_promise(async move {
            coordinator.handle_event(event).await;
            Ok(JsValue::UNDEFINED)
        }))
    }

    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, message: JsValue, sender_tab: Option<i32>) -> Result<Promise, JsValue> {
        let message: Message = from_js(message).map_err(js_error)?;
        let coordinator = self.coordinator.clone();
        Ok(future_to_promise(async move {
            let response = coordinator.handle_message(message, sender_tab).await;
            to_js(&response).map_err(js_error)
        }))
    }

    #[wasm_bindgen(js_name = addSource)]
    pub fn add_source(&self, url: String, token: Option<String>) -> Promise {
        let coordinator = self.coordinator.clone();
        future_to_promise(async move {
            let source = coordinator
                .add_source(&url, token)
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            to_js(&source).map_err(js_error)
        })
    }

    #[wasm_bindgen(js_name = refreshSource)]
    pub fn refresh_source(&self, source_id: String) -> Promise {
        let coordinator = self.coordinator.clone();
        future_to_promise(async move {
            let source = coordinator
                .refresh_source(&source_id)
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            to_js(&source).map_err(js_error)
        })
    }

    #[wasm_bindgen(js_name = refreshAllSources)]
    pub fn refresh_all_sources(&self) -> Promise {
        let coordinator = self.coordinator.clone();
        future_to_promise(async move {
            let count = coordinator
                .refresh_all_sources()
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            Ok(JsValue::from(count as u32))
        })
    }
}
