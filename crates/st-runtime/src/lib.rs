//! Site Tweaker Runtime
//!
//! The event-driven half of Site Tweaker. A [`Coordinator`] is constructed
//! once per extension process and fed browser events and in-extension
//! messages; it keeps the header rule in sync with settings, injects
//! auto-run scripts at most once per navigation, serves manual script runs
//! and maintains the per-page context menu.
//!
//! # Scheduling
//!
//! Everything runs on a single thread. Nothing here spawns tasks: the
//! embedder drives each `handle_event` future to completion (for example with
//! `wasm_bindgen_futures::spawn_local` or a tokio `LocalSet`). Overlapping
//! operations coordinate through shared futures instead of locks.
//!
//! # Modules
//!
//! - `host`: Traits for the browser collaborators
//! - `event`: Typed browser events and in-extension messages
//! - `coordinator`: Rule sync, injection and manual execution
//! - `menu`: Context menu rebuilds and click dispatch
//! - `fetch`: Source refresh from GitHub over any HTTP client
//! - `error`: Error types

pub mod coordinator;
pub mod error;
pub mod event;
pub mod fetch;
pub mod host;
pub mod menu;

#[cfg(test)]
mod fake;

use futures::future::{LocalBoxFuture, Shared};

pub use coordinator::{AutoRun, Coordinator, CoordinatorConfig, InjectionState, ManualExecution};
pub use error::{CoordinatorError, HostError};
pub use fetch::{FetchError, GitHubFetcher, HttpClient, HttpResponse};
pub use event::{BrowserEvent, CurrentTabInfo, ExecutionOutcome, Message, Response, TabStatus, TransitionType};
pub use host::{Host, MenuHost, PageInjector, RuleEngine, SettingsStore, SourceFetcher, TabHost, TabId, TabInfo};
pub use menu::ContextMenu;

/// A cloneable handle on an in-flight operation; every clone observes the same result.
pub type Task = Shared<LocalBoxFuture<'static, Result<(), HostError>>>;
