//! Context menu rebuilds and click dispatch.
//!
//! The host menu tree is shared by every tab, so rebuilds never overlap: a
//! new rebuild waits for the previous one, and a rebuild that has been
//! superseded before it starts does nothing.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use futures::FutureExt;

use st_core::{extract_domain, path_and_query, resolve, MenuPlan, ScriptIdentity};

use crate::error::HostError;
use crate::host::Host;
use crate::Task;

/// Per-page menu of manually runnable scripts.
#[derive(Clone)]
pub struct ContextMenu {
    inner: Rc<MenuInner>,
}

struct MenuInner {
    host: Host,
    parent_id: String,
    parent_title: String,
    /// Menu entry id -> script it runs
    targets: RefCell<HashMap<String, ScriptIdentity>>,
    task: RefCell<Option<Task>>,
    generation: Cell<u64>,
}

impl ContextMenu {
    pub fn new(host: Host, parent_id: &str, parent_title: &str) -> Self {
        Self {
            inner: Rc::new(MenuInner {
                host,
                parent_id: parent_id.to_string(),
                parent_title: parent_title.to_string(),
                targets: RefCell::new(HashMap::new()),
                task: RefCell::new(None),
                generation: Cell::new(0),
            }),
        }
    }

    /// Script behind a menu entry, if the entry belongs to the current menu.
    pub fn target(&self, entry_id: &str) -> Option<ScriptIdentity> {
        self.inner.targets.borrow().get(entry_id).cloned()
    }

    /// Number of script entries currently shown.
    pub fn len(&self) -> usize {
        self.inner.targets.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuild the menu for a page URL, superseding any pending rebuild.
    pub fn rebuild(&self, url: &str) -> Task {
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);

        let previous = self.inner.task.borrow_mut().take();
        let weak = Rc::downgrade(&self.inner);
        let url = url.to_string();

        let task = async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            match weak.upgrade() {
                Some(inner) => inner.run_rebuild(generation, &url).await,
                None => Ok(()),
            }
        }
        .boxed_local()
        .shared();

        *self.inner.task.borrow_mut() = Some(task.clone());
        task
    }
}

impl MenuInner {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.get() == generation
    }

    async fn run_rebuild(self: Rc<Self>, generation: u64, url: &str) -> Result<(), HostError> {
        if !self.is_current(generation) {
            log::debug!("menu rebuild for {} superseded", url);
            return Ok(());
        }

        self.host.menus.clear().await?;
        self.targets.borrow_mut().clear();

        let settings = self.host.store.read().await?;
        if !self.is_current(generation) || !settings.enabled {
            return Ok(());
        }

        let domain = match extract_domain(url) {
            Some(domain) => domain,
            None => return Ok(()),
        };
        let path = path_and_query(url).unwrap_or_else(|| "/".to_string());

        let manual = resolve(&settings, &domain, &path).manual();
        let plan = MenuPlan::build_with_parent(&manual, &self.parent_id, &self.parent_title);
        if plan.is_empty() {
            return Ok(());
        }

        self.targets.borrow_mut().extend(
            plan.targets()
                .map(|(id, target)| (id.to_string(), target.clone())),
        );
        for entry in &plan.entries {
            self.host
                .menus
                .create_entry(&entry.id, entry.parent_id.as_deref(), &entry.title)
                .await?;
        }

        log::info!("context menu: {} scripts for {}", manual.len(), domain);
        Ok(())
    }
}
