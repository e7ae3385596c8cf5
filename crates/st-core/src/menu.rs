//! Context menu plan
//!
//! Turns the manual script set of a page into a flat list of menu entries:
//! one parent plus one child per script, each child remembering which script
//! it runs.

use crate::resolver::{ResolvedScript, ScriptOrigin, ScriptIdentity};

pub const MENU_PARENT_ID: &str = "site-tweaker-parent";
pub const MENU_PARENT_TITLE: &str = "Site Tweaker";

/// One entry to create in the host's menu tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    /// Script to run on click; `None` for the parent entry
    pub target: Option<ScriptIdentity>,
}

/// Entries in creation order, parent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuPlan {
    pub entries: Vec<MenuEntry>,
}

impl MenuPlan {
    /// Build a plan with the default parent entry.
    pub fn build(manual: &[ResolvedScript]) -> Self {
        Self::build_with_parent(manual, MENU_PARENT_ID, MENU_PARENT_TITLE)
    }

    /// Build a plan. An empty script set yields an empty plan (no parent either).
    pub fn build_with_parent(manual: &[ResolvedScript], parent_id: &str, parent_title: &str) -> Self {
        if manual.is_empty() {
            return Self::default();
        }

        let mut entries = Vec::with_capacity(manual.len() + 1);
        entries.push(MenuEntry {
            id: parent_id.to_string(),
            parent_id: None,
            title: parent_title.to_string(),
            target: None,
        });

        for script in manual {
            let identity = &script.identity;
            let (id, title) = match identity.origin {
                ScriptOrigin::Site => (
                    format!("site-script-{}", identity.script_id),
                    script.name.clone(),
                ),
                ScriptOrigin::Source => (
                    format!("source-script-{}-{}", identity.owner_id, identity.script_id),
                    format!("{} (SRC)", script.name),
                ),
            };
            entries.push(MenuEntry {
                id,
                parent_id: Some(parent_id.to_string()),
                title,
                target: Some(identity.clone()),
            });
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// (entry id, script) pairs for click dispatch.
    pub fn targets(&self) -> impl Iterator<Item = (&str, &ScriptIdentity)> {
        self.entries
            .iter()
            .filter_map(|entry| entry.target.as_ref().map(|t| (entry.id.as_str(), t)))
    }
}
