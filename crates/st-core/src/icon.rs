//! Toolbar icon state
//!
//! A pure function of the settings and the tab's current URL.

use serde::Serialize;

use crate::types::Settings;
use crate::url::extract_domain;

/// Icon sizes shipped with the extension.
pub const ICON_SIZES: [u32; 4] = [16, 32, 48, 128];

/// Three-state indicator shown per tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IconState {
    /// The current page's domain has an enabled site
    Active,
    /// Globally enabled, but no enabled site matches
    Outline,
    /// Global toggle is off
    Disabled,
}

impl IconState {
    pub fn derive(settings: &Settings, url: Option<&str>) -> Self {
        if !settings.enabled {
            return Self::Disabled;
        }

        let has_site = url
            .and_then(extract_domain)
            .map(|domain| settings.enabled_site_for(&domain).is_some())
            .unwrap_or(false);

        if has_site {
            Self::Active
        } else {
            Self::Outline
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Outline => "outline",
            Self::Disabled => "disabled",
        }
    }

    /// Asset path suffix; the active icon is the unsuffixed one.
    fn suffix(self) -> &'static str {
        match self {
            Self::Active => "",
            Self::Outline => "-outline",
            Self::Disabled => "-disabled",
        }
    }

    /// (size, asset path) pairs for this state.
    pub fn paths(self) -> Vec<(u32, String)> {
        ICON_SIZES
            .iter()
            .map(|size| (*size, format!("icons/icon-{}{}.png", size, self.suffix())))
            .collect()
    }
}
