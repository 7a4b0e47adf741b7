use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::window::ComicId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// User preferences persisted between sessions: the comic to reopen on
/// startup, per-comic like counters, and the color theme. Mutators save
/// immediately; a failed save is logged, never fatal.
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Preferences {
    pub last_viewed: Option<ComicId>,
    #[serde(default)]
    pub likes: HashMap<ComicId, u32>,
    #[serde(default)]
    pub theme: Theme,
    #[serde(skip)]
    path: PathBuf,
}

fn preferences_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xkcd-tui");

    fs::create_dir_all(&config_dir).ok();
    config_dir.join("preferences.json")
}

impl Preferences {
    pub fn load() -> Self {
        Self::load_from(preferences_path())
    }

    /// Missing or corrupt files load as defaults.
    pub fn load_from(path: PathBuf) -> Self {
        let mut prefs = read_prefs(&path).unwrap_or_default();
        prefs.path = path;
        prefs
    }

    pub fn save(&self) {
        match serde_json::to_string_pretty(self) {
            Ok(content) => {
                if let Err(e) = fs::write(&self.path, content) {
                    warn!("failed to save preferences: {e}");
                }
            }
            Err(e) => warn!("failed to serialize preferences: {e}"),
        }
    }

    pub fn set_last_viewed(&mut self, id: ComicId) {
        self.last_viewed = Some(id);
        self.save();
    }

    /// Increments the like counter for a comic and returns the new count.
    pub fn like(&mut self, id: ComicId) -> u32 {
        let count = self.likes.entry(id).or_insert(0);
        *count += 1;
        let count = *count;
        self.save();
        count
    }

    pub fn likes_for(&self, id: ComicId) -> u32 {
        self.likes.get(&id).copied().unwrap_or(0)
    }

    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.save();
        self.theme
    }
}

fn read_prefs(path: &Path) -> Option<Preferences> {
    if !path.exists() {
        return None;
    }

    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(prefs) => Some(prefs),
        Err(e) => {
            warn!("ignoring corrupt preferences file: {e}");
            None
        }
    }
}
