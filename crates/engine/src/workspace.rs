// pyreplay - Python Execution Replay
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Workspace file access consumed by the recorder and the replay engine.

use std::sync::Arc;

use eyre::{eyre, Result};
use indexmap::IndexMap;
use parking_lot::RwLock;

/// Callback invoked with the path of a file whose displayed content changed
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Editor-side view of the workspace
pub trait FileManager: Send + Sync {
    /// Paths of every file in the workspace
    fn list_files(&self) -> Vec<String>;

    /// Saved content of a file
    fn read_file(&self, path: &str) -> Option<String>;

    /// File currently shown in the editor
    fn active_file(&self) -> Option<String>;

    /// Show a file in the editor
    fn open_file(&self, path: &str) -> Result<()>;

    /// Persist unsaved edits of the active file
    fn save_active_edits(&self) -> Result<()>;

    /// Path and content of every Python file
    fn python_sources(&self) -> Vec<(String, String)> {
        self.list_files()
            .into_iter()
            .filter(|path| path.ends_with(".py"))
            .filter_map(|path| self.read_file(&path).map(|content| (path, content)))
            .collect()
    }
}

/// In-memory workspace with a single editor buffer
#[derive(Default)]
pub struct MemoryFileManager {
    files: RwLock<IndexMap<String, String>>,
    active: RwLock<Option<String>>,
    unsaved: RwLock<Option<String>>,
    listeners: RwLock<Vec<ChangeListener>>,
}

impl std::fmt::Debug for MemoryFileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFileManager")
            .field("files", &self.files.read().keys().collect::<Vec<_>>())
            .field("active", &*self.active.read())
            .finish()
    }
}

impl MemoryFileManager {
    /// Create an empty workspace
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a workspace holding the given files
    pub fn with_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let manager = Self::new();
        for (path, content) in files {
            manager.write_file(path, content);
        }
        manager
    }

    /// Create or overwrite a saved file
    pub fn write_file(&self, path: impl Into<String>, content: impl Into<String>) {
        self.files.write().insert(path.into(), content.into());
    }

    /// Replace the editor buffer of the active file without saving
    pub fn edit_active(&self, content: impl Into<String>) -> Result<()> {
        let active = self.active.read().clone().ok_or_else(|| eyre!("no active file"))?;
        *self.unsaved.write() = Some(content.into());
        self.notify(&active);
        Ok(())
    }

    /// Whether the active file has unsaved edits
    pub fn has_unsaved_edits(&self) -> bool {
        self.unsaved.read().is_some()
    }

    /// Register a listener for displayed-content changes
    pub fn subscribe(&self, listener: ChangeListener) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, path: &str) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(path);
        }
    }
}

impl FileManager for MemoryFileManager {
    fn list_files(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    fn read_file(&self, path: &str) -> Option<String> {
        self.files.read().get(path).cloned()
    }

    fn active_file(&self) -> Option<String> {
        self.active.read().clone()
    }

    fn open_file(&self, path: &str) -> Result<()> {
        if !self.files.read().contains_key(path) {
            return Err(eyre!("no such file: {path}"));
        }
        if self.has_unsaved_edits() {
            return Err(eyre!("active file has unsaved edits"));
        }
        *self.active.write() = Some(path.to_string());
        self.notify(path);
        Ok(())
    }

    fn save_active_edits(&self) -> Result<()> {
        let Some(content) = self.unsaved.write().take() else {
            return Ok(());
        };
        let active = self.active.read().clone().ok_or_else(|| eyre!("no active file"))?;
        self.files.write().insert(active, content);
        Ok(())
    }
}
