// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Channel registry — name → engine, with lazy creation and teardown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use crate::error::{DlsError, Result};
use crate::storage::engine::{StorageEngine, StorageOptions};
use crate::storage::pool::SharedResources;

pub type SharedEngine = Arc<Mutex<StorageEngine>>;

pub struct StorageChannels {
    data_dir: PathBuf,
    opts: StorageOptions,
    resources: Arc<SharedResources>,
    channels: RwLock<HashMap<String, SharedEngine>>,
}

impl StorageChannels {
    pub fn open(
        data_dir: PathBuf,
        opts: StorageOptions,
        resources: Arc<SharedResources>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| DlsError::Storage(format!("Cannot create data dir {data_dir:?}: {e}")))?;
        Ok(Self {
            data_dir,
            opts,
            resources,
            channels: RwLock::new(HashMap::new()),
        })
    }

    /// Engine for an existing channel: already open, or present on disk
    /// from an earlier run. `None` for a channel that never saw a write.
    pub fn get(&self, name: &str) -> Result<Option<SharedEngine>> {
        validate_channel_name(name)?;
        if let Some(engine) = self.channels.read().get(name) {
            return Ok(Some(engine.clone()));
        }
        if !self.data_dir.join(name).is_dir() {
            return Ok(None);
        }
        self.get_or_create(name).map(Some)
    }

    /// Engine for `name`, created on first use.
    pub fn get_or_create(&self, name: &str) -> Result<SharedEngine> {
        validate_channel_name(name)?;
        let mut channels = self.channels.write();
        if let Some(engine) = channels.get(name) {
            return Ok(engine.clone());
        }
        let engine = StorageEngine::open(&self.data_dir, name, self.opts.clone(), &self.resources)?;
        let engine = Arc::new(Mutex::new(engine));
        channels.insert(name.to_string(), engine.clone());
        info!(channel = %name, "Channel opened");
        Ok(engine)
    }

    /// Close the engine and delete the channel directory tree.
    /// Returns whether anything existed to remove.
    pub fn remove(&self, name: &str) -> Result<bool> {
        validate_channel_name(name)?;
        let engine = self.channels.write().remove(name);
        if let Some(engine) = &engine {
            engine.lock().close()?;
        }
        let dir = self.data_dir.join(name);
        if dir.is_dir() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| DlsError::Storage(format!("Cannot remove channel dir {dir:?}: {e}")))?;
            info!(channel = %name, "Channel removed");
            return Ok(true);
        }
        Ok(engine.is_some())
    }

    /// Names of all channels: open ones plus those present on disk.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Flush every open engine. Called on shutdown.
    pub fn shutdown(&self) {
        for (name, engine) in self.channels.write().drain() {
            if let Err(e) = engine.lock().close() {
                error!(channel = %name, error = %e, "Failed to close channel");
            }
        }
    }
}

/// Channel names become directory names; reject anything that could
/// escape the data directory.
pub fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(DlsError::BadRequest("Empty channel name".into()));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(DlsError::BadRequest(format!("Invalid channel name '{name}'")));
    }
    Ok(())
}
