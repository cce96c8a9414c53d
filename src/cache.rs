//! Script block cache
//!
//! Maps (origin, exact text) to a parsed script so repeated creation skips
//! parsing and compilation. Entries never carry a bound session; lookups hand
//! out detached clones for the caller to bind. When the entry count exceeds
//! the ceiling the whole map is cleared before the next insert.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::CacheConfig;
use crate::errors::{InvariantViolation, ScriptError};
use crate::script_block::ScriptBlock;

type CacheKey = (String, String);

#[derive(Debug)]
pub struct ScriptBlockCache {
    entries: RwLock<HashMap<CacheKey, ScriptBlock>>,
    max_entries: usize,
    enabled: bool,
}

impl ScriptBlockCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: config.max_entries,
            enabled: config.enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A fresh, unbound clone of the cached handle
    pub fn lookup(&self, origin: &str, text: &str) -> Result<Option<ScriptBlock>, ScriptError> {
        if !self.enabled {
            return Ok(None);
        }
        let entries = self.entries.read();
        let key = (origin.to_string(), text.to_string());
        match entries.get(&key) {
            Some(cached) if cached.is_bound() => {
                Err(InvariantViolation::CachedHandleBound.into())
            }
            Some(cached) => Ok(Some(cached.detached())),
            None => Ok(None),
        }
    }

    /// Store an unbound copy of `block`. Overwrites an equivalent entry.
    pub fn insert(&self, origin: &str, text: &str, block: &ScriptBlock) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.write();
        if entries.len() > self.max_entries {
            debug!(entries = entries.len(), "Script block cache full, clearing");
            entries.clear();
        }
        entries.insert((origin.to_string(), text.to_string()), block.detached());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for ScriptBlockCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
