// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Note to sample path resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::{Config, ConfigError};

/// The filename marking a note as deliberately unmapped.
pub const UNMAPPED_SENTINEL: &str = "-1";

/// Resolves note numbers to sample file paths.
///
/// The table is built once from configuration and immutable afterwards;
/// `resolve` is pure and stable for the process lifetime.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    table: HashMap<u8, PathBuf>,
}

impl AssetResolver {
    /// Builds a resolver from the configured sounds mapping. Filenames
    /// are joined onto the resource directory; sentinel entries resolve
    /// to nothing.
    pub fn from_config(config: &Config) -> Result<AssetResolver, ConfigError> {
        let mut table = HashMap::new();
        for (key, filename) in config.sounds() {
            let note: u8 = key.parse().map_err(|_| ConfigError::Invalid {
                field: format!("sounds.{}", key),
                reason: "note numbers must be decimal integers in 0-127".to_string(),
            })?;
            if note > 127 {
                return Err(ConfigError::Invalid {
                    field: format!("sounds.{}", key),
                    reason: format!("note {} is not in 0-127", note),
                });
            }
            if filename == UNMAPPED_SENTINEL {
                continue;
            }
            table.insert(note, config.resource_dir().join(filename));
        }
        Ok(AssetResolver { table })
    }

    /// Resolves a note to its sample path, if mapped.
    pub fn resolve(&self, note: u8) -> Option<&Path> {
        self.table.get(&note).map(PathBuf::as_path)
    }

    /// Iterates over all mapped sample paths, for preloading.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.table.values().map(PathBuf::as_path)
    }

    /// Returns the number of mapped notes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns whether no notes are mapped.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
impl AssetResolver {
    /// Builds a resolver directly from a note to path table (test only).
    pub fn from_table(table: HashMap<u8, PathBuf>) -> AssetResolver {
        AssetResolver { table }
    }
}
