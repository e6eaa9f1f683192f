//! Learned checksums, keyed by the command they complete.
//!
//! The checksum that terminates every outbound command can't be computed from
//! the command itself. It is learned by the analyzer and looked up here.
//! Entries are only ever added, never replaced or removed.

use std::{collections::HashMap, io::BufRead};

use log::warn;
use thiserror::Error;


#[derive(Error, Debug)]
pub enum CacheError {
    #[error("line {line}: expected COMMAND=CHECKSUM, got {content:?}")]
    Malformed {
        line: usize,
        content: String
    },
    #[error("failed to read checksum cache")]
    Io(#[from] std::io::Error),
}


#[derive(Clone, Debug, Default)]
pub struct CommandCache {
    entries: HashMap<String, String>
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checksum for `command`, if one was learned.
    ///
    /// Empty checksums are treated as missing.
    pub fn get(&self, command: &str) -> Option<&str> {
        self.entries.get(command)
            .map(String::as_str)
            .filter(|checksum| !checksum.is_empty())
    }

    /// Add a checksum. Commands and checksums are stored upper-cased.
    ///
    /// Returns `false`, leaving the existing entry untouched,
    /// if `command` already has one.
    pub fn insert(&mut self, command: impl Into<String>, checksum: impl Into<String>) -> bool {
        let command = command.into().to_ascii_uppercase();

        if self.entries.contains_key(&command) {
            warn!("Checksum for command {command} already cached, ignoring new value");
            return false;
        }

        self.entries.insert(command, checksum.into().to_ascii_uppercase());
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read `COMMAND=CHECKSUM` lines. Blank lines and `#` comments are skipped.
    pub fn read<R: BufRead>(reader: R) -> Result<Self, CacheError> {
        let mut cache = Self::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let content = line.trim();

            if content.is_empty() || content.starts_with('#') {
                continue;
            }

            let Some((command, checksum)) = content.split_once('=') else {
                return Err(CacheError::Malformed { line: idx + 1, content: content.to_string() })
            };

            cache.insert(command.trim(), checksum.trim());
        }

        Ok(cache)
    }
}

impl<K, V> FromIterator<(K, V)> for CommandCache where
    K: Into<String>,
    V: Into<String>
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut cache = Self::new();
        cache.extend(iter);
        cache
    }
}

impl<K, V> Extend<(K, V)> for CommandCache where
    K: Into<String>,
    V: Into<String>
{
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (command, checksum) in iter {
            self.insert(command, checksum);
        }
    }
}
