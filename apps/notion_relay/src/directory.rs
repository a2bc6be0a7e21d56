use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::UserId;

/// Display name → chat user id. Loaded once at startup and never mutated.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct DirectoryTable {
    entries: HashMap<String, UserId>,
}

impl DirectoryTable {
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(name, id)| (name.into(), UserId::new(id)))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("reading directory file {}", path.display()))?;
        let table: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing directory file {}", path.display()))?;
        for (name, id) in &table.entries {
            if id.is_blank() {
                tracing::warn!(name = %name, "directory entry has an empty user id");
            }
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, name: &str) -> Option<&UserId> {
        self.entries.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no chat user mapped for {}", .name.as_deref().unwrap_or("<no person>"))]
pub struct Unmapped {
    pub name: Option<String>,
}

/// Exact, case-sensitive lookup. Names are not trimmed or folded.
pub fn resolve(person_name: Option<&str>, table: &DirectoryTable) -> Result<UserId, Unmapped> {
    person_name
        .and_then(|name| table.get(name))
        .cloned()
        .ok_or_else(|| Unmapped {
            name: person_name.map(String::from),
        })
}
