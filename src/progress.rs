//! Collection progress
//!
//! A [`ProgressTree`] holds one [`ProgressDone`] entry per scope (the global
//! scope and every region) below the account.

use serde::Serialize;
use std::collections::BTreeMap;

/// Progress of a single scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressDone {
    pub name: String,
    pub current: u64,
    pub total: u64,
}

impl ProgressDone {
    pub fn new(name: &str, current: u64, total: u64) -> Self {
        Self {
            name: name.to_string(),
            current,
            total,
        }
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.total
    }

    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current.min(self.total) * 100) / self.total) as u8
    }
}

/// Progress of all scopes of an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressTree {
    pub name: String,
    /// Context above this tree, e.g. the cloud id
    pub path: Vec<String>,
    pub entries: BTreeMap<String, ProgressDone>,
}

impl ProgressTree {
    pub fn new(name: &str, path: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            path,
            entries: BTreeMap::new(),
        }
    }

    pub fn add_progress(&mut self, progress: ProgressDone) {
        self.entries.insert(progress.name.clone(), progress);
    }

    /// Update an entry; unknown scopes are added
    pub fn update(&mut self, name: &str, current: u64, total: u64) {
        self.add_progress(ProgressDone::new(name, current, total));
    }

    pub fn get(&self, name: &str) -> Option<&ProgressDone> {
        self.entries.get(name)
    }

    pub fn current(&self) -> u64 {
        self.entries.values().map(|p| p.current.min(p.total)).sum()
    }

    pub fn total(&self) -> u64 {
        self.entries.values().map(|p| p.total).sum()
    }

    pub fn is_done(&self) -> bool {
        self.entries.values().all(ProgressDone::is_done)
    }
}
