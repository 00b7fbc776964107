//! Supervision registry — the one shared table of tracked scripts
//!
//! Every read and write goes through a single async mutex whose critical
//! sections only check and mutate entries. Nothing awaits a child exit or a
//! sleep while holding it, so operations on different names never queue
//! behind each other for long, and operations on the same name are
//! linearized.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;

use crate::process::ProcessHandle;

/// Operator intent for a script, independent of whether a child is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Running,
    Stopped,
}

#[derive(Debug)]
pub struct Entry {
    pub handle: Option<ProcessHandle>,
    /// Handle detached by a stop whose child may not have exited yet. Holds
    /// the name until the exit is observed.
    pub stopping: Option<ProcessHandle>,
    pub generation: u64,
    pub desired: DesiredState,
    /// Auto-restart relaunches within the current generation.
    pub restarts: u32,
}

impl Entry {
    fn new() -> Self {
        Self {
            handle: None,
            stopping: None,
            generation: 0,
            desired: DesiredState::Stopped,
            restarts: 0,
        }
    }

    /// Whether a child of this entry may still be alive, running or stopping.
    pub fn is_occupied(&self) -> bool {
        self.handle.is_some() || self.stopping.as_ref().is_some_and(|h| !h.has_exited())
    }

    /// Whether `generation` is still the lineage this entry wants kept alive.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.desired == DesiredState::Running
    }

    fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            pid: self.handle.as_ref().map(ProcessHandle::pid),
            alive: self.handle.as_ref().is_some_and(|h| !h.has_exited()),
            uptime_secs: self.handle.as_ref().map(|h| h.uptime().as_secs()),
            generation: self.generation,
            desired: self.desired,
            restarts: self.restarts,
        }
    }
}

/// Point-in-time copy of an entry, safe to hold after the lock is released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySnapshot {
    pub pid: Option<u32>,
    pub alive: bool,
    /// Seconds since the current handle was spawned.
    pub uptime_secs: Option<u64>,
    pub generation: u64,
    pub desired: DesiredState,
    pub restarts: u32,
}

/// Source of generation numbers. Shared by every name so that a purged and
/// re-created entry never hands out a number an old loop may still hold.
#[derive(Debug, Default)]
pub struct Generations {
    last: u64,
}

impl Generations {
    pub fn next(&mut self) -> u64 {
        self.last += 1;
        self.last
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    entries: HashMap<String, Entry>,
    generations: Generations,
}

#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, name: &str) -> Option<EntrySnapshot> {
        let state = self.state.lock().await;
        state.entries.get(name).map(Entry::snapshot)
    }

    /// Run `f` on the entry for `name`, creating a stopped entry first if
    /// there is none.
    pub async fn upsert<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Entry, &mut Generations) -> R,
    ) -> R {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let entry = state
            .entries
            .entry(name.to_string())
            .or_insert_with(Entry::new);
        f(entry, &mut state.generations)
    }

    /// Run `f` on the entry for `name` if it exists.
    pub async fn update<R>(&self, name: &str, f: impl FnOnce(&mut Entry) -> R) -> Option<R> {
        let mut state = self.state.lock().await;
        state.entries.get_mut(name).map(f)
    }

    pub async fn remove(&self, name: &str) -> Option<Entry> {
        let mut state = self.state.lock().await;
        state.entries.remove(name)
    }

    /// Names whose entry currently holds a process handle, sorted.
    pub async fn list_running(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.handle.is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every tracked entry, sorted by name.
    pub async fn snapshot_all(&self) -> Vec<(String, EntrySnapshot)> {
        let state = self.state.lock().await;
        let mut all: Vec<(String, EntrySnapshot)> = state
            .entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub async fn names(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.entries.keys().cloned().collect()
    }
}
