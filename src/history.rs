//! Bounded in-memory uptime history for monitored sites
//!
//! Each monitored URL keeps a short sliding window of probe outcomes so the
//! dashboard can show recent stability at a glance. Both the window length
//! and the number of tracked URLs are capped, so memory stays bounded no
//! matter how long the process runs or how often configs change.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Probe outcomes kept per URL.
pub const DEFAULT_MAX_SAMPLES: usize = 10;

/// URLs tracked before the least-recently-read window is dropped.
pub const DEFAULT_MAX_KEYS: usize = 200;

/// Result of a single availability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Unknown,
    Up,
    Down,
}

impl ProbeOutcome {
    /// Map a raw numeric status to an outcome. Values outside the known
    /// set normalize to `Unknown` instead of being rejected.
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => ProbeOutcome::Up,
            2 => ProbeOutcome::Down,
            _ => ProbeOutcome::Unknown,
        }
    }

    pub fn css_class(&self) -> &'static str {
        match self {
            ProbeOutcome::Up => "up",
            ProbeOutcome::Down => "down",
            ProbeOutcome::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    windows: HashMap<String, VecDeque<ProbeOutcome>>,
    last_access: HashMap<String, Instant>,
}

/// Shared store of per-URL probe windows.
#[derive(Debug)]
pub struct UptimeHistory {
    max_samples: usize,
    max_keys: usize,
    inner: Mutex<Inner>,
}

impl UptimeHistory {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SAMPLES, DEFAULT_MAX_KEYS)
    }

    pub fn with_limits(max_samples: usize, max_keys: usize) -> Self {
        Self {
            max_samples,
            max_keys,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append an outcome to the URL's window, trimming the oldest sample
    /// once the window is full. Recording against a new URL while the store
    /// is at capacity evicts the window that has gone unread the longest.
    pub fn record(&self, url: &str, outcome: ProbeOutcome) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        if !inner.windows.contains_key(url) && inner.windows.len() >= self.max_keys {
            let evict = inner
                .last_access
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(key, _)| key.clone());

            if let Some(key) = evict {
                inner.windows.remove(&key);
                inner.last_access.remove(&key);
                debug!(url = %key, "evicted uptime history window");
            }
        }

        let window = inner.windows.entry(url.to_string()).or_default();
        window.push_back(outcome);
        while window.len() > self.max_samples {
            window.pop_front();
        }

        inner.last_access.insert(url.to_string(), Instant::now());
    }

    /// Copy of the URL's window, oldest sample first. Unknown URLs yield an
    /// empty vector. Reading a non-empty window counts as access so sites
    /// still on a dashboard stay resident.
    pub fn get(&self, url: &str) -> Vec<ProbeOutcome> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        let window: Vec<ProbeOutcome> = match inner.windows.get(url) {
            Some(window) => window.iter().copied().collect(),
            None => Vec::new(),
        };

        if !window.is_empty() {
            inner.last_access.insert(url.to_string(), Instant::now());
        }

        window
    }

    /// Number of URLs currently tracked.
    pub fn tracked_urls(&self) -> usize {
        self.inner.lock().unwrap().windows.len()
    }
}

impl Default for UptimeHistory {
    fn default() -> Self {
        Self::new()
    }
}
