//! URL frontier with deduplication and visitation tracking
//!
//! Every known URL lives in exactly one of three sets: queued, in-flight or
//! visited. URLs only move forward (queued → in-flight → visited), so a URL
//! is handed out by [`Frontier::next_batch`] at most once per crawl.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Where a URL currently sits in the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlState {
    Queued,
    InFlight,
    Visited,
}

#[derive(Debug, Default)]
struct FrontierSets {
    queue: VecDeque<String>,
    queued: HashSet<String>,
    in_flight: HashSet<String>,
    visited: HashSet<String>,
}

/// Thread-safe URL work set
///
/// All operations take `&self` and hold one internal lock for their whole
/// duration, so membership transitions are atomic even when several fetch
/// completions fold into the frontier at once.
///
/// URLs are opaque: no normalization is applied, so `https://a/x` and
/// `https://a/x/` are distinct entries.
#[derive(Debug, Default)]
pub struct Frontier {
    sets: Mutex<FrontierSets>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FrontierSets> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `url` unless it is already known. Returns whether it was added.
    pub fn add(&self, url: &str) -> bool {
        let mut sets = self.lock();
        if sets.queued.contains(url) || sets.in_flight.contains(url) || sets.visited.contains(url) {
            return false;
        }
        sets.queued.insert(url.to_string());
        sets.queue.push_back(url.to_string());
        true
    }

    /// Move up to `n` queued URLs to in-flight and return them.
    pub fn next_batch(&self, n: usize) -> Vec<String> {
        let mut sets = self.lock();
        let take = n.min(sets.queue.len());
        let batch: Vec<String> = sets.queue.drain(..take).collect();
        for url in &batch {
            sets.queued.remove(url);
            sets.in_flight.insert(url.clone());
        }
        batch
    }

    /// Move `url` from in-flight to visited.
    ///
    /// Returns `false` (and changes nothing) when `url` was not in flight; a
    /// URL is never marked visited without first being handed out.
    pub fn mark_visited(&self, url: &str) -> bool {
        let mut sets = self.lock();
        if !sets.in_flight.remove(url) {
            tracing::debug!("mark_visited called for {} which is not in flight", url);
            return false;
        }
        sets.visited.insert(url.to_string());
        true
    }

    /// Termination predicate: anything queued or still in flight.
    pub fn has_more(&self) -> bool {
        let sets = self.lock();
        !sets.queue.is_empty() || !sets.in_flight.is_empty()
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn visited_len(&self) -> usize {
        self.lock().visited.len()
    }

    pub fn state_of(&self, url: &str) -> Option<UrlState> {
        let sets = self.lock();
        if sets.queued.contains(url) {
            Some(UrlState::Queued)
        } else if sets.in_flight.contains(url) {
            Some(UrlState::InFlight)
        } else if sets.visited.contains(url) {
            Some(UrlState::Visited)
        } else {
            None
        }
    }

    /// Snapshot of the visited set.
    pub fn visited(&self) -> HashSet<String> {
        self.lock().visited.clone()
    }
}
