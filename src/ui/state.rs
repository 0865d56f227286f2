use std::collections::HashSet;

use crate::common::Ping;

/// What the history view currently shows.
#[derive(Default)]
pub struct HistoryState {
    pub pings: Vec<Ping>,
    pub loaded: bool,
    seen: HashSet<String>,
}

impl HistoryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list and returns how many pings were not shown before.
    /// The first snapshot counts as zero new.
    pub fn apply_snapshot(&mut self, pings: Vec<Ping>) -> usize {
        let fresh = pings
            .iter()
            .filter(|ping| !self.seen.contains(&ping.id))
            .count();
        self.seen.extend(pings.iter().map(|ping| ping.id.clone()));
        self.pings = pings;

        if self.loaded {
            fresh
        } else {
            self.loaded = true;
            0
        }
    }
}
