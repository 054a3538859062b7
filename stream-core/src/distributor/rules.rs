//! Interval rules and their per-stream firing state.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

use crate::frame::{Frame, PortId};

/// What a route matches: a class label, or the whole frame.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RouteKey {
    FullFrame,
    Class(String),
}

impl RouteKey {
    pub fn class(label: impl Into<String>) -> Self {
        RouteKey::Class(label.into())
    }
}

impl Display for RouteKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteKey::FullFrame => f.write_str("full_frame"),
            RouteKey::Class(label) => f.write_str(label),
        }
    }
}

pub type RouteTable = BTreeMap<RouteKey, BTreeSet<PortId>>;

fn merge(into: &mut RouteTable, from: &RouteTable) {
    for (key, ports) in from {
        into.entry(key.clone()).or_default().extend(ports.iter().copied());
    }
}

/// Route tables keyed by threshold. Rules sharing a threshold are merged by union.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuleSet {
    time: BTreeMap<Duration, RouteTable>,
    frame: BTreeMap<u64, RouteTable>,
}

/// Branches selected for one record, plus the time thresholds that fired.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub branches: RouteTable,
    pub fired_time: Vec<Duration>,
    pub fired_frame: Vec<u64>,
}

impl Evaluation {
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    pub fn ports_for(&self, key: &RouteKey) -> Option<&BTreeSet<PortId>> {
        self.branches.get(key)
    }
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_time_rule(
        &mut self,
        interval: Duration,
        routes: impl IntoIterator<Item = (RouteKey, PortId)>,
    ) {
        let table = self.time.entry(interval).or_default();
        for (key, port) in routes {
            table.entry(key).or_default().insert(port);
        }
    }

    pub fn add_frame_rule(&mut self, interval: u64, routes: impl IntoIterator<Item = (RouteKey, PortId)>) {
        let table = self.frame.entry(interval.max(1)).or_default();
        for (key, port) in routes {
            table.entry(key).or_default().insert(port);
        }
    }

    pub fn time_thresholds(&self) -> impl Iterator<Item = Duration> + '_ {
        self.time.keys().copied()
    }

    pub fn frame_thresholds(&self) -> impl Iterator<Item = u64> + '_ {
        self.frame.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty() && self.frame.is_empty()
    }

    /// Every port any rule can route to.
    pub fn ports(&self) -> BTreeSet<PortId> {
        self.time
            .values()
            .chain(self.frame.values())
            .flat_map(|table| table.values().flatten().copied())
            .collect()
    }

    pub fn class_labels(&self) -> BTreeSet<&str> {
        self.time
            .values()
            .chain(self.frame.values())
            .flat_map(|table| table.keys())
            .filter_map(|key| match key {
                RouteKey::Class(label) => Some(label.as_str()),
                RouteKey::FullFrame => None,
            })
            .collect()
    }

    /// Selects the branches for `frame` without touching `state`. End-of-stream fires
    /// every rule.
    pub fn evaluate(&self, state: &StreamState, frame: &Frame) -> Evaluation {
        let mut evaluation = Evaluation::default();

        for (interval, table) in &self.time {
            let due = frame.end_of_stream
                || match state.last_fired.get(interval) {
                    None => true,
                    Some(last) => frame.timestamp.saturating_duration_since(*last) > *interval,
                };
            if due {
                merge(&mut evaluation.branches, table);
                evaluation.fired_time.push(*interval);
            }
        }

        for (interval, table) in &self.frame {
            if frame.end_of_stream || frame.sequence % interval == 0 {
                merge(&mut evaluation.branches, table);
                evaluation.fired_frame.push(*interval);
            }
        }
        evaluation
    }
}

/// Per-stream distributor state.
#[derive(Debug, Default)]
pub struct StreamState {
    last_fired: HashMap<Duration, Instant>,
    next_sub_index: u64,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the fire time of every time threshold in `evaluation`.
    pub fn commit(&mut self, evaluation: &Evaluation, at: Instant) {
        for interval in &evaluation.fired_time {
            self.last_fired.insert(*interval, at);
        }
    }

    pub fn last_fired(&self, interval: Duration) -> Option<Instant> {
        self.last_fired.get(&interval).copied()
    }

    pub fn next_sub_index(&mut self) -> u64 {
        let index = self.next_sub_index;
        self.next_sub_index += 1;
        index
    }
}

#[cfg(test)]
#[path = "rules_test.rs"]
mod rules_test;
