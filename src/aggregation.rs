//! Streaming aggregation engine (C6): per-iteration partial sums and
//! congestion sets, keyed by sequence number, with completion detection.

use std::collections::{HashMap, HashSet};

use crate::face::Time;
use crate::wire::{ModelData, Name};

/// Per-iteration state held by an aggregator (§3 "Iteration state
/// (aggregator)").
#[derive(Debug, Clone)]
pub struct AggregatorIterationState {
    pub partial_sum: Vec<f32>,
    pub congested: Vec<String>,
    pub outstanding: HashSet<Name>,
    pub original_name: Name,
    pub start_time: Time,
    pub self_congested: bool,
}

impl AggregatorIterationState {
    pub fn new(p: usize, original_name: Name, start_time: Time, outstanding: HashSet<Name>) -> Self {
        Self {
            partial_sum: vec![0.0; p],
            congested: Vec::new(),
            outstanding,
            original_name,
            start_time,
            self_congested: false,
        }
    }

    /// Fold in one child's reply, removing it from the outstanding set.
    /// Returns whether the iteration is now complete.
    pub fn accumulate(&mut self, returning_name: &Name, data: &ModelData) -> bool {
        for (acc, v) in self.partial_sum.iter_mut().zip(data.parameters.iter()) {
            *acc += v;
        }
        self.congested.extend(data.congested_nodes.iter().cloned());
        self.outstanding.remove(returning_name);
        self.outstanding.is_empty()
    }

    /// The payload to forward upstream: the partial sum unscaled, plus this
    /// node's own id appended to the congestion list if it flagged itself
    /// congested (§4.6). Remote-ECN for whoever receives this is implied by
    /// a non-empty congestion list.
    pub fn into_forwarded_payload(self, self_node_id: &str) -> ModelData {
        let mut congested_nodes = self.congested;
        if self.self_congested {
            congested_nodes.push(self_node_id.to_owned());
        }
        ModelData {
            parameters: self.partial_sum,
            congested_nodes,
        }
    }
}

/// Per-iteration state held by the consumer (§3 "Iteration state
/// (consumer)"): one outstanding-children set per round.
#[derive(Debug, Clone)]
pub struct ConsumerIterationState {
    pub sum: Vec<f32>,
    pub outstanding_per_round: Vec<HashSet<String>>,
    pub start_time: Time,
}

impl ConsumerIterationState {
    pub fn new(p: usize, start_time: Time, outstanding_per_round: Vec<HashSet<String>>) -> Self {
        Self {
            sum: vec![0.0; p],
            outstanding_per_round,
            start_time,
        }
    }

    /// Fold in one round-child's reply. Returns whether every round has now
    /// reported in.
    pub fn accumulate(&mut self, round: usize, child: &str, data: &ModelData) -> bool {
        for (acc, v) in self.sum.iter_mut().zip(data.parameters.iter()) {
            *acc += v;
        }
        if let Some(pending) = self.outstanding_per_round.get_mut(round) {
            pending.remove(child);
        }
        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        self.outstanding_per_round.iter().all(HashSet::is_empty)
    }

    pub fn mean(&self, producer_count: usize) -> Vec<f32> {
        let n = producer_count as f32;
        self.sum.iter().map(|v| v / n).collect()
    }
}

/// Keyed-by-sequence table of in-flight iteration state, shared shape for
/// both roles.
#[derive(Debug, Default)]
pub struct IterationTable<S> {
    states: HashMap<u64, S>,
}

impl<S> IterationTable<S> {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
        }
    }

    pub fn get_mut(&mut self, seq: u64) -> Option<&mut S> {
        self.states.get_mut(&seq)
    }

    pub fn contains(&self, seq: u64) -> bool {
        self.states.contains_key(&seq)
    }

    pub fn insert(&mut self, seq: u64, state: S) {
        self.states.insert(seq, state);
    }

    /// Destroy the state once aggregation for `seq` is complete, returning
    /// it for the caller to turn into an outgoing packet.
    pub fn remove(&mut self, seq: u64) -> Option<S> {
        self.states.remove(&seq)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
