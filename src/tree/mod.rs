//! Aggregation-tree construction and broadcast (C2).
//!
//! Builds a rooted tree over a set of leaves bounded by a per-subtree
//! fan-out, then describes the one-shot initialization round a consumer
//! must run before steady-state traffic starts.

mod hungarian;
mod kmeans;

use std::collections::HashMap;

use thiserror::Error;

const MAX_KMEANS_ITERS: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("link cost from {from} to {to} is unreachable")]
    UnreachableLink { from: String, to: String },

    #[error("tree infeasible: {reason}")]
    TreeInfeasible { reason: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// `parent -> children` for one round. A round either maps the root to its
/// intermediate aggregators (and each aggregator to the leaves in its
/// cluster), or - for overflow clusters the root serves directly - maps the
/// root straight to a cluster of leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundMap {
    children: HashMap<String, Vec<String>>,
}

impl RoundMap {
    pub fn new(children: HashMap<String, Vec<String>>) -> Self {
        Self { children }
    }

    pub fn children_of(&self, parent: &str) -> &[String] {
        self.children.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }
}

/// A rooted tree: round 0 is the main tree, subsequent rounds are
/// independent subtrees the consumer serves directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub rounds: Vec<RoundMap>,
    /// Aggregators that must acknowledge initialization before ordinary
    /// traffic starts.
    pub broadcast_list: Vec<String>,
}

impl Tree {
    pub fn round(&self, index: usize) -> Option<&RoundMap> {
        self.rounds.get(index)
    }
}

pub struct TreeBuilder;

impl TreeBuilder {
    /// Build a tree rooted at `root` over `leaves`, preferring to delegate
    /// clusters of at most `fanout` leaves to one of `aggregators` each;
    /// clusters left over once aggregators run out become extra rounds the
    /// root serves directly.
    pub fn build(
        root: &str,
        leaves: &[String],
        aggregators: &[String],
        fanout: usize,
        cost: impl Fn(&str, &str) -> Option<i64>,
    ) -> Result<Tree> {
        if fanout == 0 {
            return Err(Error::TreeInfeasible {
                reason: "fan-out constraint must be positive".to_owned(),
            });
        }
        if leaves.is_empty() {
            return Ok(Tree::default());
        }

        let clusters = kmeans::balanced_kmeans(leaves, fanout, cost, MAX_KMEANS_ITERS)?;

        let assignable = clusters.len().min(aggregators.len());
        if assignable == 0 {
            return Err(Error::TreeInfeasible {
                reason: format!(
                    "{} leaf cluster(s) need an aggregator but none were supplied",
                    clusters.len()
                ),
            });
        }

        let mut broadcast_list = Vec::with_capacity(assignable);
        let mut round0 = HashMap::new();
        round0.insert(root.to_owned(), aggregators[..assignable].to_vec());
        for (agg, cluster) in aggregators[..assignable].iter().zip(clusters.iter()) {
            round0.insert(agg.clone(), cluster.clone());
            broadcast_list.push(agg.clone());
        }

        let mut rounds = vec![RoundMap { children: round0 }];
        for overflow in &clusters[assignable..] {
            let mut map = HashMap::new();
            map.insert(root.to_owned(), overflow.clone());
            rounds.push(RoundMap { children: map });
        }

        Ok(Tree {
            rounds,
            broadcast_list,
        })
    }
}
