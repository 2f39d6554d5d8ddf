//! Wait-for graph between resolver contexts
//!
//! An edge `waiter -> owner` exists while the waiter blocks on a service
//! the owner is constructing. An edge that would let the owner reach the
//! waiter is refused, since both sides would then block forever.

use crate::resolver::ResolverId;
use ahash::RandomState;
use std::collections::{HashMap, HashSet};

/// Why an edge was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitRejection {
    /// The waiter owns the construction it would wait on
    SelfWait,
    /// The owner already (transitively) waits on the waiter
    Cycle,
}

/// Directed graph of blocked resolver contexts
#[derive(Debug, Default)]
pub(crate) struct WaitForGraph {
    edges: HashMap<ResolverId, HashSet<ResolverId, RandomState>, RandomState>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` blocks on `owner`, unless that closes a cycle.
    pub(crate) fn add_edge(
        &mut self,
        waiter: ResolverId,
        owner: ResolverId,
    ) -> Result<(), WaitRejection> {
        if waiter == owner {
            return Err(WaitRejection::SelfWait);
        }

        if self.reachable(owner, waiter) {
            return Err(WaitRejection::Cycle);
        }

        self.edges.entry(waiter).or_default().insert(owner);
        Ok(())
    }

    /// Drop the edge once the wait is over
    pub(crate) fn remove_edge(&mut self, waiter: ResolverId, owner: ResolverId) {
        if let Some(owners) = self.edges.get_mut(&waiter) {
            owners.remove(&owner);
            if owners.is_empty() {
                self.edges.remove(&waiter);
            }
        }
    }

    /// Whether `to` can be reached from `from` by following edges.
    ///
    /// A node always reaches itself.
    pub(crate) fn reachable(&self, from: ResolverId, to: ResolverId) -> bool {
        if from == to {
            return true;
        }

        let mut visited: HashSet<ResolverId, RandomState> = HashSet::default();
        let mut work = vec![from];

        while let Some(current) = work.pop() {
            if !visited.insert(current) {
                continue;
            }

            let Some(owners) = self.edges.get(&current) else {
                continue;
            };

            for &next in owners {
                if next == to {
                    return true;
                }
                if !visited.contains(&next) {
                    work.push(next);
                }
            }
        }

        false
    }

    /// Number of recorded edges
    #[cfg(test)]
    pub(crate) fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> ResolverId {
        ResolverId::from_raw(raw)
    }

    #[test]
    fn test_self_wait_rejected() {
        let mut graph = WaitForGraph::new();
        assert_eq!(graph.add_edge(id(1), id(1)), Err(WaitRejection::SelfWait));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_direct_cycle_rejected() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(id(1), id(2)).unwrap();

        assert_eq!(graph.add_edge(id(2), id(1)), Err(WaitRejection::Cycle));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(id(1), id(2)).unwrap();
        graph.add_edge(id(2), id(3)).unwrap();

        assert!(graph.reachable(id(1), id(3)));
        assert!(!graph.reachable(id(3), id(1)));
        assert_eq!(graph.add_edge(id(3), id(1)), Err(WaitRejection::Cycle));

        // Unrelated waiters are fine
        graph.add_edge(id(4), id(1)).unwrap();
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_remove_edge_breaks_path() {
        let mut graph = WaitForGraph::new();
        graph.add_edge(id(1), id(2)).unwrap();
        graph.remove_edge(id(1), id(2));

        assert!(graph.is_empty());
        assert!(graph.add_edge(id(2), id(1)).is_ok());
    }

    #[test]
    fn test_remove_missing_edge_is_noop() {
        let mut graph = WaitForGraph::new();
        graph.remove_edge(id(7), id(8));
        assert!(graph.is_empty());
    }
}
