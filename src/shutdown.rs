//! Dependency-ordered shutdown
//!
//! Only instances that were actually created take part. Dependents close
//! before their dependencies; among services that are free to close at the
//! same time the greatest name goes first, so the order is deterministic.

use crate::factory::panic_message;
use crate::provider::Instance;
use crate::storage::Registry;
use crate::{DEPENDENCY_CYCLE_KEY, DiError, Result};
use ahash::RandomState;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Snapshot of what to close, in order
#[derive(Debug)]
pub(crate) struct ShutdownPlan {
    order: Vec<(String, Instance)>,
    cycle: Vec<String>,
}

#[cfg_attr(not(feature = "logging"), allow(dead_code))]
impl ShutdownPlan {
    /// Keys in close order
    pub(crate) fn keys(&self) -> Vec<&str> {
        self.order.iter().map(|(key, _)| key.as_str()).collect()
    }

    /// Keys left over by a dependency cycle
    pub(crate) fn cycle(&self) -> &[String] {
        &self.cycle
    }
}

/// Build the close order from the registry's created instances.
pub(crate) fn plan(registry: &Registry) -> ShutdownPlan {
    let mut nodes: BTreeMap<String, Instance> = registry
        .instances()
        .map(|(name, instance)| (name.clone(), instance.clone()))
        .collect();

    // Smallest name per allocation, so aliasing is deterministic
    let mut named: HashMap<usize, &str, RandomState> = HashMap::default();
    for (name, instance) in registry.instances() {
        named
            .entry(instance.identity())
            .and_modify(|current| {
                if name.as_str() < *current {
                    *current = name.as_str();
                }
            })
            .or_insert(name.as_str());
    }

    // A type instance shared with a named one is the same node
    let mut aliases: HashMap<String, &str, RandomState> = HashMap::default();
    for (service_type, instance) in registry.type_instances() {
        let key = format!("type:{}", service_type.name());
        match named.get(&instance.identity()) {
            Some(name) => {
                aliases.insert(key, *name);
            }
            None => {
                nodes.insert(key, instance.clone());
            }
        }
    }
    let resolve = |key: &str| -> String {
        aliases.get(key).map_or_else(|| key.to_string(), |name| name.to_string())
    };

    let mut owned: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (dependent, dependencies) in registry.dependencies() {
        let dependent = resolve(dependent.as_str());
        if !nodes.contains_key(&dependent) {
            continue;
        }
        let kept = owned.entry(dependent.clone()).or_default();
        kept.extend(
            dependencies
                .iter()
                .map(|dependency| resolve(dependency.as_str()))
                .filter(|dependency| *dependency != dependent && nodes.contains_key(dependency)),
        );
    }
    let edges: BTreeMap<&str, BTreeSet<&str>> = owned
        .iter()
        .map(|(dependent, dependencies)| {
            (
                dependent.as_str(),
                dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let CloseOrder {
        mut sorted,
        remaining,
    } = topological_order(nodes.keys().map(String::as_str), &edges);
    sorted.extend(remaining.iter().cloned());

    let order = sorted
        .into_iter()
        .filter_map(|key| nodes.remove(&key).map(|instance| (key, instance)))
        .collect();

    ShutdownPlan {
        order,
        cycle: remaining,
    }
}

struct CloseOrder {
    /// Nodes in close order
    sorted: Vec<String>,
    /// Nodes stuck on a cycle, greatest first
    remaining: Vec<String>,
}

/// Kahn's algorithm over `dependent -> dependency` edges.
///
/// A node becomes ready once everything depending on it is ordered; the
/// greatest ready key is taken first.
fn topological_order<'a>(
    nodes: impl Iterator<Item = &'a str>,
    edges: &BTreeMap<&'a str, BTreeSet<&'a str>>,
) -> CloseOrder {
    let mut in_degree: BTreeMap<&str, usize> = nodes.map(|node| (node, 0)).collect();
    for dependencies in edges.values() {
        for dependency in dependencies {
            if let Some(degree) = in_degree.get_mut(dependency) {
                *degree += 1;
            }
        }
    }

    let mut ready: BinaryHeap<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(node, _)| *node)
        .collect();

    let mut sorted = Vec::with_capacity(in_degree.len());
    while let Some(node) = ready.pop() {
        sorted.push(node.to_string());

        let Some(dependencies) = edges.get(node) else {
            continue;
        };
        for dependency in dependencies {
            if let Some(degree) = in_degree.get_mut(dependency) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(*dependency);
                }
            }
        }
    }

    let mut remaining: Vec<String> = in_degree
        .into_iter()
        .filter(|(_, degree)| *degree > 0)
        .map(|(node, _)| node.to_string())
        .collect();
    remaining.sort_by(|a, b| b.cmp(a));

    CloseOrder { sorted, remaining }
}

/// Run every close handler in plan order and aggregate the failures.
pub(crate) fn execute(plan: ShutdownPlan) -> Result<()> {
    #[cfg(feature = "logging")]
    debug!(
        target: "service_container",
        order = ?plan.keys(),
        cycle = ?plan.cycle(),
        "Closing container services"
    );

    let mut closed: HashSet<usize, RandomState> = HashSet::default();
    let mut failures = BTreeMap::new();

    for (key, instance) in &plan.order {
        let Some(closer) = instance.closer() else {
            continue;
        };
        if !closed.insert(instance.identity()) {
            continue;
        }

        let failure = match catch_unwind(AssertUnwindSafe(|| closer())) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("close panicked: {}", panic_message(payload.as_ref()))),
        };

        if let Some(reason) = failure {
            #[cfg(feature = "logging")]
            warn!(
                target: "service_container",
                service = %key,
                reason = %reason,
                "Service close failed"
            );

            failures.insert(key.clone(), reason);
        }
    }

    if plan.cycle.is_empty() && failures.is_empty() {
        return Ok(());
    }

    if failures.is_empty() {
        return Err(DiError::DependencyCycle { nodes: plan.cycle });
    }

    if !plan.cycle.is_empty() {
        failures.insert(
            DEPENDENCY_CYCLE_KEY.to_string(),
            format!("dependency cycle detected: {}", plan.cycle.join(", ")),
        );
    }

    Err(DiError::CloseFailed { failures })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(nodes: &[&'static str], edges: &[(&'static str, &'static str)]) -> CloseOrder {
        let mut graph: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for &(dependent, dependency) in edges {
            graph.entry(dependent).or_default().insert(dependency);
        }
        topological_order(nodes.iter().copied(), &graph)
    }

    #[test]
    fn test_dependents_first() {
        let result = order(&["a", "b"], &[("b", "a")]);
        assert_eq!(result.sorted, vec!["b", "a"]);
        assert!(result.remaining.is_empty());
    }

    #[test]
    fn test_diamond_prefers_greatest_key() {
        let result = order(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );
        assert_eq!(result.sorted, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_independent_nodes_descending() {
        let result = order(&["alpha", "gamma", "beta"], &[]);
        assert_eq!(result.sorted, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_cycle_leftovers_descending() {
        let result = order(&["a", "b", "c", "z"], &[("a", "b"), ("b", "a"), ("z", "c")]);
        assert_eq!(result.sorted, vec!["z", "c"]);
        assert_eq!(result.remaining, vec!["b", "a"]);
    }

    #[test]
    fn test_empty_plan_succeeds() {
        let registry = Registry::new();
        let plan = plan(&registry);
        assert!(plan.keys().is_empty());
        assert!(execute(plan).is_ok());
    }
}
