//! Dependency ordering of scheduled inserts.
//!
//! A document that references another newly persisted document is inserted
//! after it. Among documents whose dependencies are all inserted, the one
//! scheduled first goes next, so identical input always yields the same order.
//!
//! Reference cycles cannot be ordered. When no document is ready, the
//! earliest-scheduled document on a cycle is inserted anyway and its edges to
//! documents not yet inserted are reported as deferred; the unit of work
//! omits those references from the insert and writes them in a follow-up
//! update.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use crate::document::ObjectHash;

/// One scheduled insert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitNode {
    pub key: ObjectHash,
    /// Scheduling sequence; lower was scheduled earlier.
    pub seq: u64,
    /// Keys this document references. Keys outside the node set are ignored.
    pub depends_on: Vec<ObjectHash>,
}

/// Insert order plus the edges that had to be cut to break cycles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommitPlan {
    pub order: Vec<ObjectHash>,
    /// Node -> dependencies that were not inserted before it.
    pub deferred: BTreeMap<ObjectHash, Vec<ObjectHash>>,
}

impl CommitPlan {
    pub fn is_deferred(&self, key: ObjectHash) -> bool {
        self.deferred.contains_key(&key)
    }
}

/// Order `nodes` dependency-first with Kahn's algorithm.
pub fn plan_inserts(nodes: &[CommitNode]) -> CommitPlan {
    let seq_of: HashMap<ObjectHash, u64> = nodes.iter().map(|n| (n.key, n.seq)).collect();

    // Remaining dependency count per node, and reverse edges.
    let mut pending: HashMap<ObjectHash, HashSet<ObjectHash>> = HashMap::new();
    let mut dependents: HashMap<ObjectHash, Vec<ObjectHash>> = HashMap::new();
    for node in nodes {
        let deps: HashSet<ObjectHash> = node
            .depends_on
            .iter()
            .copied()
            .filter(|d| *d != node.key && seq_of.contains_key(d))
            .collect();
        for dep in &deps {
            dependents.entry(*dep).or_default().push(node.key);
        }
        pending.insert(node.key, deps);
    }

    let mut ready: BinaryHeap<Reverse<(u64, ObjectHash)>> = pending
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .map(|(key, _)| Reverse((seq_of[key], *key)))
        .collect();

    let mut plan = CommitPlan::default();
    let mut done: HashSet<ObjectHash> = HashSet::new();

    while done.len() < nodes.len() {
        let next = match ready.pop() {
            Some(Reverse((_, key))) => key,
            None => {
                let Some(key) = cycle_breaker(&pending, &done, &seq_of) else {
                    break;
                };
                let mut cut: Vec<ObjectHash> = pending[&key].iter().copied().collect();
                cut.sort_by_key(|k| seq_of[k]);
                plan.deferred.insert(key, cut);
                key
            }
        };
        if !done.insert(next) {
            continue;
        }
        plan.order.push(next);

        if let Some(children) = dependents.get(&next) {
            for child in children {
                if done.contains(child) {
                    continue;
                }
                if let Some(deps) = pending.get_mut(child) {
                    deps.remove(&next);
                    if deps.is_empty() {
                        ready.push(Reverse((seq_of[child], *child)));
                    }
                }
            }
        }
    }

    plan
}

/// The earliest-scheduled member of a cycle among the remaining nodes.
///
/// Every remaining node still waits on another remaining node, so walking
/// from the earliest one along its earliest dependency must revisit a node.
fn cycle_breaker(
    pending: &HashMap<ObjectHash, HashSet<ObjectHash>>,
    done: &HashSet<ObjectHash>,
    seq_of: &HashMap<ObjectHash, u64>,
) -> Option<ObjectHash> {
    let mut current = pending
        .keys()
        .filter(|k| !done.contains(*k))
        .min_by_key(|k| seq_of[*k])
        .copied()?;
    let mut path: Vec<ObjectHash> = Vec::new();
    let mut seen: HashMap<ObjectHash, usize> = HashMap::new();
    loop {
        if let Some(&at) = seen.get(&current) {
            return path[at..].iter().copied().min_by_key(|k| seq_of[k]);
        }
        seen.insert(current, path.len());
        path.push(current);
        current = pending
            .get(&current)?
            .iter()
            .copied()
            .min_by_key(|k| seq_of[k])?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: ObjectHash, seq: u64, deps: &[ObjectHash]) -> CommitNode {
        CommitNode {
            key,
            seq,
            depends_on: deps.to_vec(),
        }
    }

    fn position(plan: &CommitPlan, key: ObjectHash) -> usize {
        plan.order.iter().position(|k| *k == key).unwrap()
    }

    #[test]
    fn independent_nodes_keep_schedule_order() {
        let plan = plan_inserts(&[node(30, 3, &[]), node(10, 1, &[]), node(20, 2, &[])]);
        assert_eq!(plan.order, vec![10, 20, 30]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn dependency_goes_first() {
        // A (scheduled first) references B.
        let plan = plan_inserts(&[node(1, 1, &[2]), node(2, 2, &[])]);
        assert_eq!(plan.order, vec![2, 1]);
    }

    #[test]
    fn diamond() {
        let plan = plan_inserts(&[
            node(4, 1, &[2, 3]),
            node(2, 2, &[1]),
            node(3, 3, &[1]),
            node(1, 4, &[]),
        ]);
        assert_eq!(plan.order.len(), 4);
        assert!(position(&plan, 1) < position(&plan, 2));
        assert!(position(&plan, 1) < position(&plan, 3));
        assert!(position(&plan, 2) < position(&plan, 4));
        assert!(position(&plan, 3) < position(&plan, 4));
        // Ties go by schedule order.
        assert!(position(&plan, 2) < position(&plan, 3));
    }

    #[test]
    fn dependencies_outside_the_set_are_ignored() {
        let plan = plan_inserts(&[node(1, 1, &[99]), node(2, 2, &[1, 1])]);
        assert_eq!(plan.order, vec![1, 2]);
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let plan = plan_inserts(&[node(1, 1, &[1])]);
        assert_eq!(plan.order, vec![1]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn two_cycle_defers_earliest() {
        let plan = plan_inserts(&[node(1, 1, &[2]), node(2, 2, &[1])]);
        assert_eq!(plan.order, vec![1, 2]);
        assert_eq!(plan.deferred.get(&1), Some(&vec![2]));
        assert!(!plan.is_deferred(2));
    }

    #[test]
    fn cycle_behind_a_dependency() {
        // 3 -> 1 -> 2 -> 1, with 4 free.
        let plan = plan_inserts(&[
            node(3, 1, &[1]),
            node(1, 2, &[2]),
            node(2, 3, &[1]),
            node(4, 4, &[]),
        ]);
        // Only the cycle member is forced; 3 still waits for 1.
        assert_eq!(plan.order, vec![4, 1, 3, 2]);
        assert_eq!(plan.deferred.len(), 1);
        assert_eq!(plan.deferred.get(&1), Some(&vec![2]));
    }

    #[test]
    fn deterministic_across_runs() {
        let nodes = vec![
            node(5, 1, &[6]),
            node(6, 2, &[]),
            node(7, 3, &[5]),
            node(8, 4, &[]),
        ];
        let first = plan_inserts(&nodes);
        for _ in 0..10 {
            assert_eq!(plan_inserts(&nodes), first);
        }
        assert_eq!(first.order, vec![6, 5, 7, 8]);
    }
}
