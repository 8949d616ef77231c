//! Flat-record → tree assembly for departments and menus.
//!
//! Rows are stored flat with a nullable `parent_id`. The tree is built at
//! read time using an arena (the input vector) plus an adjacency index, so
//! no pointer graph ever exists in memory.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use serde::Serialize;

/// A record that references its parent by key.
pub trait TreeRecord {
    type Key: Copy + Eq + Hash + core::fmt::Debug;

    fn key(&self) -> Self::Key;

    fn parent_key(&self) -> Option<Self::Key>;
}

/// A record together with its nested children.
///
/// Serialises as the record's own fields plus a `children` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub item: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    /// Number of nodes in this subtree, including `self`.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }
}

/// Total number of nodes across a forest.
pub fn node_count<T>(roots: &[TreeNode<T>]) -> usize {
    roots.iter().map(TreeNode::size).sum()
}

/// Build a forest from flat records.
///
/// - A record whose parent key is absent, unresolvable or equal to its own
///   key becomes a root.
/// - Siblings keep the relative order of the input.
/// - Runs in time linear in the number of records.
///
/// Records trapped in a parent cycle are unreachable from any root; they are
/// promoted to roots so the output always contains every input record once.
pub fn build_tree<T: TreeRecord>(records: Vec<T>) -> Vec<TreeNode<T>> {
    let len = records.len();

    let mut index: HashMap<T::Key, usize> = HashMap::with_capacity(len);
    for (pos, record) in records.iter().enumerate() {
        index.entry(record.key()).or_insert(pos);
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); len];
    let mut roots: Vec<usize> = Vec::new();
    for (pos, record) in records.iter().enumerate() {
        match record.parent_key().and_then(|p| index.get(&p).copied()) {
            Some(parent) if parent != pos => children[parent].push(pos),
            _ => roots.push(pos),
        }
    }

    let mut slots: Vec<Option<T>> = records.into_iter().map(Some).collect();
    let mut forest = Vec::with_capacity(roots.len());
    for pos in roots {
        if let Some(node) = assemble(pos, &mut slots, &children) {
            forest.push(node);
        }
    }

    for pos in 0..len {
        if let Some(record) = slots[pos].as_ref() {
            tracing::warn!(key = ?record.key(), "tree record is part of a parent cycle; promoting to root");
            if let Some(node) = assemble(pos, &mut slots, &children) {
                forest.push(node);
            }
        }
    }

    forest
}

fn assemble<T>(pos: usize, slots: &mut [Option<T>], children: &[Vec<usize>]) -> Option<TreeNode<T>> {
    let item = slots[pos].take()?;
    let kids = children[pos]
        .iter()
        .filter_map(|&child| assemble(child, slots, children))
        .collect();
    Some(TreeNode { item, children: kids })
}

/// Whether re-parenting `node` under `new_parent` would close a cycle.
///
/// True when `new_parent` is `node` itself or one of its descendants.
pub fn creates_cycle<T: TreeRecord>(records: &[T], node: T::Key, new_parent: T::Key) -> bool {
    if node == new_parent {
        return true;
    }

    let parents: HashMap<T::Key, Option<T::Key>> = records
        .iter()
        .map(|r| (r.key(), r.parent_key()))
        .collect();

    let mut seen = HashSet::new();
    let mut cursor = Some(new_parent);
    while let Some(current) = cursor {
        if current == node {
            return true;
        }
        if !seen.insert(current) {
            // Pre-existing loop above the new parent that does not involve `node`.
            return false;
        }
        cursor = parents.get(&current).copied().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Row {
        id: u32,
        parent_id: Option<u32>,
    }

    impl TreeRecord for Row {
        type Key = u32;

        fn key(&self) -> u32 {
            self.id
        }

        fn parent_key(&self) -> Option<u32> {
            self.parent_id
        }
    }

    fn row(id: u32, parent_id: Option<u32>) -> Row {
        Row { id, parent_id }
    }

    fn ids<T: TreeRecord<Key = u32>>(nodes: &[TreeNode<T>]) -> Vec<u32> {
        nodes.iter().map(|n| n.item.key()).collect()
    }

    #[test]
    fn nests_children_under_parents_in_input_order() {
        let forest = build_tree(vec![
            row(1, None),
            row(3, Some(1)),
            row(2, Some(1)),
            row(4, Some(2)),
            row(5, None),
        ]);

        assert_eq!(ids(&forest), vec![1, 5]);
        assert_eq!(ids(&forest[0].children), vec![3, 2]);
        assert_eq!(ids(&forest[0].children[1].children), vec![4]);
        assert_eq!(node_count(&forest), 5);
    }

    #[test]
    fn child_listed_before_parent_is_still_attached() {
        let forest = build_tree(vec![row(2, Some(1)), row(1, None)]);
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(ids(&forest[0].children), vec![2]);
    }

    #[test]
    fn dangling_and_self_parent_become_roots() {
        let forest = build_tree(vec![row(1, Some(99)), row(2, Some(2))]);
        assert_eq!(ids(&forest), vec![1, 2]);
        assert!(forest.iter().all(|n| n.children.is_empty()));
    }

    #[test]
    fn cyclic_records_are_promoted_not_lost() {
        let forest = build_tree(vec![row(1, Some(2)), row(2, Some(1)), row(3, None)]);
        assert_eq!(node_count(&forest), 3);
        assert_eq!(ids(&forest), vec![3, 1]);
        assert_eq!(ids(&forest[1].children), vec![2]);
    }

    #[test]
    fn serialises_flattened_with_children() {
        let forest = build_tree(vec![row(1, None), row(2, Some(1))]);
        let json = serde_json::to_value(&forest).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "id": 1, "parent_id": null, "children": [
                    { "id": 2, "parent_id": 1, "children": [] }
                ]}
            ])
        );
    }

    #[test]
    fn detects_self_and_descendant_reparenting() {
        let rows = vec![row(1, None), row(2, Some(1)), row(3, Some(2)), row(4, None)];
        assert!(creates_cycle(&rows, 1, 1));
        assert!(creates_cycle(&rows, 1, 3));
        assert!(creates_cycle(&rows, 2, 3));
        assert!(!creates_cycle(&rows, 3, 1));
        assert!(!creates_cycle(&rows, 1, 4));
    }

    fn forest_strategy() -> impl Strategy<Value = Vec<Row>> {
        // Parent is either missing, an earlier id (keeps the input acyclic) or
        // an id that never exists.
        (1usize..40)
            .prop_flat_map(|n| {
                prop::collection::vec(0u32..1_000, n).prop_map(move |choices| {
                    choices
                        .into_iter()
                        .enumerate()
                        .map(|(i, choice)| {
                            let id = i as u32 + 1;
                            let parent_id = match choice % 4 {
                                0 => None,
                                1 => Some(10_000 + choice),
                                _ if id > 1 => Some(choice % (id - 1) + 1),
                                _ => None,
                            };
                            row(id, parent_id)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .prop_shuffle()
    }

    fn collect_edges(nodes: &[TreeNode<Row>], parent: Option<u32>, out: &mut Vec<(u32, Option<u32>)>) {
        for node in nodes {
            out.push((node.item.id, parent));
            collect_edges(&node.children, Some(node.item.id), out);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: every record appears exactly once, under the node its
        /// parent id names, or at root level when that parent is absent.
        #[test]
        fn every_record_lands_exactly_once_under_its_parent(rows in forest_strategy()) {
            let present: HashSet<u32> = rows.iter().map(|r| r.id).collect();
            let expected: HashMap<u32, Option<u32>> = rows
                .iter()
                .map(|r| (r.id, r.parent_id.filter(|p| present.contains(p))))
                .collect();

            let forest = build_tree(rows.clone());
            prop_assert_eq!(node_count(&forest), rows.len());

            let mut edges = Vec::new();
            collect_edges(&forest, None, &mut edges);
            let mut seen = HashSet::new();
            for (id, placed_under) in edges {
                prop_assert!(seen.insert(id), "record {} appears twice", id);
                prop_assert_eq!(expected[&id], placed_under);
            }
        }

        /// Property: siblings keep their relative input order.
        #[test]
        fn siblings_keep_input_order(rows in forest_strategy()) {
            let position: HashMap<u32, usize> =
                rows.iter().enumerate().map(|(i, r)| (r.id, i)).collect();
            let forest = build_tree(rows);

            let mut stack = vec![&forest];
            while let Some(level) = stack.pop() {
                let order: Vec<usize> = level.iter().map(|n| position[&n.item.id]).collect();
                prop_assert!(order.windows(2).all(|w| w[0] < w[1]));
                for node in level.iter() {
                    stack.push(&node.children);
                }
            }
        }
    }
}
