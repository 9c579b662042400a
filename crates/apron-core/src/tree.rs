//! Rebuilds the task hierarchy from the flat list the backend returns.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace, warn};

use crate::task::{Task, TaskId, TaskNode};

/// How a child whose `parentId` does not resolve is placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParentResolution {
    /// Fall back to the nearest preceding task one level up.
    #[default]
    LevelFallback,
    /// Only trust `parentId`; anything unresolved becomes a root.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeOptions {
    pub parent_resolution: ParentResolution,
}

pub fn build_tree(flat: Vec<Task>) -> Vec<TaskNode> {
    build_tree_with(flat, TreeOptions::default())
}

/// Builds the forest, keeping every distinct task exactly once.
///
/// Tasks are processed by ascending `hierarchy_level` (stable), so parents are
/// seen before the children that point at them. The first task carrying a
/// given id wins; later duplicates are dropped. A link that would close a
/// `parentId` cycle is refused and the task is placed as if its parent were
/// missing.
#[tracing::instrument(skip(flat), fields(input = flat.len()))]
pub fn build_tree_with(flat: Vec<Task>, options: TreeOptions) -> Vec<TaskNode> {
    if flat.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::with_capacity(flat.len());
    let mut tasks: Vec<Task> = Vec::with_capacity(flat.len());
    for task in flat {
        if seen.insert(task.id.clone()) {
            tasks.push(task);
        } else {
            debug!(id = %task.id, "ignoring duplicate task id");
        }
    }
    tasks.sort_by_key(|task| task.hierarchy_level);

    let index: HashMap<TaskId, usize> = tasks
        .iter()
        .enumerate()
        .map(|(idx, task)| (task.id.clone(), idx))
        .collect();

    let mut arena = Arena::new(tasks.len());

    for idx in 0..tasks.len() {
        let task = &tasks[idx];
        let Some(parent_id) = task.parent_id.as_ref().filter(|_| task.hierarchy_level > 0) else {
            arena.push_root(idx);
            continue;
        };

        let exact = index
            .get(parent_id)
            .copied()
            .filter(|&parent| arena.can_link(parent, idx));

        let parent = match (exact, options.parent_resolution) {
            (Some(parent), _) => Some(parent),
            (None, ParentResolution::LevelFallback) => {
                let found = scan_for_level_parent(&tasks, idx)
                    .filter(|&parent| arena.can_link(parent, idx));
                if let Some(parent) = found {
                    warn!(
                        id = %task.id,
                        parent_id = %parent_id,
                        resolved = %tasks[parent].id,
                        "parent resolved by level adjacency"
                    );
                }
                found
            }
            (None, ParentResolution::Strict) => None,
        };

        match parent {
            Some(parent) => arena.push_child(parent, idx),
            None if task.hierarchy_level == 1 => {
                debug!(id = %task.id, parent_id = %parent_id, "orphaned subtask placed as root");
                arena.push_root(idx);
            }
            None => {
                warn!(
                    id = %task.id,
                    parent_id = %parent_id,
                    level = task.hierarchy_level,
                    "unresolvable parent; placing task as root"
                );
                arena.push_root(idx);
            }
        }
    }

    let forest = arena.materialize(tasks);
    debug!(roots = forest.len(), "built task forest");
    forest
}

/// Nearest preceding task exactly one level above `idx`, stopping once the
/// levels drop below that.
fn scan_for_level_parent(tasks: &[Task], idx: usize) -> Option<usize> {
    let target = tasks[idx].hierarchy_level.checked_sub(1)?;
    for candidate in (0..idx).rev() {
        let level = tasks[candidate].hierarchy_level;
        if level == target {
            return Some(candidate);
        }
        if level < target {
            trace!(id = %tasks[idx].id, "level scan hit boundary");
            return None;
        }
    }
    None
}

struct Arena {
    roots: Vec<usize>,
    children: Vec<Vec<usize>>,
    parent_of: Vec<Option<usize>>,
    placed: Vec<bool>,
}

impl Arena {
    fn new(len: usize) -> Self {
        Self {
            roots: Vec::new(),
            children: vec![Vec::new(); len],
            parent_of: vec![None; len],
            placed: vec![false; len],
        }
    }

    fn push_root(&mut self, idx: usize) {
        if !self.placed[idx] {
            self.placed[idx] = true;
            self.roots.push(idx);
        }
    }

    fn push_child(&mut self, parent: usize, idx: usize) {
        if !self.placed[idx] {
            self.placed[idx] = true;
            self.parent_of[idx] = Some(parent);
            self.children[parent].push(idx);
        }
    }

    /// False when `child` is `parent` or one of its ancestors.
    fn can_link(&self, parent: usize, child: usize) -> bool {
        let mut cursor = Some(parent);
        while let Some(current) = cursor {
            if current == child {
                return false;
            }
            cursor = self.parent_of[current];
        }
        true
    }

    /// Builds owned nodes children-first, so arbitrarily deep chains never
    /// recurse.
    fn materialize(self, tasks: Vec<Task>) -> Vec<TaskNode> {
        let mut order = Vec::with_capacity(tasks.len());
        let mut stack: Vec<usize> = self.roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            order.push(idx);
            stack.extend(self.children[idx].iter().rev().copied());
        }

        let mut slots: Vec<Option<Task>> = tasks.into_iter().map(Some).collect();
        let mut built: Vec<Option<TaskNode>> = Vec::new();
        built.resize_with(slots.len(), || None);

        for &idx in order.iter().rev() {
            let Some(task) = slots[idx].take() else {
                continue;
            };
            let subtasks = self.children[idx]
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            built[idx] = Some(TaskNode { task, subtasks });
        }

        self.roots
            .iter()
            .filter_map(|&idx| built[idx].take())
            .collect()
    }
}

/// Every node in depth-first pre-order. A node whose id was already
/// visited is skipped along with its subtree.
pub fn flatten(forest: &[TaskNode]) -> Vec<&TaskNode> {
    let mut out = Vec::new();
    walk(forest, |node, _| out.push(node));
    out
}

/// Depth-first visit with the depth of each node (roots are 0).
pub fn walk<'a, F>(forest: &'a [TaskNode], mut visit: F)
where
    F: FnMut(&'a TaskNode, usize),
{
    let mut visited: HashSet<&TaskId> = HashSet::new();
    let mut stack: Vec<(&TaskNode, usize)> = forest.iter().rev().map(|node| (node, 0)).collect();

    while let Some((node, depth)) = stack.pop() {
        if !visited.insert(node.id()) {
            trace!(id = %node.id(), "skipping already visited node");
            continue;
        }
        visit(node, depth);
        stack.extend(node.subtasks.iter().rev().map(|child| (child, depth + 1)));
    }
}

pub fn find<'a>(forest: &'a [TaskNode], id: &TaskId) -> Option<&'a TaskNode> {
    flatten(forest).into_iter().find(|node| node.id() == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, parent: Option<u64>, level: u32) -> Task {
        let mut task = Task::new(id, format!("task {id}"));
        task.parent_id = parent.map(TaskId::from);
        task.hierarchy_level = level;
        task
    }

    fn ids(forest: &[TaskNode]) -> Vec<String> {
        flatten(forest)
            .into_iter()
            .map(|node| node.id().to_string())
            .collect()
    }

    #[test]
    fn empty_input_builds_empty_forest() {
        assert!(build_tree(Vec::new()).is_empty());
    }

    #[test]
    fn nested_chain_builds_three_levels() {
        let forest = build_tree(vec![
            task(1, None, 0),
            task(2, Some(1), 1),
            task(3, Some(2), 2),
        ]);

        assert_eq!(forest.len(), 1);
        let root = &forest[0];
        assert_eq!(root.id(), &TaskId::from(1u64));
        assert_eq!(root.subtasks.len(), 1);
        let child = &root.subtasks[0];
        assert_eq!(child.id(), &TaskId::from(2u64));
        assert_eq!(child.subtasks.len(), 1);
        assert_eq!(child.subtasks[0].id(), &TaskId::from(3u64));
        assert!(child.subtasks[0].subtasks.is_empty());
        assert_eq!(root.descendant_count(), 2);
    }

    #[test]
    fn children_arriving_before_parents_are_attached() {
        let forest = build_tree(vec![
            task(3, Some(2), 2),
            task(2, Some(1), 1),
            task(4, Some(1), 1),
            task(1, None, 0),
        ]);

        assert_eq!(forest.len(), 1);
        assert_eq!(ids(&forest), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn orphan_at_level_one_becomes_root() {
        let forest = build_tree(vec![task(5, Some(999), 1)]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].id(), &TaskId::from(5u64));
    }

    #[test]
    fn dangling_level_one_parent_is_adopted_by_preceding_root() {
        let forest = build_tree(vec![task(20, None, 0), task(30, Some(999), 1)]);

        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].id(), &TaskId::from(20u64));
        assert_eq!(forest[0].subtasks[0].id(), &TaskId::from(30u64));
    }

    #[test]
    fn deep_chain_builds_without_recursion() {
        let depth = 5_000u32;
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let chain: Vec<Task> = (0..depth)
                    .map(|level| {
                        let parent = level.checked_sub(1).map(u64::from);
                        task(u64::from(level), parent, level)
                    })
                    .collect();
                let forest = build_tree(chain);
                (forest.len(), forest[0].descendant_count(), flatten(&forest).len())
            })
            .expect("spawn");

        let (roots, descendants, flattened) = handle.join().expect("no overflow");
        assert_eq!(roots, 1);
        assert_eq!(descendants, 4_999);
        assert_eq!(flattened, 5_000);
    }

    #[test]
    fn level_fallback_attaches_to_nearest_level_above() {
        let forest = build_tree(vec![
            task(1, None, 0),
            task(2, Some(1), 1),
            task(7, Some(404), 2),
        ]);

        assert_eq!(forest.len(), 1);
        let child = &forest[0].subtasks[0];
        assert_eq!(child.id(), &TaskId::from(2u64));
        assert_eq!(child.subtasks[0].id(), &TaskId::from(7u64));
    }

    #[test]
    fn strict_resolution_keeps_unresolved_tasks_as_roots() {
        let forest = build_tree_with(
            vec![task(1, None, 0), task(2, Some(1), 1), task(7, Some(404), 2)],
            TreeOptions {
                parent_resolution: ParentResolution::Strict,
            },
        );

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[1].id(), &TaskId::from(7u64));
        assert_eq!(ids(&forest).len(), 3);
    }

    #[test]
    fn deep_orphan_is_not_dropped() {
        let forest = build_tree(vec![task(1, None, 0), task(9, Some(404), 3)]);
        assert_eq!(ids(&forest), vec!["1", "9"]);
        assert_eq!(forest.len(), 2);
    }

    #[test]
    fn duplicate_ids_keep_first_occurrence() {
        let mut first = task(1, None, 0);
        first.title = "first".to_string();
        let mut second = task(1, None, 0);
        second.title = "second".to_string();

        let forest = build_tree(vec![first, second, task(2, Some(1), 1)]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].task.title, "first");
        assert_eq!(forest[0].subtasks.len(), 1);
    }

    #[test]
    fn parent_cycle_does_not_lose_tasks() {
        let forest = build_tree(vec![task(1, Some(2), 1), task(2, Some(1), 1)]);
        let mut seen = ids(&forest);
        seen.sort();
        assert_eq!(seen, vec!["1", "2"]);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn every_input_task_appears_once() {
        let input = vec![
            task(10, None, 0),
            task(11, Some(10), 1),
            task(12, Some(10), 1),
            task(13, Some(12), 2),
            task(20, None, 0),
            task(21, Some(20), 1),
            task(22, Some(77), 1),
            task(23, Some(88), 4),
            task(24, Some(21), 2),
        ];
        let mut expected: Vec<String> = input.iter().map(|t| t.id.to_string()).collect();
        expected.sort();

        let forest = build_tree(input);
        let mut actual = ids(&forest);
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[test]
    fn walk_reports_depths() {
        let forest = build_tree(vec![
            task(1, None, 0),
            task(2, Some(1), 1),
            task(3, Some(2), 2),
            task(4, None, 0),
        ]);
        let mut depths = Vec::new();
        walk(&forest, |node, depth| depths.push((node.id().to_string(), depth)));
        assert_eq!(
            depths,
            vec![
                ("1".to_string(), 0),
                ("2".to_string(), 1),
                ("3".to_string(), 2),
                ("4".to_string(), 0),
            ]
        );
    }

    #[test]
    fn walk_skips_repeated_ids() {
        let shared = TaskNode::leaf(task(2, Some(1), 1));
        let forest = vec![
            TaskNode {
                task: task(1, None, 0),
                subtasks: vec![shared.clone()],
            },
            shared,
        ];
        assert_eq!(ids(&forest), vec!["1", "2"]);
    }

    #[test]
    fn find_locates_nested_nodes() {
        let forest = build_tree(vec![task(1, None, 0), task(2, Some(1), 1)]);
        let found = find(&forest, &TaskId::from(2u64)).expect("nested node");
        assert_eq!(found.task.title, "task 2");
        assert!(find(&forest, &TaskId::from(3u64)).is_none());
    }
}
