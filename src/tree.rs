use crate::{topic, MULTI_LEVEL_WILDCARD_STR, SINGLE_LEVEL_WILDCARD_STR, TOPIC_SEPARATOR};
use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Default,
    NotFound,
    DeletedLastSubscriberFromFilter,
}

#[derive(Debug)]
struct TreeNode<S> {
    children: HashMap<String, TreeNode<S>>,
    subscribers: HashSet<S>,
}

// Derived Default would require S: Default.
impl<S> Default for TreeNode<S> {
    fn default() -> Self {
        TreeNode { children: HashMap::new(), subscribers: HashSet::new() }
    }
}

impl<S> TreeNode<S> {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.subscribers.is_empty()
    }
}

/// Routing index from topic filters to subscriber handles.
///
/// The trie is keyed by literal level strings; `+` and `#` are stored
/// as ordinary levels and only get their meaning during matching. The
/// tree borrows handle identity and owns nothing else: handles are
/// allocated and mapped back to sessions by the routing layer.
///
/// Not internally synchronized. The owner serializes mutations;
/// concurrent readers need an external reader-writer discipline.
#[derive(Debug, Default)]
pub struct SubscriptionTree<S> {
    root: TreeNode<S>,
}

impl<S: Eq + Hash> SubscriptionTree<S> {
    pub fn new() -> Self {
        SubscriptionTree { root: TreeNode::default() }
    }

    /// Registers `subscriber` under `filter`. Re-adding the same pair
    /// is a no-op.
    pub fn add(&mut self, filter: &str, subscriber: S) {
        let mut node = &mut self.root;

        for level in topic::split(filter) {
            node = node.children.entry(level.to_string()).or_default();
        }

        node.subscribers.insert(subscriber);
    }

    /// Unregisters one (filter, subscriber) pair.
    ///
    /// Pruning is one level deep: the terminal node is dropped when it
    /// ends up with neither subscribers nor children, ancestors are
    /// left for [`SubscriptionTree::remove_all`] to clean.
    pub fn remove(&mut self, filter: &str, subscriber: &S) -> RemoveOutcome {
        let levels: Vec<&str> = topic::split(filter).collect();
        Self::remove_at(&mut self.root, &levels, subscriber)
    }

    fn remove_at(node: &mut TreeNode<S>, levels: &[&str], subscriber: &S) -> RemoveOutcome {
        // `split` yields at least one level, so the slice is never
        // empty here.
        let (level, rest) = levels.split_first().expect("filters have at least one level");

        let Some(child) = node.children.get_mut(*level) else {
            return RemoveOutcome::NotFound;
        };

        if !rest.is_empty() {
            return Self::remove_at(child, rest, subscriber);
        }

        child.subscribers.remove(subscriber);

        if child.is_empty() {
            node.children.remove(*level);
            return RemoveOutcome::DeletedLastSubscriberFromFilter;
        }

        RemoveOutcome::Default
    }

    /// Erases `subscriber` from the whole tree and prunes every node
    /// that ends up empty. Returns the filter paths whose nodes were
    /// dropped, in depth-first order (children before their parent).
    pub fn remove_all(&mut self, subscriber: &S) -> Vec<String> {
        let mut deleted = Vec::new();
        Self::remove_all_at(&mut self.root, subscriber, "", &mut deleted);
        deleted
    }

    fn remove_all_at(
        node: &mut TreeNode<S>,
        subscriber: &S,
        prefix: &str,
        deleted: &mut Vec<String>,
    ) -> bool {
        node.subscribers.remove(subscriber);

        node.children.retain(|level, child| {
            let child_prefix = format!("{}{}{}", prefix, level, TOPIC_SEPARATOR);
            !Self::remove_all_at(child, subscriber, &child_prefix, deleted)
        });

        // The root always survives (empty prefix).
        if node.is_empty() && !prefix.is_empty() {
            deleted.push(prefix[..prefix.len() - 1].to_string());
            return true;
        }

        false
    }

    /// Invokes `callback` for every subscriber whose filter matches
    /// the publish topic. A frontier of reachable nodes is advanced
    /// one topic level at a time; `#` children fire immediately (so a
    /// bare `#` matches a single-level topic), literal and `+`
    /// children extend the frontier.
    ///
    /// Callback order is unspecified and a subscriber registered
    /// under several overlapping filters fires once per match; the
    /// session layer dedupes. The `$`-topic exemption is the caller's
    /// job: the tree follows literal edges only, so callers skip
    /// wildcard-rooted filters for `$`-prefixed topics (typically by
    /// re-checking the firing filter with [`topic::matches`]).
    pub fn for_every_match<F: FnMut(&S)>(&self, publish_topic: &str, mut callback: F) {
        let mut frontier: Vec<&TreeNode<S>> = vec![&self.root];

        for level in topic::split(publish_topic) {
            let mut next_frontier = Vec::new();

            for node in &frontier {
                if let Some(multi) = node.children.get(MULTI_LEVEL_WILDCARD_STR) {
                    for subscriber in &multi.subscribers {
                        callback(subscriber);
                    }
                }

                if let Some(child) = node.children.get(level) {
                    next_frontier.push(child);
                }

                if let Some(single) = node.children.get(SINGLE_LEVEL_WILDCARD_STR) {
                    next_frontier.push(single);
                }
            }

            frontier = next_frontier;
        }

        for node in frontier {
            for subscriber in &node.subscribers {
                callback(subscriber);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }
}
