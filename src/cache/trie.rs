//! Token trie storage, one trie per namespace.
//!
//! Nodes are keyed by token id. A node may carry a terminal [`Slot`]
//! holding the cached value and its reference count; interior nodes with
//! no slot exist only while some longer sequence needs them and are
//! pruned as soon as the last such sequence is removed.
//!
//! Everything here assumes the caller already holds the cache lock.

use ahash::AHashMap;

use super::Token;

/// A stored value and its reference count.
///
/// The count tracks logical owners: one for the original insert plus one
/// for every re-insert of the same sequence. It never drops below 1 while
/// the slot exists.
#[derive(Debug)]
pub(super) struct Slot<V> {
    pub(super) value: V,
    pub(super) refcount: usize,
}

/// Outcome of a prefix search, before any extraction happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum SearchOutcome {
    /// The full query sequence is stored.
    Exact,
    /// A proper prefix of the query is stored; `len` is the prefix
    /// length. Prefixes shorter than two tokens never match this way.
    Shorter { len: usize },
    /// A stored sequence extends the walked part of the query. `stored`
    /// is its full key and `matched` how many query tokens the walk
    /// covered before diverging.
    Longer { stored: Vec<Token>, matched: usize },
    /// Nothing usable.
    Miss,
}

/// How a value left the trie.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum Extracted<V> {
    /// Last reference: the value was moved out and the entry removed.
    Owned(V),
    /// Still shared elsewhere: the caller gets a clone, the entry stays
    /// with its refcount decremented.
    Shared(V),
}

/// Outcome of an insert, for telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InsertOutcome {
    /// A new slot was created for this sequence.
    Created,
    /// The sequence was already stored; its refcount was bumped and the
    /// offered value dropped.
    Refreshed,
}

/// One node per token position. The namespace root is the node for the
/// empty sequence.
#[derive(Debug)]
pub(super) struct TrieNode<V> {
    children: AHashMap<Token, TrieNode<V>>,
    slot: Option<Slot<V>>,
}

impl<V> TrieNode<V> {
    pub(super) fn new() -> Self {
        Self {
            children: AHashMap::new(),
            slot: None,
        }
    }

    /// True when the node stores nothing and leads nowhere.
    pub(super) fn is_empty(&self) -> bool {
        self.slot.is_none() && self.children.is_empty()
    }

    fn node(&self, tokens: &[Token]) -> Option<&TrieNode<V>> {
        let mut node = self;
        for tok in tokens {
            node = node.children.get(tok)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, tokens: &[Token]) -> Option<&mut TrieNode<V>> {
        let mut node = self;
        for tok in tokens {
            node = node.children.get_mut(tok)?;
        }
        Some(node)
    }

    /// The slot stored at exactly `tokens`, if any.
    pub(super) fn slot(&self, tokens: &[Token]) -> Option<&Slot<V>> {
        self.node(tokens).and_then(|node| node.slot.as_ref())
    }

    /// Stores `value` at `tokens`, creating nodes along the path.
    ///
    /// If the sequence is already stored its refcount is bumped and the
    /// offered value dropped; the original stays.
    pub(super) fn insert(&mut self, tokens: &[Token], value: V) -> InsertOutcome {
        let mut node = self;
        for tok in tokens {
            node = node.children.entry(*tok).or_insert_with(TrieNode::new);
        }
        if let Some(slot) = &mut node.slot {
            slot.refcount += 1;
            return InsertOutcome::Refreshed;
        }
        node.slot = Some(Slot { value, refcount: 1 });
        InsertOutcome::Created
    }

    /// Classifies what the trie holds for `tokens`.
    ///
    /// Walks the query, tracking the longest stored prefix seen. Exact
    /// beats shorter-prefix beats longer-continuation. The continuation
    /// scan only runs when `allow_trim` is set, since its result is
    /// useless without trim hooks.
    pub(super) fn search(&self, tokens: &[Token], allow_trim: bool) -> SearchOutcome {
        let mut node = self;
        let mut matched = 0;
        let mut best_prefix = 0;
        for tok in tokens {
            match node.children.get(tok) {
                Some(child) => {
                    node = child;
                    matched += 1;
                    if node.slot.is_some() {
                        best_prefix = matched;
                    }
                }
                None => break,
            }
        }

        if matched == tokens.len() && node.slot.is_some() {
            return SearchOutcome::Exact;
        }
        if best_prefix >= 2 {
            return SearchOutcome::Shorter { len: best_prefix };
        }
        if matched >= 1 && allow_trim {
            // Shortest stored continuation in the subtree at the
            // divergence point, that node itself included.
            let mut shortest: Option<Vec<Token>> = None;
            let mut stack = vec![(node, Vec::new())];
            while let Some((current, extra)) = stack.pop() {
                if current.slot.is_some() {
                    if shortest.as_ref().is_none_or(|s| extra.len() < s.len()) {
                        shortest = Some(extra);
                    }
                    // Anything deeper has strictly more extra tokens.
                    continue;
                }
                for (tok, child) in &current.children {
                    let mut path = extra.clone();
                    path.push(*tok);
                    stack.push((child, path));
                }
            }
            if let Some(extra) = shortest {
                let mut stored = tokens[..matched].to_vec();
                stored.extend_from_slice(&extra);
                return SearchOutcome::Longer { stored, matched };
            }
        }
        SearchOutcome::Miss
    }

    /// Removes the slot at `tokens` regardless of refcount and returns
    /// its value, pruning any nodes left with neither a slot nor
    /// descendants. Returns `None` when nothing is stored there.
    pub(super) fn take(&mut self, tokens: &[Token]) -> Option<V> {
        let node = self.node_mut(tokens)?;
        let slot = node.slot.take()?;
        if node.children.is_empty() && !tokens.is_empty() {
            self.prune(tokens);
        }
        Some(slot.value)
    }

    /// Removes the now-empty node at `tokens` plus any ancestors the
    /// removal empties, keeping every node that stores a value or
    /// branches to another sequence.
    fn prune(&mut self, tokens: &[Token]) {
        let mut cut = 0;
        let mut node = &*self;
        for (depth, tok) in tokens[..tokens.len() - 1].iter().enumerate() {
            node = node
                .children
                .get(tok)
                .expect("prune walk left the stored path");
            if node.slot.is_some() || node.children.len() > 1 {
                cut = depth + 1;
            }
        }
        let parent = self
            .node_mut(&tokens[..cut])
            .expect("prune walk left the stored path");
        parent.children.remove(&tokens[cut]);
    }
}

impl<V: Clone> TrieNode<V> {
    /// Extracts the value at `tokens` following the sharing rules: the
    /// last reference is moved out and the entry removed, a shared one
    /// is decremented and cloned.
    pub(super) fn extract(&mut self, tokens: &[Token]) -> Option<Extracted<V>> {
        let node = self.node_mut(tokens)?;
        let slot = node.slot.as_mut()?;
        if slot.refcount > 1 {
            slot.refcount -= 1;
            return Some(Extracted::Shared(slot.value.clone()));
        }
        let value = self
            .take(tokens)
            .expect("uniquely held slot vanished mid-extract");
        Some(Extracted::Owned(value))
    }
}

/// Tears the subtree down with an explicit worklist. Chains run one
/// node per token, so recursive teardown would overflow the stack on
/// prompt-length sequences.
impl<V> Drop for TrieNode<V> {
    fn drop(&mut self) {
        let mut pending: Vec<TrieNode<V>> =
            self.children.drain().map(|(_, child)| child).collect();
        while let Some(mut node) = pending.pop() {
            // Each popped node drops with its children already drained.
            pending.extend(node.children.drain().map(|(_, child)| child));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_exact() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2, 3], vec![1, 2, 3]);
        assert_eq!(root.search(&[1, 2, 3], false), SearchOutcome::Exact);
    }

    #[test]
    fn search_prefers_exact_over_prefix() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        root.insert(&[1, 2, 3], vec![1, 2, 3]);
        assert_eq!(root.search(&[1, 2, 3], true), SearchOutcome::Exact);
    }

    #[test]
    fn search_shorter_prefix() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        assert_eq!(
            root.search(&[1, 2, 3, 4], false),
            SearchOutcome::Shorter { len: 2 }
        );
    }

    #[test]
    fn search_longest_stored_prefix_wins() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        root.insert(&[1, 2, 3], vec![1, 2, 3]);
        assert_eq!(
            root.search(&[1, 2, 3, 9], false),
            SearchOutcome::Shorter { len: 3 }
        );
    }

    #[test]
    fn search_single_token_prefix_is_not_shorter() {
        let mut root = TrieNode::new();
        root.insert(&[1], vec![1]);
        assert_eq!(root.search(&[1, 2, 3], false), SearchOutcome::Miss);
    }

    #[test]
    fn search_single_token_prefix_is_trim_candidate() {
        let mut root = TrieNode::new();
        root.insert(&[1], vec![1]);
        assert_eq!(
            root.search(&[1, 2, 3], true),
            SearchOutcome::Longer {
                stored: vec![1],
                matched: 1
            }
        );
    }

    #[test]
    fn search_longer_picks_shortest_continuation() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2, 3, 4, 5], vec![5]);
        root.insert(&[1, 2, 3], vec![3]);
        assert_eq!(
            root.search(&[1, 2, 9], true),
            SearchOutcome::Longer {
                stored: vec![1, 2, 3],
                matched: 2
            }
        );
    }

    #[test]
    fn search_longer_needs_trim_allowed() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2, 3, 4, 5], vec![5]);
        assert_eq!(root.search(&[1, 2, 9], false), SearchOutcome::Miss);
    }

    #[test]
    fn search_unrelated_query_misses() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        assert_eq!(root.search(&[7, 8], true), SearchOutcome::Miss);
    }

    #[test]
    fn search_empty_query() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        assert_eq!(root.search(&[], true), SearchOutcome::Miss);

        root.insert(&[], vec![]);
        assert_eq!(root.search(&[], false), SearchOutcome::Exact);
    }

    #[test]
    fn insert_refresh_bumps_refcount_and_keeps_value() {
        let mut root = TrieNode::new();
        assert_eq!(root.insert(&[1, 2], vec![1, 2]), InsertOutcome::Created);
        assert_eq!(root.insert(&[1, 2], vec![9, 9]), InsertOutcome::Refreshed);

        let slot = root.slot(&[1, 2]).unwrap();
        assert_eq!(slot.refcount, 2);
        assert_eq!(slot.value, vec![1, 2]);
    }

    #[test]
    fn extract_unique_moves_and_prunes() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2, 3], vec![1, 2, 3]);
        assert_eq!(
            root.extract(&[1, 2, 3]),
            Some(Extracted::Owned(vec![1, 2, 3]))
        );
        assert!(root.is_empty());
    }

    #[test]
    fn extract_shared_clones_and_decrements() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        root.insert(&[1, 2], vec![1, 2]);

        assert_eq!(root.extract(&[1, 2]), Some(Extracted::Shared(vec![1, 2])));
        assert_eq!(root.slot(&[1, 2]).unwrap().refcount, 1);

        assert_eq!(root.extract(&[1, 2]), Some(Extracted::Owned(vec![1, 2])));
        assert!(root.is_empty());
    }

    #[test]
    fn take_missing_is_none() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        assert_eq!(root.take(&[1, 9]), None);
        assert_eq!(root.take(&[3]), None);
        assert!(root.slot(&[1, 2]).is_some());
    }

    #[test]
    fn take_keeps_path_needed_by_longer_sequence() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        root.insert(&[1, 2, 3], vec![1, 2, 3]);

        assert_eq!(root.take(&[1, 2]), Some(vec![1, 2]));
        assert_eq!(root.search(&[1, 2, 3], false), SearchOutcome::Exact);
    }

    #[test]
    fn take_prunes_up_to_branch_point() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2, 3], vec![1, 2, 3]);
        root.insert(&[1, 2, 9], vec![1, 2, 9]);

        assert_eq!(root.take(&[1, 2, 3]), Some(vec![1, 2, 3]));
        assert!(root.slot(&[1, 2, 9]).is_some());
        assert_eq!(root.search(&[1, 2, 3], false), SearchOutcome::Miss);
    }

    #[test]
    fn take_prunes_through_slotted_ancestor_boundary() {
        let mut root = TrieNode::new();
        root.insert(&[1, 2], vec![1, 2]);
        root.insert(&[1, 2, 3, 4], vec![1, 2, 3, 4]);

        assert_eq!(root.take(&[1, 2, 3, 4]), Some(vec![1, 2, 3, 4]));
        assert!(root.slot(&[1, 2]).is_some());

        assert_eq!(root.take(&[1, 2]), Some(vec![1, 2]));
        assert!(root.is_empty());
    }

    #[test]
    fn take_prunes_a_prompt_length_chain() {
        let mut root = TrieNode::new();
        let tokens: Vec<Token> = (0..10_000).collect();
        root.insert(&tokens, vec![7]);

        assert_eq!(root.take(&tokens), Some(vec![7]));
        assert!(root.is_empty());
    }

    #[test]
    fn deep_chain_drops_cleanly() {
        let mut root = TrieNode::new();
        let tokens: Vec<Token> = (0..10_000).collect();
        root.insert(&tokens, vec![0]);
        drop(root);
    }
}
