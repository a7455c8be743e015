//! Reply-graph traversal over a flat comment set.
//!
//! Stored data may be corrupt (dangling parents, cycles), so every walk keeps
//! a visited set and gives up instead of looping.

use std::collections::{HashMap, HashSet};

use crate::domain::comments::CommentRecord;

/// Index of comments by id, plus ancestor resolution.
pub(crate) struct CommentGraph<'a> {
    by_id: HashMap<u64, &'a CommentRecord>,
}

impl<'a> CommentGraph<'a> {
    pub(crate) fn new(comments: &'a [CommentRecord]) -> Self {
        Self {
            by_id: comments.iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub(crate) fn get(&self, id: u64) -> Option<&'a CommentRecord> {
        self.by_id.get(&id).copied()
    }

    /// Id of the top-level comment `comment` ultimately hangs off.
    ///
    /// Returns `None` when the parent chain is broken or loops.
    pub(crate) fn root_of(&self, comment: &'a CommentRecord) -> Option<u64> {
        let mut visited = HashSet::from([comment.id]);
        let mut current = comment;

        while let Some(parent_id) = current.parent_id {
            if !visited.insert(parent_id) {
                return None;
            }
            current = self.get(parent_id)?;
        }
        Some(current.id)
    }

    /// Resolve the display target, applying the legacy `parent_id` fallback.
    pub(crate) fn reply_target(&self, comment: &CommentRecord) -> Option<&'a CommentRecord> {
        comment.reply_target_id().and_then(|id| self.get(id))
    }

    /// Group every non-top-level comment under its resolved root. Comments
    /// that cannot reach a root are left out.
    pub(crate) fn descendants_by_root(
        &self,
        comments: &'a [CommentRecord],
    ) -> HashMap<u64, Vec<&'a CommentRecord>> {
        let mut groups: HashMap<u64, Vec<&'a CommentRecord>> = HashMap::new();
        for comment in comments.iter().filter(|c| !c.is_top_level()) {
            if let Some(root) = self.root_of(comment)
                && root != comment.id
            {
                groups.entry(root).or_default().push(comment);
            }
        }
        groups
    }
}

/// Adjacency from a reply target to the comments displayed as answering it.
pub(crate) struct ReplyIndex<'a> {
    children: HashMap<u64, Vec<&'a CommentRecord>>,
}

impl<'a> ReplyIndex<'a> {
    pub(crate) fn new(comments: &[&'a CommentRecord]) -> Self {
        let mut children: HashMap<u64, Vec<&'a CommentRecord>> = HashMap::new();
        for comment in comments {
            if let Some(target) = comment.reply_target_id() {
                children.entry(target).or_default().push(comment);
            }
        }
        Self { children }
    }

    pub(crate) fn direct(&self, target: u64) -> &[&'a CommentRecord] {
        self.children.get(&target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `heads` and everything transitively replying to them.
    pub(crate) fn collect_chains(&self, heads: &[&'a CommentRecord]) -> Vec<&'a CommentRecord> {
        let mut visited = HashSet::new();
        let mut collected = Vec::new();
        let mut stack: Vec<&'a CommentRecord> = heads.iter().rev().copied().collect();

        while let Some(comment) = stack.pop() {
            if !visited.insert(comment.id) {
                continue;
            }
            collected.push(comment);
            for child in self.direct(comment.id).iter().rev() {
                if !visited.contains(&child.id) {
                    stack.push(child);
                }
            }
        }
        collected
    }
}
