use std::cmp::Ordering;
use std::collections::HashMap;

use crate::application::pagination::{Page, PageRequest};
use crate::domain::comments::CommentRecord;

use super::graph::{CommentGraph, ReplyIndex};

/// Chain heads retained in a preview window.
pub const PREVIEW_CHAIN_HEADS: usize = 3;

/// A top-level comment with its preview window.
#[derive(Debug, Clone)]
pub struct ThreadNode<'a> {
    pub root: &'a CommentRecord,
    pub total_descendants: u64,
    pub preview: Vec<&'a CommentRecord>,
}

/// Thread views over every published comment on one target path.
pub struct ThreadBuilder<'a> {
    graph: CommentGraph<'a>,
    roots: Vec<&'a CommentRecord>,
    descendants: HashMap<u64, Vec<&'a CommentRecord>>,
}

impl<'a> ThreadBuilder<'a> {
    pub fn new(comments: &'a [CommentRecord]) -> Self {
        let graph = CommentGraph::new(comments);

        let mut roots: Vec<&'a CommentRecord> =
            comments.iter().filter(|c| c.is_top_level()).collect();
        roots.sort_by(|a, b| root_order(a, b));

        let mut descendants = graph.descendants_by_root(comments);
        for group in descendants.values_mut() {
            group.sort_by(|a, b| newest_first(a, b));
        }

        Self {
            graph,
            roots,
            descendants,
        }
    }

    /// Top-level comments: pinned first by pin time, then newest first.
    pub fn roots(&self) -> &[&'a CommentRecord] {
        &self.roots
    }

    pub fn get(&self, id: u64) -> Option<&'a CommentRecord> {
        self.graph.get(id)
    }

    /// Comment shown in the "replying to" label.
    pub fn reply_target(&self, comment: &CommentRecord) -> Option<&'a CommentRecord> {
        self.graph.reply_target(comment)
    }

    /// Every reachable descendant of `root_id`, newest first.
    pub fn descendants(&self, root_id: u64) -> &[&'a CommentRecord] {
        self.descendants
            .get(&root_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn root_page(&self, request: PageRequest) -> Page<ThreadNode<'a>> {
        let items = request
            .slice(&self.roots)
            .into_iter()
            .map(|root| ThreadNode {
                root,
                total_descendants: self.descendants(root.id).len() as u64,
                preview: self.preview(root.id),
            })
            .collect();
        Page::new(items, self.roots.len() as u64, request)
    }

    /// The newest chain heads under `root_id` with their full reply chains,
    /// returned in conversation order.
    pub fn preview(&self, root_id: u64) -> Vec<&'a CommentRecord> {
        let descendants = self.descendants(root_id);
        let heads: Vec<&'a CommentRecord> = descendants
            .iter()
            .filter(|c| c.reply_target_id() == Some(root_id))
            .take(PREVIEW_CHAIN_HEADS)
            .copied()
            .collect();

        let index = ReplyIndex::new(descendants);
        let mut window = index.collect_chains(&heads);
        window.sort_by(|a, b| oldest_first(a, b));
        window
    }

    /// Flat newest-first page over every descendant of `root_id`.
    pub fn replies_page(&self, root_id: u64, request: PageRequest) -> Page<&'a CommentRecord> {
        let descendants = self.descendants(root_id);
        Page::new(
            request.slice(descendants),
            descendants.len() as u64,
            request,
        )
    }
}

fn root_order(a: &CommentRecord, b: &CommentRecord) -> Ordering {
    match (a.pinned_at, b.pinned_at) {
        (Some(left), Some(right)) => right.cmp(&left).then_with(|| newest_first(a, b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => newest_first(a, b),
    }
}

fn newest_first(a: &CommentRecord, b: &CommentRecord) -> Ordering {
    b.created_at
        .cmp(&a.created_at)
        .then_with(|| b.id.cmp(&a.id))
}

fn oldest_first(a: &CommentRecord, b: &CommentRecord) -> Ordering {
    newest_first(b, a)
}
