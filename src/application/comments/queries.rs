use crate::application::pagination::{Page, PageRequest};
use crate::application::repos::CommentQueryFilter;

use super::service::CommentService;
use super::thread::ThreadBuilder;
use super::types::{AdminCommentView, CommentError, CommentView, ReplyMode, ThreadItemView};

impl CommentService {
    /// Paginated top-level comments on `path`, each with its reply preview.
    pub async fn thread(
        &self,
        path: &str,
        request: PageRequest,
    ) -> Result<Page<ThreadItemView>, CommentError> {
        let comments = self.comments.list_published_by_path(path).await?;
        let builder = ThreadBuilder::new(&comments);
        let page = builder.root_page(request);

        let mut items = Vec::with_capacity(page.items.len());
        for node in &page.items {
            let mut replies = Vec::with_capacity(node.preview.len());
            for reply in &node.preview {
                replies.push(self.view(reply, builder.reply_target(reply)).await);
            }
            items.push(ThreadItemView {
                comment: self.view(node.root, None).await,
                total_replies: node.total_descendants,
                replies,
            });
        }

        Ok(Page::new(items, page.total, request))
    }

    /// Replies under the top-level comment `root_id` on `path`.
    pub async fn replies(
        &self,
        path: &str,
        root_id: &str,
        mode: ReplyMode,
    ) -> Result<Page<CommentView>, CommentError> {
        let root_id = self.decode_id(root_id)?;
        let comments = self.comments.list_published_by_path(path).await?;
        let builder = ThreadBuilder::new(&comments);

        let root = builder.get(root_id).ok_or(CommentError::NotFound)?;
        if !root.is_top_level() {
            return Err(CommentError::invalid(
                "replies can only be listed under a top-level comment",
            ));
        }

        let (records, total, request) = match mode {
            ReplyMode::Preview => {
                let preview = builder.preview(root_id);
                let total = preview.len() as u64;
                // The preview is one page of whatever size the chains need;
                // `PageRequest::new` would clamp it.
                let request = PageRequest {
                    page: 1,
                    page_size: u32::try_from(preview.len()).unwrap_or(u32::MAX).max(1),
                };
                (preview, total, request)
            }
            ReplyMode::Paged(request) => {
                let page = builder.replies_page(root_id, request);
                (page.items, page.total, request)
            }
        };

        let mut items = Vec::with_capacity(records.len());
        for record in records {
            items.push(self.view(record, builder.reply_target(record)).await);
        }
        Ok(Page::new(items, total, request))
    }

    /// Newest published comments across every page.
    pub async fn latest(&self, request: PageRequest) -> Result<Page<CommentView>, CommentError> {
        let page = self.comments.list_published(request).await?;
        let targets = self.reply_targets(&page.items).await?;

        let mut items = Vec::with_capacity(page.items.len());
        for record in &page.items {
            let target = record.reply_target_id().and_then(|id| targets.get(&id));
            items.push(self.view(record, target).await);
        }
        Ok(Page::new(items, page.total, request))
    }

    pub async fn admin_list(
        &self,
        filter: &CommentQueryFilter,
        request: PageRequest,
    ) -> Result<Page<AdminCommentView>, CommentError> {
        let page = self.comments.list_filtered(filter, request).await?;
        let targets = self.reply_targets(&page.items).await?;

        let mut items = Vec::with_capacity(page.items.len());
        for record in &page.items {
            let target = record.reply_target_id().and_then(|id| targets.get(&id));
            items.push(self.admin_view(record, target).await);
        }
        Ok(Page::new(items, page.total, request))
    }

    /// Single comment for the admin editor.
    pub async fn get(&self, public_id: &str) -> Result<AdminCommentView, CommentError> {
        let record = self.load(public_id).await?;
        let target = match record.reply_target_id() {
            Some(id) => self.comments.find_by_id(id).await?,
            None => None,
        };
        Ok(self.admin_view(&record, target.as_ref()).await)
    }
}
