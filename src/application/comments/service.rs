use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::warn;

use crate::application::ports::{FileUrlResolver, IpLocator, QqProfileLookup};
use crate::application::render::{ContentRenderer, INTERNAL_SCHEME};
use crate::application::repos::CommentsRepo;
use crate::domain::comments::CommentRecord;
use crate::domain::public_id::PublicIdCodec;

use super::moderation::ModerationPipeline;
use super::notify::NotificationDispatcher;
use super::types::{AdminCommentView, CommentError, CommentView};

const SOURCE: &str = "application::comments::service";

/// Location recorded when the IP cannot be resolved.
pub const UNKNOWN_LOCATION: &str = "Unknown";

static FILE_REFERENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{INTERNAL_SCHEME}://file/([A-Za-z0-9_-]+)"))
        .expect("file reference pattern is valid")
});

#[derive(Debug, Clone, Copy)]
pub struct CommentLimits {
    pub max_content_chars: usize,
    pub max_nickname_chars: usize,
}

impl Default for CommentLimits {
    fn default() -> Self {
        Self {
            max_content_chars: 1000,
            max_nickname_chars: 50,
        }
    }
}

impl From<&crate::config::CommentSettings> for CommentLimits {
    fn from(settings: &crate::config::CommentSettings) -> Self {
        Self {
            max_content_chars: settings.max_content_chars,
            max_nickname_chars: settings.max_nickname_chars,
        }
    }
}

/// Optional lookups the service degrades gracefully without.
#[derive(Default, Clone)]
pub struct CommentCollaborators {
    pub ip_locator: Option<Arc<dyn IpLocator>>,
    pub files: Option<Arc<dyn FileUrlResolver>>,
    pub qq: Option<Arc<dyn QqProfileLookup>>,
}

#[derive(Clone)]
pub struct CommentService {
    pub(crate) comments: Arc<dyn CommentsRepo>,
    pub(crate) renderer: Arc<ContentRenderer>,
    pub(crate) moderation: Arc<ModerationPipeline>,
    pub(crate) dispatcher: Arc<NotificationDispatcher>,
    pub(crate) codec: PublicIdCodec,
    pub(crate) collaborators: CommentCollaborators,
    pub(crate) limits: CommentLimits,
}

impl CommentService {
    pub fn new(
        comments: Arc<dyn CommentsRepo>,
        renderer: Arc<ContentRenderer>,
        moderation: Arc<ModerationPipeline>,
        dispatcher: Arc<NotificationDispatcher>,
        codec: PublicIdCodec,
        collaborators: CommentCollaborators,
        limits: CommentLimits,
    ) -> Self {
        Self {
            comments,
            renderer,
            moderation,
            dispatcher,
            codec,
            collaborators,
            limits,
        }
    }

    pub fn codec(&self) -> &PublicIdCodec {
        &self.codec
    }

    pub(crate) fn decode_id(&self, public_id: &str) -> Result<u64, CommentError> {
        Ok(self.codec.decode_comment(public_id)?)
    }

    pub(crate) async fn load(&self, public_id: &str) -> Result<CommentRecord, CommentError> {
        let id = self.decode_id(public_id)?;
        self.comments
            .find_by_id(id)
            .await?
            .ok_or(CommentError::NotFound)
    }

    pub(crate) async fn locate_ip(&self, ip: &str) -> String {
        let Some(locator) = &self.collaborators.ip_locator else {
            return UNKNOWN_LOCATION.to_string();
        };
        match locator.locate(ip).await {
            Ok(location) if !location.trim().is_empty() => location,
            Ok(_) => UNKNOWN_LOCATION.to_string(),
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "locate_ip",
                    result = "unknown",
                    error = %err,
                    "IP location lookup failed"
                );
                UNKNOWN_LOCATION.to_string()
            }
        }
    }

    /// Fresh HTML for a stored comment: re-rendered, then with internal file
    /// references swapped for signed URLs.
    pub(crate) async fn render_for_view(&self, markdown: &str) -> String {
        let html = self.renderer.to_html(markdown);
        self.resolve_file_references(html).await
    }

    async fn resolve_file_references(&self, html: String) -> String {
        let Some(files) = &self.collaborators.files else {
            return html;
        };

        let mut resolved: HashMap<String, String> = HashMap::new();
        for captures in FILE_REFERENCE.captures_iter(&html) {
            let file_id = &captures[1];
            if resolved.contains_key(file_id) {
                continue;
            }
            match files.signed_url(file_id).await {
                Ok(url) => {
                    resolved.insert(file_id.to_string(), url);
                }
                Err(err) => warn!(
                    target = SOURCE,
                    op = "resolve_file",
                    result = "unresolved",
                    file_id,
                    error = %err,
                    "Leaving file reference in place"
                ),
            }
        }

        if resolved.is_empty() {
            return html;
        }
        FILE_REFERENCE
            .replace_all(&html, |captures: &Captures<'_>| {
                resolved
                    .get(&captures[1])
                    .cloned()
                    .unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }

    pub(crate) async fn view(
        &self,
        record: &CommentRecord,
        reply_to: Option<&CommentRecord>,
    ) -> CommentView {
        CommentView {
            id: self.codec.encode_comment(record.id),
            target_path: record.target_path.clone(),
            target_title: record.target_title.clone(),
            parent_id: record.parent_id.map(|id| self.codec.encode_comment(id)),
            reply_to_id: record
                .reply_target_id()
                .map(|id| self.codec.encode_comment(id)),
            reply_to_nickname: reply_to.map(|target| target.nickname.clone()),
            nickname: record.nickname.clone(),
            email_md5: record.email_md5.clone(),
            website: record.website.clone(),
            ip_location: record.ip_location.clone(),
            content_html: self.render_for_view(&record.content).await,
            is_admin_author: record.is_admin_author,
            is_anonymous: record.is_anonymous,
            pinned_at: record.pinned_at,
            like_count: record.like_count,
            created_at: record.created_at,
        }
    }

    pub(crate) async fn admin_view(
        &self,
        record: &CommentRecord,
        reply_to: Option<&CommentRecord>,
    ) -> AdminCommentView {
        AdminCommentView {
            comment: self.view(record, reply_to).await,
            status: record.status,
            email: record.email.clone(),
            ip_address: record.ip_address.clone(),
            user_agent: record.user_agent.clone(),
            content: record.content.clone(),
        }
    }

    /// Batch-load the reply targets of `records`, keyed by id.
    pub(crate) async fn reply_targets(
        &self,
        records: &[CommentRecord],
    ) -> Result<HashMap<u64, CommentRecord>, CommentError> {
        let mut ids: Vec<u64> = records
            .iter()
            .filter_map(CommentRecord::reply_target_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let targets = self.comments.find_many_by_ids(&ids).await?;
        Ok(targets.into_iter().map(|c| (c.id, c)).collect())
    }
}
