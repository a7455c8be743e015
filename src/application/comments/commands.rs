use metrics::counter;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::ports::QqProfile;
use crate::application::repos::{CreateCommentParams, UpdateCommentInfoParams};
use crate::domain::comments::{
    CommentRecord, email_digest, validate_content, validate_email, validate_nickname, validate_website,
};
use crate::domain::types::CommentStatus;

use super::moderation::Submission;
use super::service::CommentService;
use super::types::{
    AdminCommentView, AuthClaims, BatchOutcome, CommentError, CommentView, CreateCommentCommand,
    UpdateCommentInfoCommand,
};

const SOURCE: &str = "application::comments::commands";

pub(crate) const METRIC_CREATED: &str = "threadline_comments_created_total";

impl CommentService {
    /// Validate, moderate, render and store a new comment, then queue its
    /// notifications if it was published.
    pub async fn create(
        &self,
        command: CreateCommentCommand,
        claims: Option<AuthClaims>,
    ) -> Result<CommentView, CommentError> {
        let target_path = command.target_path.trim().to_string();
        if target_path.is_empty() {
            return Err(CommentError::invalid("target path must not be empty"));
        }
        let nickname = command.nickname.trim().to_string();
        validate_nickname(&nickname, self.limits.max_nickname_chars)?;
        validate_content(&command.content, self.limits.max_content_chars)?;
        let email = normalize_optional(command.email);
        if let Some(email) = &email {
            validate_email(email)?;
        }
        let website = normalize_optional(command.website);
        if let Some(website) = &website {
            validate_website(website)?;
        }

        let parent_id = command
            .parent_id
            .as_deref()
            .map(|id| self.decode_id(id))
            .transpose()?;
        let reply_to_id = command
            .reply_to_id
            .as_deref()
            .map(|id| self.decode_id(id))
            .transpose()?;

        let now = OffsetDateTime::now_utc();
        let outcome = self
            .moderation
            .evaluate(
                Submission {
                    target_path: &target_path,
                    content: &command.content,
                    email: email.as_deref(),
                    ip_address: &command.ip_address,
                    is_anonymous: command.is_anonymous,
                    parent_id,
                    reply_to_id,
                    claims,
                },
                now,
            )
            .await?;

        let ip_location = self.locate_ip(&command.ip_address).await;
        let content_html = self.renderer.to_html(&command.content);

        let record = self
            .comments
            .create(CreateCommentParams {
                target_path,
                target_title: normalize_optional(command.target_title),
                parent_id,
                reply_to_id: reply_to_id.or(parent_id),
                user_id: claims.map(|c| c.user_id),
                nickname,
                email_md5: email.as_deref().map(email_digest),
                email,
                website,
                ip_address: command.ip_address,
                ip_location: Some(ip_location),
                user_agent: command.user_agent,
                content: command.content,
                content_html,
                status: outcome.status,
                is_admin_author: outcome.is_admin_author,
                is_anonymous: outcome.is_anonymous,
                allow_notification: command.allow_notification,
                pinned_at: None,
                like_count: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;

        counter!(METRIC_CREATED, "status" => record.status.as_str()).increment(1);
        info!(
            target = SOURCE,
            op = "create",
            result = record.status.as_str(),
            comment_id = record.id,
            path = record.target_path.as_str(),
            "Comment stored"
        );

        self.dispatcher
            .dispatch(&record, outcome.parent.as_ref())
            .await;

        let reply_to = outcome.reply_to.as_ref().or(outcome.parent.as_ref());
        Ok(self.view(&record, reply_to).await)
    }

    pub async fn set_status(
        &self,
        public_id: &str,
        status: CommentStatus,
    ) -> Result<AdminCommentView, CommentError> {
        let id = self.decode_id(public_id)?;
        let record = self.comments.update_status(id, status).await?;
        self.admin_view_with_target(&record).await
    }

    pub async fn set_pinned(
        &self,
        public_id: &str,
        pinned: bool,
    ) -> Result<AdminCommentView, CommentError> {
        let id = self.decode_id(public_id)?;
        let pinned_at = pinned.then(OffsetDateTime::now_utc);
        let record = self.comments.set_pinned(id, pinned_at).await?;
        self.admin_view_with_target(&record).await
    }

    pub async fn like(&self, public_id: &str) -> Result<u32, CommentError> {
        let id = self.decode_id(public_id)?;
        Ok(self.comments.adjust_likes(id, 1).await?)
    }

    /// Never drops the counter below zero.
    pub async fn unlike(&self, public_id: &str) -> Result<u32, CommentError> {
        let id = self.decode_id(public_id)?;
        Ok(self.comments.adjust_likes(id, -1).await?)
    }

    pub async fn update_content(
        &self,
        public_id: &str,
        markdown: String,
    ) -> Result<AdminCommentView, CommentError> {
        let id = self.decode_id(public_id)?;
        validate_content(&markdown, self.limits.max_content_chars)?;
        let html = self.renderer.to_html(&markdown);
        let record = self.comments.update_content(id, markdown, html).await?;
        self.admin_view_with_target(&record).await
    }

    /// Partial edit of author fields and content.
    pub async fn update_info(
        &self,
        public_id: &str,
        command: UpdateCommentInfoCommand,
    ) -> Result<AdminCommentView, CommentError> {
        let id = self.decode_id(public_id)?;
        let mut params = UpdateCommentInfoParams::default();

        if let Some(nickname) = command.nickname {
            let nickname = nickname.trim().to_string();
            validate_nickname(&nickname, self.limits.max_nickname_chars)?;
            params.nickname = Some(nickname);
        }
        if let Some(email) = command.email {
            let email = email.trim().to_string();
            validate_email(&email)?;
            params.email_md5 = Some(email_digest(&email));
            params.email = Some(email);
        }
        if let Some(website) = command.website {
            let website = website.trim().to_string();
            validate_website(&website)?;
            params.website = Some(website);
        }
        if let Some(content) = command.content {
            validate_content(&content, self.limits.max_content_chars)?;
            params.content_html = Some(self.renderer.to_html(&content));
            params.content = Some(content);
        }

        let record = self.comments.update_info(id, params).await?;
        self.admin_view_with_target(&record).await
    }

    /// Move every comment on `old_path` to `new_path`.
    pub async fn rename_path(&self, old_path: &str, new_path: &str) -> Result<u64, CommentError> {
        let (old_path, new_path) = (old_path.trim(), new_path.trim());
        if old_path.is_empty() || new_path.is_empty() {
            return Err(CommentError::invalid("paths must not be empty"));
        }
        if old_path == new_path {
            return Ok(0);
        }
        let affected = self.comments.update_path(old_path, new_path).await?;
        info!(
            target = SOURCE,
            op = "rename_path",
            result = "ok",
            old_path,
            new_path,
            affected,
            "Comment paths rewritten"
        );
        Ok(affected)
    }

    /// Delete by public id. Malformed ids and rows that no longer exist count
    /// as failures; the rest of the batch still goes through.
    pub async fn delete(&self, public_ids: &[String]) -> Result<BatchOutcome, CommentError> {
        let mut ids = Vec::with_capacity(public_ids.len());
        let mut failed = 0u64;

        for public_id in public_ids {
            match self.decode_id(public_id) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    warn!(
                        target = SOURCE,
                        op = "delete",
                        result = "skipped",
                        public_id = public_id.as_str(),
                        error = %err,
                        "Skipping malformed identifier"
                    );
                    failed += 1;
                }
            }
        }
        ids.sort_unstable();
        ids.dedup();

        let succeeded = if ids.is_empty() {
            0
        } else {
            self.comments.delete_by_ids(&ids).await?
        };
        failed += (ids.len() as u64).saturating_sub(succeeded);

        Ok(BatchOutcome { succeeded, failed })
    }

    /// Prefill data for a QQ number, when a lookup backend is configured.
    pub async fn lookup_qq_profile(&self, qq: &str) -> Result<QqProfile, CommentError> {
        let qq = qq.trim();
        if !is_valid_qq_number(qq) {
            return Err(CommentError::invalid("QQ number must be 5 to 11 digits"));
        }
        let lookup = self
            .collaborators
            .qq
            .as_ref()
            .ok_or(CommentError::NotConfigured("QQ profile lookup"))?;
        Ok(lookup.lookup(qq).await?)
    }

    async fn admin_view_with_target(
        &self,
        record: &CommentRecord,
    ) -> Result<AdminCommentView, CommentError> {
        let target = match record.reply_target_id() {
            Some(id) => self.comments.find_by_id(id).await?,
            None => None,
        };
        Ok(self.admin_view(record, target.as_ref()).await)
    }
}

pub fn is_valid_qq_number(qq: &str) -> bool {
    (5..=11).contains(&qq.len()) && qq.bytes().all(|b| b.is_ascii_digit())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
