//! Publish / pending / reject decision for incoming comments.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::ports::ContentClassifier;
use crate::application::repos::{CommentsRepo, CounterRepo, SettingsSource, UsersRepo};
use crate::application::settings::{AiAction, ModerationSettings, RiskLevel};
use crate::domain::comments::CommentRecord;
use crate::domain::types::{ADMIN_GROUP_ID, CommentStatus};

use super::types::{AuthClaims, ModerationError};

const SOURCE: &str = "application::comments::moderation";

/// Characters of content forwarded to the classifier.
pub const CLASSIFIER_CHAR_BUDGET: usize = 2000;

/// Lifetime of a per-minute rate window; slightly longer than the minute.
pub const RATE_WINDOW_TTL: Duration = Duration::from_secs(70);

pub(crate) const METRIC_RATE_LIMITED: &str = "threadline_comment_rate_limited_total";

/// The parts of a submission moderation looks at.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub target_path: &'a str,
    pub content: &'a str,
    pub email: Option<&'a str>,
    pub ip_address: &'a str,
    pub is_anonymous: bool,
    pub parent_id: Option<u64>,
    pub reply_to_id: Option<u64>,
    pub claims: Option<AuthClaims>,
}

#[derive(Debug, Clone)]
pub struct ModerationOutcome {
    pub status: CommentStatus,
    pub is_admin_author: bool,
    pub is_anonymous: bool,
    pub parent: Option<CommentRecord>,
    pub reply_to: Option<CommentRecord>,
}

pub struct ModerationPipeline {
    comments: Arc<dyn CommentsRepo>,
    users: Arc<dyn UsersRepo>,
    settings: Arc<dyn SettingsSource>,
    counters: Option<Arc<dyn CounterRepo>>,
    classifier: Option<Arc<dyn ContentClassifier>>,
}

impl ModerationPipeline {
    pub fn new(
        comments: Arc<dyn CommentsRepo>,
        users: Arc<dyn UsersRepo>,
        settings: Arc<dyn SettingsSource>,
        counters: Option<Arc<dyn CounterRepo>>,
        classifier: Option<Arc<dyn ContentClassifier>>,
    ) -> Self {
        Self {
            comments,
            users,
            settings,
            counters,
            classifier,
        }
    }

    pub async fn evaluate(
        &self,
        submission: Submission<'_>,
        now: OffsetDateTime,
    ) -> Result<ModerationOutcome, ModerationError> {
        let settings = ModerationSettings::load(self.settings.as_ref()).await;

        self.check_rate_limit(submission.ip_address, settings.limit_per_minute, now)
            .await?;

        let is_anonymous = check_anonymous(&submission, settings.anonymous_email.as_deref())?;

        if submission.claims.is_none() {
            self.reject_admin_impersonation(submission.email).await?;
        }

        let (parent, reply_to) = self.load_reply_targets(&submission).await?;

        let mut status = if contains_forbidden_word(submission.content, &settings.forbidden_words)
        {
            debug!(
                target = SOURCE,
                op = "forbidden_words",
                result = "pending",
                "Forbidden word matched"
            );
            CommentStatus::Pending
        } else {
            CommentStatus::Published
        };

        if status.is_published() {
            status = self.classify(submission.content, &settings).await?;
        }

        let is_admin_author = self
            .resolve_admin_author(submission.claims, submission.email)
            .await?;

        Ok(ModerationOutcome {
            status,
            is_admin_author,
            is_anonymous,
            parent,
            reply_to,
        })
    }

    async fn check_rate_limit(
        &self,
        ip: &str,
        limit: u32,
        now: OffsetDateTime,
    ) -> Result<(), ModerationError> {
        if limit == 0 {
            return Ok(());
        }
        let Some(counters) = &self.counters else {
            return Ok(());
        };

        let key = rate_key(ip, now);
        let count = match counters.incr(&key).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "rate_limit",
                    result = "skipped",
                    error = %err,
                    "Rate limit backend unavailable"
                );
                return Ok(());
            }
        };

        if count == 1
            && let Err(err) = counters.expire(&key, RATE_WINDOW_TTL).await
        {
            warn!(
                target = SOURCE,
                op = "rate_limit",
                result = "expire_failed",
                error = %err,
                "Failed to set rate window expiry"
            );
        }

        if count > i64::from(limit) {
            counter!(METRIC_RATE_LIMITED).increment(1);
            return Err(ModerationError::rejected(
                "comments are being submitted too frequently, try again later",
            ));
        }
        Ok(())
    }

    async fn reject_admin_impersonation(&self, email: Option<&str>) -> Result<(), ModerationError> {
        let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) else {
            return Ok(());
        };

        let admins = self.users.list_by_group(ADMIN_GROUP_ID).await?;
        if admins.iter().any(|admin| admin.email_matches(email)) {
            return Err(ModerationError::rejected(
                "this email belongs to an administrator; sign in to use it",
            ));
        }
        Ok(())
    }

    async fn load_reply_targets(
        &self,
        submission: &Submission<'_>,
    ) -> Result<(Option<CommentRecord>, Option<CommentRecord>), ModerationError> {
        let parent = match submission.parent_id {
            Some(id) => Some(self.load_reply_target(id, submission.target_path).await?),
            None if submission.reply_to_id.is_some() => {
                return Err(ModerationError::invalid(
                    "reply target given without a parent comment",
                ));
            }
            None => None,
        };

        let reply_to = match (submission.reply_to_id, &parent) {
            (Some(id), Some(parent)) if id == parent.id => Some(parent.clone()),
            (Some(id), _) => Some(self.load_reply_target(id, submission.target_path).await?),
            (None, _) => None,
        };

        Ok((parent, reply_to))
    }

    async fn load_reply_target(
        &self,
        id: u64,
        target_path: &str,
    ) -> Result<CommentRecord, ModerationError> {
        let target = self
            .comments
            .find_by_id(id)
            .await?
            .ok_or_else(|| ModerationError::invalid("the comment being replied to does not exist"))?;

        if target.target_path != target_path {
            return Err(ModerationError::invalid(
                "cannot reply to a comment on a different page",
            ));
        }
        if target.is_anonymous {
            return Err(ModerationError::invalid("anonymous comments cannot be replied to"));
        }
        Ok(target)
    }

    async fn classify(
        &self,
        content: &str,
        settings: &ModerationSettings,
    ) -> Result<CommentStatus, ModerationError> {
        let (Some(classifier), Some(endpoint)) = (&self.classifier, &settings.ai_api_url) else {
            return Ok(CommentStatus::Published);
        };
        if !settings.ai_enabled {
            return Ok(CommentStatus::Published);
        }

        let text = truncate_chars(content, CLASSIFIER_CHAR_BUDGET);
        let verdict = match classifier.classify(endpoint, text).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "classify",
                    result = "skipped",
                    error = %err,
                    "Content classifier unavailable"
                );
                return Ok(CommentStatus::Published);
            }
        };

        let risk = RiskLevel::parse(&verdict.risk_level);
        let actionable = verdict.is_violation && risk.is_some_and(|r| r >= settings.ai_threshold);
        debug!(
            target = SOURCE,
            op = "classify",
            result = if actionable { "flagged" } else { "clean" },
            risk = verdict.risk_level.as_str(),
            "Classifier verdict"
        );
        if !actionable {
            return Ok(CommentStatus::Published);
        }

        match settings.ai_action {
            AiAction::Reject => Err(ModerationError::rejected(format!(
                "comment rejected by content review: {}",
                verdict.explanation
            ))),
            AiAction::Pending => Ok(CommentStatus::Pending),
        }
    }

    async fn resolve_admin_author(
        &self,
        claims: Option<AuthClaims>,
        email: Option<&str>,
    ) -> Result<bool, ModerationError> {
        let (Some(claims), Some(email)) = (claims, email) else {
            return Ok(false);
        };
        let user = self.users.find_by_id(claims.user_id).await?;
        Ok(user.is_some_and(|user| user.is_admin() && user.email_matches(email)))
    }
}

fn rate_key(ip: &str, now: OffsetDateTime) -> String {
    format!("comment:rate:{ip}:{}", now.unix_timestamp().div_euclid(60))
}

fn check_anonymous(
    submission: &Submission<'_>,
    anonymous_email: Option<&str>,
) -> Result<bool, ModerationError> {
    if !submission.is_anonymous {
        return Ok(false);
    }
    match anonymous_email {
        Some(expected) if submission.email.map(str::trim) != Some(expected) => Err(
            ModerationError::invalid("anonymous comments must use the designated anonymous email"),
        ),
        _ => Ok(true),
    }
}

fn contains_forbidden_word(content: &str, words: &[String]) -> bool {
    words.iter().any(|word| content.contains(word.as_str()))
}

fn truncate_chars(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::application::ports::{Classification, PortError};
    use crate::application::settings::keys;
    use crate::domain::users::UserRecord;
    use crate::infra::memory::{InMemoryComments, InMemoryCounters, InMemoryUsers};
    use crate::infra::settings::InMemorySettings;

    const ADMIN_EMAIL: &str = "admin@example.com";

    /// Answers every request with the same verdict, or fails when it has none.
    struct StubClassifier {
        verdict: Option<Classification>,
        calls: AtomicUsize,
    }

    impl StubClassifier {
        fn flagging(risk_level: &str) -> Arc<Self> {
            Arc::new(Self {
                verdict: Some(Classification {
                    is_violation: true,
                    risk_level: risk_level.to_string(),
                    explanation: "advertising".to_string(),
                    ..Default::default()
                }),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                verdict: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ContentClassifier for StubClassifier {
        async fn classify(
            &self,
            _endpoint: &str,
            _text: &str,
        ) -> Result<Classification, PortError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict
                .clone()
                .ok_or_else(|| PortError::transport("connection refused"))
        }
    }

    fn user(id: u64, email: &str, group_id: u64) -> UserRecord {
        UserRecord {
            id,
            nickname: format!("user{id}"),
            email: Some(email.to_string()),
            group_id,
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    fn pipeline(
        settings: &[(&str, &str)],
        counters: Option<Arc<dyn CounterRepo>>,
        classifier: Option<Arc<dyn ContentClassifier>>,
    ) -> ModerationPipeline {
        let users = InMemoryUsers::new();
        users.insert(user(1, ADMIN_EMAIL, ADMIN_GROUP_ID));
        users.insert(user(2, "member@example.com", ADMIN_GROUP_ID + 1));

        ModerationPipeline::new(
            Arc::new(InMemoryComments::new()),
            Arc::new(users),
            Arc::new(InMemorySettings::with_values(settings.iter().copied())),
            counters,
            classifier,
        )
    }

    fn classifying(
        threshold: &str,
        action: &str,
        classifier: Arc<StubClassifier>,
    ) -> ModerationPipeline {
        pipeline(
            &[
                (keys::AI_DETECT_ENABLE, "true"),
                (keys::AI_DETECT_API_URL, "https://moderation.example.com/check"),
                (keys::AI_DETECT_RISK_LEVEL, threshold),
                (keys::AI_DETECT_ACTION, action),
            ],
            None,
            Some(classifier),
        )
    }

    fn submission<'a>(email: Option<&'a str>, claims: Option<AuthClaims>) -> Submission<'a> {
        Submission {
            target_path: "/posts/hello",
            content: "visit my shop",
            email,
            ip_address: "203.0.113.7",
            is_anonymous: false,
            parent_id: None,
            reply_to_id: None,
            claims,
        }
    }

    async fn status_for(pipeline: &ModerationPipeline) -> Result<CommentStatus, ModerationError> {
        pipeline
            .evaluate(submission(Some("guest@example.com"), None), OffsetDateTime::now_utc())
            .await
            .map(|outcome| outcome.status)
    }

    #[tokio::test]
    async fn flagged_content_below_threshold_is_published() {
        for (risk, expected) in [
            ("low", CommentStatus::Published),
            ("中风险", CommentStatus::Published),
            ("high", CommentStatus::Pending),
            ("高風險", CommentStatus::Pending),
        ] {
            let pipeline = classifying("high", "pending", StubClassifier::flagging(risk));
            assert_eq!(status_for(&pipeline).await.unwrap(), expected, "risk {risk}");
        }

        let medium = classifying("medium", "pending", StubClassifier::flagging("medium"));
        assert_eq!(status_for(&medium).await.unwrap(), CommentStatus::Pending);
    }

    #[tokio::test]
    async fn clean_verdict_publishes_regardless_of_risk() {
        let classifier = Arc::new(StubClassifier {
            verdict: Some(Classification {
                is_violation: false,
                risk_level: "high".to_string(),
                ..Default::default()
            }),
            calls: AtomicUsize::new(0),
        });
        let pipeline = classifying("low", "reject", classifier);
        assert_eq!(status_for(&pipeline).await.unwrap(), CommentStatus::Published);
    }

    #[tokio::test]
    async fn reject_action_refuses_flagged_content() {
        let pipeline = classifying("medium", "reject", StubClassifier::flagging("high"));
        match status_for(&pipeline).await {
            Err(ModerationError::Rejected(message)) => assert!(message.contains("advertising")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn classifier_failure_publishes() {
        let classifier = StubClassifier::failing();
        let pipeline = classifying("low", "reject", classifier.clone());
        assert_eq!(status_for(&pipeline).await.unwrap(), CommentStatus::Published);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_classifier_is_not_called() {
        let classifier = StubClassifier::flagging("high");
        let pipeline = pipeline(
            &[(keys::AI_DETECT_API_URL, "https://moderation.example.com/check")],
            None,
            Some(classifier.clone()),
        );
        assert_eq!(status_for(&pipeline).await.unwrap(), CommentStatus::Published);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn guest_using_admin_email_is_rejected() {
        let pipeline = pipeline(&[], None, None);
        let now = OffsetDateTime::now_utc();

        let spoofed = pipeline
            .evaluate(submission(Some(" admin@example.com "), None), now)
            .await;
        assert!(matches!(spoofed, Err(ModerationError::Rejected(_))));

        let signed_in = pipeline
            .evaluate(submission(Some(ADMIN_EMAIL), Some(AuthClaims { user_id: 1 })), now)
            .await
            .unwrap();
        assert!(signed_in.is_admin_author);
    }

    #[tokio::test]
    async fn admin_author_needs_admin_group_and_own_email() {
        let pipeline = pipeline(&[], None, None);
        let cases = [
            (1, Some(ADMIN_EMAIL), true),
            (1, Some("other@example.com"), false),
            (1, None, false),
            (2, Some("member@example.com"), false),
            (99, Some(ADMIN_EMAIL), false),
        ];
        for (user_id, email, expected) in cases {
            let resolved = pipeline
                .resolve_admin_author(Some(AuthClaims { user_id }), email)
                .await
                .unwrap();
            assert_eq!(resolved, expected, "user {user_id} with {email:?}");
        }
        assert!(!pipeline.resolve_admin_author(None, Some(ADMIN_EMAIL)).await.unwrap());
    }

    #[tokio::test]
    async fn rate_limit_window_resets_each_minute() {
        let counters: Arc<dyn CounterRepo> = Arc::new(InMemoryCounters::new());
        let pipeline = pipeline(&[(keys::LIMIT_PER_MINUTE, "2")], Some(counters), None);
        let minute = OffsetDateTime::from_unix_timestamp(1_700_000_020).unwrap();
        let guest = submission(Some("guest@example.com"), None);

        assert!(pipeline.evaluate(guest, minute).await.is_ok());
        assert!(pipeline.evaluate(guest, minute + time::Duration::seconds(10)).await.is_ok());
        assert!(matches!(
            pipeline.evaluate(guest, minute + time::Duration::seconds(19)).await,
            Err(ModerationError::Rejected(_))
        ));

        let next_minute = minute + time::Duration::seconds(20);
        assert!(pipeline.evaluate(guest, next_minute).await.is_ok());

        let other_ip = Submission {
            ip_address: "198.51.100.4",
            ..guest
        };
        assert!(pipeline.evaluate(other_ip, minute).await.is_ok());
    }

    #[test]
    fn rate_key_changes_every_minute() {
        let t0 = OffsetDateTime::from_unix_timestamp(1_700_000_020).unwrap();
        let same = t0 + time::Duration::seconds(19);
        let next = t0 + time::Duration::seconds(20);
        assert_eq!(rate_key("1.2.3.4", t0), rate_key("1.2.3.4", same));
        assert_ne!(rate_key("1.2.3.4", t0), rate_key("1.2.3.4", next));
        assert!(rate_key("1.2.3.4", t0).starts_with("comment:rate:1.2.3.4:"));
    }

    #[test]
    fn forbidden_words_are_case_sensitive_substrings() {
        let words = vec!["禁止词".to_string(), "Spam".to_string()];
        assert!(contains_forbidden_word("这是禁止词测试", &words));
        assert!(contains_forbidden_word("buy Spam now", &words));
        assert!(!contains_forbidden_word("buy spam now", &words));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("你好世界", 2), "你好");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn anonymous_flag_requires_designated_email() {
        let base = Submission {
            target_path: "/p",
            content: "hi",
            email: Some("anon@example.com"),
            ip_address: "1.1.1.1",
            is_anonymous: true,
            parent_id: None,
            reply_to_id: None,
            claims: None,
        };
        assert!(check_anonymous(&base, Some("anon@example.com")).unwrap());
        assert!(check_anonymous(&base, None).unwrap());

        let mismatched = Submission {
            email: Some("me@example.com"),
            ..base
        };
        assert!(matches!(
            check_anonymous(&mismatched, Some("anon@example.com")),
            Err(ModerationError::Invalid(_))
        ));
    }
}
