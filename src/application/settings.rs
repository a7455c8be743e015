//! Typed views over the dynamic site settings consumed by the comment engine.

use crate::application::repos::SettingsSource;

pub mod keys {
    pub const LIMIT_PER_MINUTE: &str = "comment.limit_per_minute";
    pub const FORBIDDEN_WORDS: &str = "comment.forbidden_words";
    pub const ANONYMOUS_EMAIL: &str = "comment.anonymous_email";
    pub const AI_DETECT_ENABLE: &str = "comment.ai_detect.enable";
    pub const AI_DETECT_API_URL: &str = "comment.ai_detect.api_url";
    pub const AI_DETECT_ACTION: &str = "comment.ai_detect.action";
    pub const AI_DETECT_RISK_LEVEL: &str = "comment.ai_detect.risk_level";
    pub const NOTIFY_ADMIN: &str = "comment.notify_admin";
    pub const NOTIFY_REPLY: &str = "comment.notify_reply";
    pub const EMAIL_NOTIFY: &str = "comment.email_notify";
    pub const PUSH_ENABLE: &str = "comment.push.enable";
    pub const PUSH_CHANNEL: &str = "comment.push.channel";
    pub const PUSH_URL: &str = "comment.push.url";
    pub const ADMIN_EMAIL: &str = "site.admin_email";
    pub const SITE_URL: &str = "site.url";
    pub const EMOJI_PACK_URL: &str = "comment.emoji_pack_url";
    pub const QQ_API_URL: &str = "comment.qq_api.url";
    pub const QQ_API_KEY: &str = "comment.qq_api.key";
}

/// What to do with a comment the classifier flags at or above the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiAction {
    Pending,
    Reject,
}

impl AiAction {
    fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "reject" => AiAction::Reject,
            _ => AiAction::Pending,
        }
    }
}

/// Ordinal risk tier reported by the content classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// Accepts English, simplified and traditional Chinese labels.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" | "低" | "低风险" | "低風險" => Some(RiskLevel::Low),
            "medium" | "moderate" | "中" | "中等" | "中风险" | "中風險" => {
                Some(RiskLevel::Medium)
            }
            "high" | "高" | "高风险" | "高風險" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModerationSettings {
    /// Zero disables rate limiting.
    pub limit_per_minute: u32,
    pub forbidden_words: Vec<String>,
    pub anonymous_email: Option<String>,
    pub ai_enabled: bool,
    pub ai_api_url: Option<String>,
    pub ai_action: AiAction,
    pub ai_threshold: RiskLevel,
}

impl ModerationSettings {
    pub async fn load(source: &dyn SettingsSource) -> Self {
        let limit_per_minute = source
            .get_string(keys::LIMIT_PER_MINUTE)
            .await
            .and_then(|value| value.trim().parse::<u32>().ok())
            .unwrap_or(0);

        let forbidden_words = source
            .get_string(keys::FORBIDDEN_WORDS)
            .await
            .map(|value| split_word_list(&value))
            .unwrap_or_default();

        let ai_threshold = source
            .get_string(keys::AI_DETECT_RISK_LEVEL)
            .await
            .and_then(|value| RiskLevel::parse(&value))
            .unwrap_or(RiskLevel::Medium);

        Self {
            limit_per_minute,
            forbidden_words,
            anonymous_email: non_empty(source.get_string(keys::ANONYMOUS_EMAIL).await),
            ai_enabled: source.get_bool(keys::AI_DETECT_ENABLE).await,
            ai_api_url: non_empty(source.get_string(keys::AI_DETECT_API_URL).await),
            ai_action: AiAction::parse(source.get_string(keys::AI_DETECT_ACTION).await.as_deref()),
            ai_threshold,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotificationSettings {
    pub notify_admin: bool,
    pub notify_reply: bool,
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub push_channel: Option<String>,
    pub admin_email: Option<String>,
    pub site_url: Option<String>,
}

impl NotificationSettings {
    pub async fn load(source: &dyn SettingsSource) -> Self {
        let push_channel = non_empty(source.get_string(keys::PUSH_CHANNEL).await);
        Self {
            notify_admin: source.get_bool(keys::NOTIFY_ADMIN).await,
            notify_reply: source.get_bool(keys::NOTIFY_REPLY).await,
            email_enabled: source.get_bool(keys::EMAIL_NOTIFY).await,
            push_enabled: source.get_bool(keys::PUSH_ENABLE).await && push_channel.is_some(),
            push_channel,
            admin_email: non_empty(source.get_string(keys::ADMIN_EMAIL).await),
            site_url: non_empty(source.get_string(keys::SITE_URL).await),
        }
    }

    pub fn is_admin_email(&self, email: Option<&str>) -> bool {
        match (self.admin_email.as_deref(), email) {
            (Some(admin), Some(email)) => admin.trim().eq_ignore_ascii_case(email.trim()),
            _ => false,
        }
    }
}

/// Comma-separated list; accepts the full-width comma as well.
fn split_word_list(value: &str) -> Vec<String> {
    value
        .split([',', '，'])
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}
