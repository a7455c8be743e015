//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    num::{NonZeroU32, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CliArgs, Command, GlobalOverrides, PackArgs, QqArgs, RenderArgs, SubmitArgs, ThreadArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "threadline";
const ENV_PREFIX: &str = "THREADLINE";
const DEFAULT_RENDER_CACHE_CAPACITY: usize = 1000;
const DEFAULT_RENDER_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_MAX_CONTENT_CHARS: usize = 1000;
const DEFAULT_MAX_NICKNAME_CHARS: usize = 50;
const DEFAULT_PAGE_SIZE: u32 = 10;
const DEFAULT_NOTIFY_WORKERS: usize = 4;
const DEFAULT_NOTIFY_QUEUE_CAPACITY: usize = 256;
const DEFAULT_IDENTIFIER_SALT: &str = "threadline";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub comments: CommentSettings,
    pub notifications: NotificationQueueSettings,
    pub identifiers: IdentifierSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub cache_enabled: bool,
    pub cache_capacity: NonZeroUsize,
    pub cache_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CommentSettings {
    pub max_content_chars: usize,
    pub max_nickname_chars: usize,
    pub page_size: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct NotificationQueueSettings {
    pub workers: NonZeroUsize,
    pub queue_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct IdentifierSettings {
    pub salt: String,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);
    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    comments: RawCommentSettings,
    notifications: RawNotificationSettings,
    identifiers: RawIdentifierSettings,
    http: RawHttpSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.render_cache_enabled {
            self.render.cache_enabled = Some(enabled);
        }
        if let Some(capacity) = overrides.render_cache_capacity {
            self.render.cache_capacity = Some(capacity);
        }
        if let Some(salt) = overrides.identifiers_salt.as_ref() {
            self.identifiers.salt = Some(salt.clone());
        }
    }
}

impl Settings {
    /// Built-in defaults with no file, environment or CLI layers applied.
    pub fn from_defaults() -> Result<Self, LoadError> {
        Self::from_raw(RawSettings::default())
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            render,
            comments,
            notifications,
            identifiers,
            http,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            render: build_render_settings(render)?,
            comments: build_comment_settings(comments)?,
            notifications: build_notification_settings(notifications)?,
            identifiers: build_identifier_settings(identifiers)?,
            http: build_http_settings(http)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let capacity = render
        .cache_capacity
        .unwrap_or(DEFAULT_RENDER_CACHE_CAPACITY);
    let cache_capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("render.cache_capacity", "must be greater than zero"))?;

    let ttl_secs = render
        .cache_ttl_seconds
        .unwrap_or(DEFAULT_RENDER_CACHE_TTL_SECS);
    if ttl_secs == 0 {
        return Err(LoadError::invalid(
            "render.cache_ttl_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        cache_enabled: render.cache_enabled.unwrap_or(true),
        cache_capacity,
        cache_ttl: Duration::from_secs(ttl_secs),
    })
}

fn build_comment_settings(comments: RawCommentSettings) -> Result<CommentSettings, LoadError> {
    let max_content_chars = comments
        .max_content_chars
        .unwrap_or(DEFAULT_MAX_CONTENT_CHARS);
    if max_content_chars == 0 {
        return Err(LoadError::invalid(
            "comments.max_content_chars",
            "must be greater than zero",
        ));
    }

    let max_nickname_chars = comments
        .max_nickname_chars
        .unwrap_or(DEFAULT_MAX_NICKNAME_CHARS);
    if max_nickname_chars == 0 {
        return Err(LoadError::invalid(
            "comments.max_nickname_chars",
            "must be greater than zero",
        ));
    }

    let page_size = non_zero_u32(
        comments.page_size.unwrap_or(DEFAULT_PAGE_SIZE.into()),
        "comments.page_size",
    )?;

    Ok(CommentSettings {
        max_content_chars,
        max_nickname_chars,
        page_size,
    })
}

fn build_notification_settings(
    notifications: RawNotificationSettings,
) -> Result<NotificationQueueSettings, LoadError> {
    let workers = NonZeroUsize::new(notifications.workers.unwrap_or(DEFAULT_NOTIFY_WORKERS))
        .ok_or_else(|| LoadError::invalid("notifications.workers", "must be greater than zero"))?;
    let queue_capacity = NonZeroUsize::new(
        notifications
            .queue_capacity
            .unwrap_or(DEFAULT_NOTIFY_QUEUE_CAPACITY),
    )
    .ok_or_else(|| {
        LoadError::invalid("notifications.queue_capacity", "must be greater than zero")
    })?;

    Ok(NotificationQueueSettings {
        workers,
        queue_capacity,
    })
}

fn build_identifier_settings(
    identifiers: RawIdentifierSettings,
) -> Result<IdentifierSettings, LoadError> {
    let salt = identifiers
        .salt
        .unwrap_or_else(|| DEFAULT_IDENTIFIER_SALT.to_string());
    if salt.trim().is_empty() {
        return Err(LoadError::invalid(
            "identifiers.salt",
            "salt must not be empty",
        ));
    }
    Ok(IdentifierSettings { salt })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let timeout_secs = http.timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "http.timeout_secs",
            "must be greater than zero",
        ));
    }
    Ok(HttpSettings {
        timeout: Duration::from_secs(timeout_secs),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    cache_enabled: Option<bool>,
    cache_capacity: Option<usize>,
    cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCommentSettings {
    max_content_chars: Option<usize>,
    max_nickname_chars: Option<usize>,
    page_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNotificationSettings {
    workers: Option<usize>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawIdentifierSettings {
    salt: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_secs: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[cfg(test)]
mod tests;
