use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the threadline binary.
#[derive(Debug, Parser)]
#[command(name = "threadline", version, about = "Threaded comment engine toolkit")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "THREADLINE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    /// Site setting applied before the command runs, as `KEY=VALUE`.
    #[arg(
        long = "set",
        value_name = "KEY=VALUE",
        value_parser = parse_site_setting,
        global = true
    )]
    pub site_settings: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Render a Markdown file to sanitized comment HTML.
    Render(RenderArgs),
    /// Load an export bundle and print one page of a thread as JSON.
    Thread(ThreadArgs),
    /// Re-import a bundle and write it back out as a ZIP archive.
    Pack(PackArgs),
    /// Submit one comment through moderation and notification fan-out.
    Submit(SubmitArgs),
    /// Look up a QQ profile through the configured profile API.
    Qq(QqArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Toggle the render caches.
    #[arg(
        long = "render-cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub render_cache_enabled: Option<bool>,

    /// Override the per-cache entry limit.
    #[arg(long = "render-cache-capacity", value_name = "COUNT", global = true)]
    pub render_cache_capacity: Option<usize>,

    /// Override the salt used to derive public identifiers.
    #[arg(long = "identifiers-salt", value_name = "SALT", global = true)]
    pub identifiers_salt: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Markdown file to render; `-` reads stdin.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct ThreadArgs {
    /// Export bundle (JSON or ZIP).
    #[arg(value_name = "BUNDLE", value_hint = ValueHint::FilePath)]
    pub bundle: PathBuf,

    /// Page path whose thread is printed.
    #[arg(long, value_name = "PATH")]
    pub path: String,

    /// 1-indexed page of top-level comments.
    #[arg(long, default_value_t = 1)]
    pub page: u32,

    /// Top-level comments per page; defaults to `comments.page_size`.
    #[arg(long = "page-size", value_name = "COUNT")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Args, Clone)]
pub struct PackArgs {
    /// Export bundle (JSON or ZIP) to read.
    #[arg(value_name = "BUNDLE", value_hint = ValueHint::FilePath)]
    pub bundle: PathBuf,

    /// ZIP archive to write.
    #[arg(value_name = "OUT", value_hint = ValueHint::FilePath)]
    pub out: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct SubmitArgs {
    /// Comment body in Markdown; `-` reads stdin.
    #[arg(value_name = "CONTENT")]
    pub content: String,

    /// Page path the comment belongs to.
    #[arg(long, value_name = "PATH")]
    pub path: String,

    #[arg(long, value_name = "NAME")]
    pub nickname: String,

    #[arg(long, value_name = "EMAIL")]
    pub email: Option<String>,

    #[arg(long, value_name = "URL")]
    pub website: Option<String>,

    /// Public id of the structural parent.
    #[arg(long, value_name = "ID")]
    pub parent: Option<String>,

    /// Public id of the comment being answered; defaults to the parent.
    #[arg(long = "reply-to", value_name = "ID")]
    pub reply_to: Option<String>,

    #[arg(long, value_name = "ADDR", default_value = "127.0.0.1")]
    pub ip: String,

    /// Existing bundle (JSON or ZIP) to load first.
    #[arg(long, value_name = "BUNDLE", value_hint = ValueHint::FilePath)]
    pub bundle: Option<PathBuf>,

    /// Write the resulting comments to this ZIP archive.
    #[arg(long, value_name = "OUT", value_hint = ValueHint::FilePath)]
    pub out: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct QqArgs {
    #[arg(value_name = "NUMBER")]
    pub number: String,
}

fn parse_site_setting(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("setting key must not be empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}
