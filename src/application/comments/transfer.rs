//! Export and import of comment bundles.
//!
//! Bundles reference comments by public identifier only, so an import into a
//! different store rebuilds the reply topology under fresh internal keys.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::application::render::ContentRenderer;
use crate::application::repos::{CommentsRepo, CreateCommentParams, RepoError};
use crate::domain::comments::{CommentRecord, email_digest};
use crate::domain::error::DomainError;
use crate::domain::public_id::PublicIdCodec;
use crate::domain::types::{CommentStatus, EntityKind};

const SOURCE: &str = "application::comments::transfer";

pub const BUNDLE_VERSION: &str = "1.0";
pub const BUNDLE_JSON_NAME: &str = "comments.json";
pub const BUNDLE_README_NAME: &str = "README.md";

/// Child comments are retried at most this many times while waiting for
/// their parents to appear.
pub const MAX_IMPORT_SWEEPS: usize = 10;

const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";
const MAX_BUNDLE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bundle archive is unreadable: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("bundle i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub version: String,
    #[serde(with = "time::serde::rfc3339")]
    pub export_at: OffsetDateTime,
    pub comments: Vec<ExportedComment>,
    pub meta: ExportMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMeta {
    pub total: u64,
    pub exported_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedComment {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    pub target_path: String,
    #[serde(default)]
    pub target_title: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    pub nickname: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub email_md5: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub ip_location: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub content: String,
    #[serde(default)]
    pub content_html: String,
    pub status: CommentStatus,
    #[serde(default)]
    pub is_admin_author: bool,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub allow_notification: bool,
    #[serde(default)]
    pub like_count: u32,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub pinned_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub enum ExportScope {
    All,
    Ids(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct CommentTransfer {
    comments: Arc<dyn CommentsRepo>,
    renderer: Arc<ContentRenderer>,
    codec: PublicIdCodec,
    exported_by: String,
}

impl CommentTransfer {
    pub fn new(
        comments: Arc<dyn CommentsRepo>,
        renderer: Arc<ContentRenderer>,
        codec: PublicIdCodec,
        exported_by: impl Into<String>,
    ) -> Self {
        Self {
            comments,
            renderer,
            codec,
            exported_by: exported_by.into(),
        }
    }

    pub async fn export(&self, scope: ExportScope) -> Result<ExportBundle, TransferError> {
        let mut records = match scope {
            ExportScope::All => self.comments.list_all().await?,
            ExportScope::Ids(public_ids) => {
                let ids = public_ids
                    .iter()
                    .map(|id| self.codec.decode_comment(id))
                    .collect::<Result<Vec<_>, _>>()?;
                self.comments.find_many_by_ids(&ids).await?
            }
        };
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let comments: Vec<ExportedComment> = records.iter().map(|r| self.exported(r)).collect();
        info!(
            target = SOURCE,
            op = "export",
            result = "ok",
            total = comments.len(),
            "Comments exported"
        );

        Ok(ExportBundle {
            version: BUNDLE_VERSION.to_string(),
            export_at: OffsetDateTime::now_utc(),
            meta: ExportMeta {
                total: comments.len() as u64,
                exported_by: self.exported_by.clone(),
            },
            comments,
        })
    }

    pub async fn export_zip(&self, scope: ExportScope) -> Result<Vec<u8>, TransferError> {
        let bundle = self.export(scope).await?;
        bundle_to_zip(&bundle)
    }

    /// Import a JSON bundle or a ZIP wrapping one.
    pub async fn import(&self, bytes: &[u8]) -> Result<ImportReport, TransferError> {
        let bundle = parse_bundle(bytes)?;
        self.import_bundle(bundle).await
    }

    pub async fn import_bundle(&self, bundle: ExportBundle) -> Result<ImportReport, TransferError> {
        if bundle.version != BUNDLE_VERSION {
            warn!(
                target = SOURCE,
                op = "import",
                result = "version_mismatch",
                version = bundle.version.as_str(),
                "Importing bundle with unexpected version"
            );
        }

        let mut report = ImportReport::default();
        let mut resolved: HashMap<String, u64> = HashMap::new();
        let (roots, mut pending): (Vec<_>, Vec<_>) = bundle
            .comments
            .into_iter()
            .partition(|c| c.parent_id.is_none());

        for item in roots {
            self.import_one(item, &mut resolved, &mut report).await;
        }

        for _ in 0..MAX_IMPORT_SWEEPS {
            if pending.is_empty() {
                break;
            }
            let (ready, waiting): (Vec<_>, Vec<_>) = pending
                .into_iter()
                .partition(|item| dependencies_resolved(item, &resolved));
            pending = waiting;
            if ready.is_empty() {
                break;
            }
            for item in ready {
                self.import_one(item, &mut resolved, &mut report).await;
            }
        }

        for item in pending {
            report.failed += 1;
            report.errors.push(unresolved_message(&item, &resolved));
        }

        info!(
            target = SOURCE,
            op = "import",
            result = if report.failed == 0 { "ok" } else { "partial" },
            imported = report.imported,
            failed = report.failed,
            "Comment bundle imported"
        );
        Ok(report)
    }

    async fn import_one(
        &self,
        item: ExportedComment,
        resolved: &mut HashMap<String, u64>,
        report: &mut ImportReport,
    ) {
        let exported_id = item.id.clone();
        let params = self.import_params(item, resolved);
        match self.comments.create(params).await {
            Ok(record) => {
                resolved.insert(exported_id, record.id);
                report.imported += 1;
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "import",
                    result = "error",
                    comment = exported_id.as_str(),
                    error = %err,
                    "Failed to import comment"
                );
                report.failed += 1;
                report.errors.push(format!("{exported_id}: {err}"));
            }
        }
    }

    fn import_params(
        &self,
        item: ExportedComment,
        resolved: &HashMap<String, u64>,
    ) -> CreateCommentParams {
        let lookup = |id: &Option<String>| id.as_ref().and_then(|id| resolved.get(id).copied());
        let content_html = if item.content_html.trim().is_empty() {
            self.renderer.to_html(&item.content)
        } else {
            item.content_html
        };

        CreateCommentParams {
            parent_id: lookup(&item.parent_id),
            reply_to_id: lookup(&item.reply_to_id),
            user_id: item
                .user_id
                .as_deref()
                .and_then(|id| self.codec.decode(EntityKind::User, id).ok()),
            email_md5: item
                .email_md5
                .or_else(|| item.email.as_deref().map(email_digest)),
            target_path: item.target_path,
            target_title: item.target_title,
            nickname: item.nickname,
            email: item.email,
            website: item.website,
            ip_address: item.ip_address,
            ip_location: item.ip_location,
            user_agent: item.user_agent,
            content: item.content,
            content_html,
            status: item.status,
            is_admin_author: item.is_admin_author,
            is_anonymous: item.is_anonymous,
            allow_notification: item.allow_notification,
            pinned_at: item.pinned_at,
            like_count: item.like_count,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }

    fn exported(&self, record: &CommentRecord) -> ExportedComment {
        ExportedComment {
            id: self.codec.encode_comment(record.id),
            parent_id: record.parent_id.map(|id| self.codec.encode_comment(id)),
            reply_to_id: record.reply_to_id.map(|id| self.codec.encode_comment(id)),
            target_path: record.target_path.clone(),
            target_title: record.target_title.clone(),
            user_id: record
                .user_id
                .map(|id| self.codec.encode(EntityKind::User, id)),
            nickname: record.nickname.clone(),
            email: record.email.clone(),
            email_md5: record.email_md5.clone(),
            website: record.website.clone(),
            ip_address: record.ip_address.clone(),
            ip_location: record.ip_location.clone(),
            user_agent: record.user_agent.clone(),
            content: record.content.clone(),
            content_html: record.content_html.clone(),
            status: record.status,
            is_admin_author: record.is_admin_author,
            is_anonymous: record.is_anonymous,
            allow_notification: record.allow_notification,
            like_count: record.like_count,
            pinned_at: record.pinned_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn dependencies_resolved(item: &ExportedComment, resolved: &HashMap<String, u64>) -> bool {
    missing_dependency(item, resolved).is_none()
}

/// First dependency of `item` with no imported counterpart, labelled.
fn missing_dependency<'a>(
    item: &'a ExportedComment,
    resolved: &HashMap<String, u64>,
) -> Option<(&'static str, &'a str)> {
    [("parent", &item.parent_id), ("reply target", &item.reply_to_id)]
        .into_iter()
        .find_map(|(label, id)| {
            id.as_deref()
                .filter(|id| !resolved.contains_key(*id))
                .map(|id| (label, id))
        })
}

fn unresolved_message(item: &ExportedComment, resolved: &HashMap<String, u64>) -> String {
    match missing_dependency(item, resolved) {
        Some((label, id)) => format!("{}: {label} {id} was never imported", item.id),
        None => format!("{}: dependencies did not resolve", item.id),
    }
}

/// Decode a bundle, detecting the ZIP variant by its local-file signature.
pub fn parse_bundle(bytes: &[u8]) -> Result<ExportBundle, TransferError> {
    if bytes.starts_with(ZIP_SIGNATURE) {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
        let file = archive.by_name(BUNDLE_JSON_NAME)?;
        if file.size() > MAX_BUNDLE_BYTES {
            return Err(TransferError::Invalid(format!(
                "{BUNDLE_JSON_NAME} exceeds {MAX_BUNDLE_BYTES} bytes"
            )));
        }
        let mut json = Vec::new();
        file.take(MAX_BUNDLE_BYTES).read_to_end(&mut json)?;
        return Ok(serde_json::from_slice(&json)?);
    }
    Ok(serde_json::from_slice(bytes)?)
}

pub fn bundle_to_zip(bundle: &ExportBundle) -> Result<Vec<u8>, TransferError> {
    let json = serde_json::to_vec_pretty(bundle)?;
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file(BUNDLE_JSON_NAME, options)?;
    writer.write_all(&json)?;
    writer.start_file(BUNDLE_README_NAME, options)?;
    writer.write_all(readme(bundle).as_bytes())?;
    Ok(writer.finish()?.into_inner())
}

fn readme(bundle: &ExportBundle) -> String {
    let exported_at = bundle
        .export_at
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| bundle.export_at.to_string());
    format!(
        "# Comment export\n\n\
         - Version: {version}\n\
         - Exported at: {exported_at}\n\
         - Comments: {total}\n\
         - Exported by: {by}\n\n\
         `{json}` holds the comments. Identifiers are public ids; parents and \
         reply targets refer to other entries in the same file. Import the \
         archive as-is or the JSON file on its own.\n",
        version = bundle.version,
        total = bundle.meta.total,
        by = bundle.meta.exported_by,
        json = BUNDLE_JSON_NAME,
    )
}
