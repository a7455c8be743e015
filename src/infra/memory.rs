//! In-process adapters for the repository and preference ports.
//!
//! Used by the CLI and the integration tests; state lives only as long as the
//! adapter does.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::application::pagination::{Page, PageRequest};
use crate::application::ports::{NotificationPreferences, PortError};
use crate::application::repos::{
    CommentQueryFilter, CommentsRepo, CounterRepo, CreateCommentParams, RepoError,
    UpdateCommentInfoParams, UsersRepo,
};
use crate::domain::comments::CommentRecord;
use crate::domain::types::CommentStatus;
use crate::domain::users::UserRecord;
use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";

#[derive(Debug, Default)]
struct CommentTable {
    next_id: u64,
    rows: BTreeMap<u64, CommentRecord>,
}

#[derive(Debug, Default)]
pub struct InMemoryComments {
    table: RwLock<CommentTable>,
}

impl InMemoryComments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.table, SOURCE, "len").rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn modify(
        &self,
        op: &'static str,
        id: u64,
        apply: impl FnOnce(&mut CommentRecord),
    ) -> Result<CommentRecord, RepoError> {
        let mut table = rw_write(&self.table, SOURCE, op);
        let row = table.rows.get_mut(&id).ok_or(RepoError::NotFound)?;
        apply(row);
        Ok(row.clone())
    }
}

fn newest_first(a: &CommentRecord, b: &CommentRecord) -> std::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))
}

fn contains_ci(haystack: Option<&str>, needle: &Option<String>) -> bool {
    match needle.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(needle) => haystack
            .is_some_and(|value| value.to_lowercase().contains(&needle.to_lowercase())),
    }
}

fn matches_filter(row: &CommentRecord, filter: &CommentQueryFilter) -> bool {
    contains_ci(Some(&row.nickname), &filter.nickname)
        && contains_ci(row.email.as_deref(), &filter.email)
        && contains_ci(Some(&row.ip_address), &filter.ip_address)
        && contains_ci(Some(&row.content), &filter.content)
        && contains_ci(Some(&row.target_path), &filter.target_path)
        && filter.status.is_none_or(|status| row.status == status)
}

fn paginate(mut rows: Vec<CommentRecord>, request: PageRequest) -> Page<CommentRecord> {
    rows.sort_by(newest_first);
    let total = rows.len() as u64;
    Page::new(request.slice(&rows), total, request)
}

#[async_trait]
impl CommentsRepo for InMemoryComments {
    async fn create(&self, params: CreateCommentParams) -> Result<CommentRecord, RepoError> {
        let mut table = rw_write(&self.table, SOURCE, "create");
        for (field, reference) in [("parent", params.parent_id), ("reply_to", params.reply_to_id)]
        {
            if let Some(id) = reference
                && !table.rows.contains_key(&id)
            {
                return Err(RepoError::Integrity {
                    message: format!("{field} comment {id} does not exist"),
                });
            }
        }

        table.next_id += 1;
        let record = CommentRecord {
            id: table.next_id,
            target_path: params.target_path,
            target_title: params.target_title,
            parent_id: params.parent_id,
            reply_to_id: params.reply_to_id,
            user_id: params.user_id,
            nickname: params.nickname,
            email: params.email,
            email_md5: params.email_md5,
            website: params.website,
            ip_address: params.ip_address,
            ip_location: params.ip_location,
            user_agent: params.user_agent,
            content: params.content,
            content_html: params.content_html,
            status: params.status,
            is_admin_author: params.is_admin_author,
            is_anonymous: params.is_anonymous,
            allow_notification: params.allow_notification,
            pinned_at: params.pinned_at,
            like_count: params.like_count,
            created_at: params.created_at,
            updated_at: params.updated_at,
        };
        table.rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: u64) -> Result<Option<CommentRecord>, RepoError> {
        Ok(rw_read(&self.table, SOURCE, "find_by_id")
            .rows
            .get(&id)
            .cloned())
    }

    async fn find_many_by_ids(&self, ids: &[u64]) -> Result<Vec<CommentRecord>, RepoError> {
        let table = rw_read(&self.table, SOURCE, "find_many_by_ids");
        Ok(ids
            .iter()
            .filter_map(|id| table.rows.get(id).cloned())
            .collect())
    }

    async fn list_published_by_path(&self, path: &str) -> Result<Vec<CommentRecord>, RepoError> {
        let table = rw_read(&self.table, SOURCE, "list_published_by_path");
        Ok(table
            .rows
            .values()
            .filter(|row| row.status.is_published() && row.target_path == path)
            .cloned()
            .collect())
    }

    async fn list_published(&self, page: PageRequest) -> Result<Page<CommentRecord>, RepoError> {
        let rows = rw_read(&self.table, SOURCE, "list_published")
            .rows
            .values()
            .filter(|row| row.status.is_published())
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn list_filtered(
        &self,
        filter: &CommentQueryFilter,
        page: PageRequest,
    ) -> Result<Page<CommentRecord>, RepoError> {
        let rows = rw_read(&self.table, SOURCE, "list_filtered")
            .rows
            .values()
            .filter(|row| matches_filter(row, filter))
            .cloned()
            .collect();
        Ok(paginate(rows, page))
    }

    async fn list_all(&self) -> Result<Vec<CommentRecord>, RepoError> {
        Ok(rw_read(&self.table, SOURCE, "list_all")
            .rows
            .values()
            .cloned()
            .collect())
    }

    async fn update_status(
        &self,
        id: u64,
        status: CommentStatus,
    ) -> Result<CommentRecord, RepoError> {
        self.modify("update_status", id, |row| row.status = status)
    }

    async fn set_pinned(
        &self,
        id: u64,
        pinned_at: Option<time::OffsetDateTime>,
    ) -> Result<CommentRecord, RepoError> {
        self.modify("set_pinned", id, |row| row.pinned_at = pinned_at)
    }

    async fn adjust_likes(&self, id: u64, delta: i32) -> Result<u32, RepoError> {
        let row = self.modify("adjust_likes", id, |row| {
            row.like_count = row.like_count.saturating_add_signed(delta);
        })?;
        Ok(row.like_count)
    }

    async fn update_content(
        &self,
        id: u64,
        content: String,
        content_html: String,
    ) -> Result<CommentRecord, RepoError> {
        self.modify("update_content", id, |row| {
            row.content = content;
            row.content_html = content_html;
            row.updated_at = time::OffsetDateTime::now_utc();
        })
    }

    async fn update_info(
        &self,
        id: u64,
        params: UpdateCommentInfoParams,
    ) -> Result<CommentRecord, RepoError> {
        self.modify("update_info", id, |row| {
            if let Some(nickname) = params.nickname {
                row.nickname = nickname;
            }
            if let Some(email) = params.email {
                row.email = Some(email);
            }
            if let Some(digest) = params.email_md5 {
                row.email_md5 = Some(digest);
            }
            if let Some(website) = params.website {
                row.website = Some(website);
            }
            if let Some(content) = params.content {
                row.content = content;
            }
            if let Some(html) = params.content_html {
                row.content_html = html;
            }
            row.updated_at = time::OffsetDateTime::now_utc();
        })
    }

    async fn update_path(&self, old_path: &str, new_path: &str) -> Result<u64, RepoError> {
        let mut table = rw_write(&self.table, SOURCE, "update_path");
        let mut affected = 0;
        for row in table.rows.values_mut() {
            if row.target_path == old_path {
                row.target_path = new_path.to_string();
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn delete_by_ids(&self, ids: &[u64]) -> Result<u64, RepoError> {
        let mut table = rw_write(&self.table, SOURCE, "delete_by_ids");
        Ok(ids
            .iter()
            .filter(|id| table.rows.remove(id).is_some())
            .count() as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryUsers {
    rows: RwLock<HashMap<u64, UserRecord>>,
}

impl InMemoryUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserRecord) {
        rw_write(&self.rows, SOURCE, "insert_user").insert(user.id, user);
    }
}

#[async_trait]
impl UsersRepo for InMemoryUsers {
    async fn find_by_id(&self, id: u64) -> Result<Option<UserRecord>, RepoError> {
        Ok(rw_read(&self.rows, SOURCE, "find_user").get(&id).cloned())
    }

    async fn list_by_group(&self, group_id: u64) -> Result<Vec<UserRecord>, RepoError> {
        let mut users: Vec<UserRecord> = rw_read(&self.rows, SOURCE, "list_by_group")
            .values()
            .filter(|user| user.group_id == group_id)
            .cloned()
            .collect();
        users.sort_by_key(|user| user.id);
        Ok(users)
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    value: i64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

/// Expiring counters keyed by string, modelled on a key-value store's
/// `INCR` and `EXPIRE`. Expired keys are swept every [`SWEEP_EVERY`] increments.
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    entries: DashMap<String, CounterEntry>,
    increments: AtomicU64,
}

const SWEEP_EVERY: u64 = 64;

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        debug!(
            target = SOURCE,
            op = "counter_sweep",
            removed = before.saturating_sub(self.entries.len()),
            "Swept expired counters"
        );
    }
}

#[async_trait]
impl CounterRepo for InMemoryCounters {
    async fn incr(&self, key: &str) -> Result<i64, RepoError> {
        let now = Instant::now();
        // Must run before the entry guard below is taken.
        if (self.increments.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            self.sweep(now);
        }
        let mut entry = self.entries.entry(key.to_string()).or_insert(CounterEntry {
            value: 0,
            expires_at: None,
        });
        if !entry.is_live(now) {
            *entry = CounterEntry {
                value: 0,
                expires_at: None,
            };
        }
        entry.value += 1;
        Ok(entry.value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), RepoError> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

/// Per-user opt-out list. Users not listed receive notifications.
#[derive(Debug, Default)]
pub struct InMemoryPreferences {
    opted_out: DashMap<u64, ()>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: u64, allow: bool) {
        if allow {
            self.opted_out.remove(&user_id);
        } else {
            self.opted_out.insert(user_id, ());
        }
    }
}

#[async_trait]
impl NotificationPreferences for InMemoryPreferences {
    async fn allows_comment_notifications(&self, user_id: u64) -> Result<bool, PortError> {
        Ok(!self.opted_out.contains_key(&user_id))
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn params(path: &str, parent_id: Option<u64>) -> CreateCommentParams {
        let at = datetime!(2024-05-01 08:00 UTC);
        CreateCommentParams {
            target_path: path.to_string(),
            target_title: None,
            parent_id,
            reply_to_id: parent_id,
            user_id: None,
            nickname: "guest".to_string(),
            email: Some("guest@example.com".to_string()),
            email_md5: None,
            website: None,
            ip_address: "203.0.113.7".to_string(),
            ip_location: None,
            user_agent: None,
            content: "hello".to_string(),
            content_html: "<p>hello</p>".to_string(),
            status: CommentStatus::Published,
            is_admin_author: false,
            is_anonymous: false,
            allow_notification: false,
            pinned_at: None,
            like_count: 0,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn create_assigns_sequential_ids_and_checks_references() {
        let repo = InMemoryComments::new();
        let first = repo.create(params("/a", None)).await.unwrap();
        let second = repo.create(params("/a", Some(first.id))).await.unwrap();
        assert_eq!((first.id, second.id), (1, 2));

        let err = repo.create(params("/a", Some(99))).await.unwrap_err();
        assert!(matches!(err, RepoError::Integrity { .. }));
    }

    #[tokio::test]
    async fn likes_saturate_at_zero() {
        let repo = InMemoryComments::new();
        let row = repo.create(params("/a", None)).await.unwrap();
        assert_eq!(repo.adjust_likes(row.id, -1).await.unwrap(), 0);
        assert_eq!(repo.adjust_likes(row.id, 1).await.unwrap(), 1);
        assert!(matches!(
            repo.adjust_likes(42, 1).await,
            Err(RepoError::NotFound)
        ));
    }

    #[tokio::test]
    async fn filter_and_rename_operate_on_matching_rows() {
        let repo = InMemoryComments::new();
        repo.create(params("/a", None)).await.unwrap();
        repo.create(params("/b", None)).await.unwrap();

        let filter = CommentQueryFilter {
            target_path: Some("/a".into()),
            ..Default::default()
        };
        let page = repo.list_filtered(&filter, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 1);

        assert_eq!(repo.update_path("/a", "/c").await.unwrap(), 1);
        assert!(repo.list_published_by_path("/a").await.unwrap().is_empty());
        assert_eq!(repo.delete_by_ids(&[1, 2, 3]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn counters_reset_after_expiry() {
        let counters = InMemoryCounters::new();
        assert_eq!(counters.incr("k").await.unwrap(), 1);
        counters.expire("k", Duration::ZERO).await.unwrap();
        assert_eq!(counters.incr("k").await.unwrap(), 1);
        assert_eq!(counters.incr("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn expired_counters_are_swept() {
        let counters = InMemoryCounters::new();
        for minute in 0..1000 {
            let key = format!("comment:rate:203.0.113.9:{minute}");
            counters.incr(&key).await.unwrap();
            counters.expire(&key, Duration::ZERO).await.unwrap();
        }
        counters.incr("comment:rate:203.0.113.9:1000").await.unwrap();

        assert!(counters.len() <= SWEEP_EVERY as usize, "{} keys kept", counters.len());
    }

    #[tokio::test]
    async fn sweep_keeps_live_counters() {
        let counters = InMemoryCounters::new();
        counters.incr("live").await.unwrap();
        counters.expire("live", Duration::from_secs(60)).await.unwrap();
        for n in 0..SWEEP_EVERY {
            counters.incr(&format!("other:{n}")).await.unwrap();
        }
        assert_eq!(counters.incr("live").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn preferences_default_to_allowed() {
        let preferences = InMemoryPreferences::new();
        assert!(preferences.allows_comment_notifications(7).await.unwrap());
        preferences.set(7, false);
        assert!(!preferences.allows_comment_notifications(7).await.unwrap());
    }
}
