use time::{Duration, OffsetDateTime, macros::datetime};

use crate::domain::comments::CommentRecord;
use crate::domain::types::CommentStatus;

const EPOCH: OffsetDateTime = datetime!(2024-05-01 08:00 UTC);

/// Published comment on `/posts/hello` created `id` minutes after a fixed epoch.
pub(crate) fn comment(id: u64, parent_id: Option<u64>, reply_to_id: Option<u64>) -> CommentRecord {
    let created_at = EPOCH + Duration::minutes(id as i64);
    CommentRecord {
        id,
        target_path: "/posts/hello".to_string(),
        target_title: Some("Hello".to_string()),
        parent_id,
        reply_to_id,
        user_id: None,
        nickname: format!("user{id}"),
        email: Some(format!("user{id}@example.com")),
        email_md5: None,
        website: None,
        ip_address: "127.0.0.1".to_string(),
        ip_location: None,
        user_agent: None,
        content: format!("comment {id}"),
        content_html: format!("<p>comment {id}</p>"),
        status: CommentStatus::Published,
        is_admin_author: false,
        is_anonymous: false,
        allow_notification: true,
        pinned_at: None,
        like_count: 0,
        created_at,
        updated_at: created_at,
    }
}
