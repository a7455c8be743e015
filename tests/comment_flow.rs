use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use threadline::application::comments::{
    BatchOutcome, CommentError, CommentView, CreateCommentCommand, ExportScope,
    NotificationChannels, ReplyMode, parse_bundle,
};
use threadline::application::pagination::PageRequest;
use threadline::application::ports::{PortError, PushChannel};
use threadline::application::render::{ContentRenderer, RenderCacheConfig};
use threadline::application::repos::CommentQueryFilter;
use threadline::application::settings::keys;
use threadline::config::Settings;
use threadline::domain::comments::CommentRecord;
use threadline::domain::types::CommentStatus;
use threadline::infra::bootstrap::Engine;

const PATH: &str = "/posts/hello";

fn engine_with(channels: NotificationChannels) -> Engine {
    let settings = Settings::from_defaults().expect("default settings are valid");
    let renderer = Arc::new(ContentRenderer::new(RenderCacheConfig::from(
        &settings.render,
    )));
    Engine::new(&settings, renderer, channels)
}

fn engine() -> Engine {
    engine_with(NotificationChannels::default())
}

fn submission(nickname: &str, content: &str) -> CreateCommentCommand {
    CreateCommentCommand {
        target_path: PATH.to_string(),
        nickname: nickname.to_string(),
        email: Some(format!("{}@example.com", nickname.to_lowercase())),
        content: content.to_string(),
        ip_address: "198.51.100.20".to_string(),
        allow_notification: true,
        ..Default::default()
    }
}

fn reply(nickname: &str, content: &str, to: &CommentView) -> CreateCommentCommand {
    CreateCommentCommand {
        parent_id: Some(to.id.clone()),
        reply_to_id: Some(to.id.clone()),
        ..submission(nickname, content)
    }
}

/// A at the top, B answering A, C answering B.
async fn seed_conversation(engine: &Engine) -> (CommentView, CommentView, CommentView) {
    let a = engine
        .service
        .create(submission("Alice", "first!"), None)
        .await
        .expect("create A");
    let b = engine
        .service
        .create(reply("Bob", "hi Alice", &a), None)
        .await
        .expect("create B");
    let c = engine
        .service
        .create(reply("Carol", "hi Bob", &b), None)
        .await
        .expect("create C");
    (a, b, c)
}

#[tokio::test]
async fn sixth_submission_in_a_minute_is_rate_limited() {
    let engine = engine();
    engine.site_settings.set(keys::LIMIT_PER_MINUTE, "5");

    for i in 0..5 {
        engine
            .service
            .create(submission("Spammy", &format!("message {i}")), None)
            .await
            .expect("within the limit");
    }

    let err = engine
        .service
        .create(submission("Spammy", "one too many"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CommentError::Rejected(_)), "got {err:?}");
    assert_eq!(engine.comments.len(), 5);
}

#[tokio::test]
async fn forbidden_word_holds_comment_for_review() {
    let engine = engine();
    engine.site_settings.set(keys::FORBIDDEN_WORDS, "禁止词, casino");

    engine
        .service
        .create(submission("Dave", "这里有禁止词"), None)
        .await
        .expect("stored as pending");

    let thread = engine
        .service
        .thread(PATH, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(thread.total, 0);

    let filter = CommentQueryFilter {
        status: Some(CommentStatus::Pending),
        ..Default::default()
    };
    let pending = engine
        .service
        .admin_list(&filter, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(pending.total, 1);
    assert_eq!(pending.items[0].status, CommentStatus::Pending);
    assert_eq!(pending.items[0].content, "这里有禁止词");
}

#[tokio::test]
async fn thread_preview_follows_the_conversation() {
    let engine = engine();
    let (a, b, c) = seed_conversation(&engine).await;

    let thread = engine
        .service
        .thread(PATH, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(thread.total, 1);

    let item = &thread.items[0];
    assert_eq!(item.comment.id, a.id);
    assert_eq!(item.total_replies, 2);

    let ids: Vec<&str> = item.replies.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![b.id.as_str(), c.id.as_str()]);
    assert_eq!(item.replies[0].reply_to_nickname.as_deref(), Some("Alice"));
    assert_eq!(item.replies[1].reply_to_nickname.as_deref(), Some("Bob"));

    let paged = engine
        .service
        .replies(PATH, &a.id, ReplyMode::Paged(PageRequest::new(1, 1)))
        .await
        .unwrap();
    assert_eq!(paged.total, 2);
    assert_eq!(paged.items[0].id, c.id, "paged replies are newest first");

    let err = engine
        .service
        .replies(PATH, &c.id, ReplyMode::Preview)
        .await
        .unwrap_err();
    assert!(matches!(err, CommentError::Invalid(_)));
}

#[tokio::test]
async fn long_reply_chain_preview_is_a_single_unclamped_page() {
    let engine = engine();
    let root = engine
        .service
        .create(submission("Alice", "root"), None)
        .await
        .unwrap();

    let mut previous = root.clone();
    for i in 0..150 {
        previous = engine
            .service
            .create(reply("Bob", &format!("chain link {i}"), &previous), None)
            .await
            .unwrap();
    }

    let preview = engine
        .service
        .replies(PATH, &root.id, ReplyMode::Preview)
        .await
        .unwrap();
    assert_eq!(preview.items.len(), 150);
    assert_eq!(preview.total, 150);
    assert_eq!((preview.page, preview.page_size), (1, 150));
    assert!(!preview.has_more());
}

#[tokio::test]
async fn replies_are_validated_against_their_target() {
    let engine = engine();
    let a = engine
        .service
        .create(submission("Alice", "first!"), None)
        .await
        .unwrap();

    let elsewhere = CreateCommentCommand {
        target_path: "/posts/other".to_string(),
        ..reply("Bob", "wrong page", &a)
    };
    let err = engine.service.create(elsewhere, None).await.unwrap_err();
    assert!(matches!(err, CommentError::Invalid(_)));

    let dangling = CreateCommentCommand {
        reply_to_id: Some(a.id.clone()),
        ..submission("Bob", "no parent")
    };
    let err = engine.service.create(dangling, None).await.unwrap_err();
    assert!(matches!(err, CommentError::Invalid(_)));

    let garbage = CreateCommentCommand {
        parent_id: Some("not-an-id".to_string()),
        ..submission("Bob", "bad id")
    };
    let err = engine.service.create(garbage, None).await.unwrap_err();
    assert!(matches!(err, CommentError::Invalid(_)));
}

#[tokio::test]
async fn export_then_import_preserves_reply_labels() {
    let source = engine();
    let (_, b, c) = seed_conversation(&source).await;
    source.service.like(&b.id).await.unwrap();

    let archive = source.transfer.export_zip(ExportScope::All).await.unwrap();
    let bundle = parse_bundle(&archive).unwrap();
    assert_eq!(bundle.meta.total, 3);

    let target = engine();
    let report = target.transfer.import(&archive).await.unwrap();
    assert_eq!((report.imported, report.failed), (3, 0));

    let thread = target
        .service
        .thread(PATH, PageRequest::default())
        .await
        .unwrap();
    let replies = &thread.items[0].replies;
    let carol = replies
        .iter()
        .find(|r| r.nickname == "Carol")
        .expect("C survives the round trip");
    assert_eq!(carol.reply_to_nickname.as_deref(), Some("Bob"));
    assert_eq!(carol.content_html, c.content_html);

    let bob = replies.iter().find(|r| r.nickname == "Bob").unwrap();
    assert_eq!(bob.like_count, 1);
}

#[tokio::test]
async fn cyclic_bundle_entries_are_reported_not_looped() {
    let source = engine();
    seed_conversation(&source).await;
    let mut bundle = source.transfer.export(ExportScope::All).await.unwrap();

    // Point B and C at each other.
    let (b_id, c_id) = (bundle.comments[1].id.clone(), bundle.comments[2].id.clone());
    bundle.comments[1].parent_id = Some(c_id.clone());
    bundle.comments[1].reply_to_id = Some(c_id);
    bundle.comments[2].parent_id = Some(b_id.clone());
    bundle.comments[2].reply_to_id = Some(b_id);

    let target = engine();
    let report = target.transfer.import_bundle(bundle).await.unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.errors.len(), 2);

    let thread = target
        .service
        .thread(PATH, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(thread.items[0].total_replies, 0);
}

#[tokio::test]
async fn likes_pins_and_bulk_delete() {
    let engine = engine();
    let (a, b, c) = seed_conversation(&engine).await;

    assert_eq!(engine.service.unlike(&a.id).await.unwrap(), 0);
    assert_eq!(engine.service.like(&a.id).await.unwrap(), 1);

    let pinned = engine.service.set_pinned(&a.id, true).await.unwrap();
    assert!(pinned.comment.pinned_at.is_some());

    let outcome = engine
        .service
        .delete(&[b.id.clone(), c.id.clone(), "bogus".to_string()])
        .await
        .unwrap();
    assert_eq!(
        outcome,
        BatchOutcome {
            succeeded: 2,
            failed: 1
        }
    );

    let moved = engine.service.rename_path(PATH, "/posts/renamed").await.unwrap();
    assert_eq!(moved, 1);
}

#[derive(Default)]
struct RecordingPush {
    sent: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl PushChannel for RecordingPush {
    async fn send_comment_notification(
        &self,
        comment: &CommentRecord,
        parent: Option<&CommentRecord>,
    ) -> Result<(), PortError> {
        self.sent
            .lock()
            .unwrap()
            .push((comment.nickname.clone(), parent.map(|p| p.nickname.clone())));
        Ok(())
    }
}

#[tokio::test]
async fn push_notifications_reach_admin_and_parent_author() {
    let push = Arc::new(RecordingPush::default());
    let engine = engine_with(NotificationChannels {
        push: Some(push.clone()),
        ..Default::default()
    });
    for (key, value) in [
        (keys::PUSH_ENABLE, "true"),
        (keys::PUSH_CHANNEL, "webhook"),
        (keys::NOTIFY_ADMIN, "true"),
        (keys::NOTIFY_REPLY, "true"),
        (keys::ADMIN_EMAIL, "owner@example.com"),
    ] {
        engine.site_settings.set(key, value);
    }

    let a = engine
        .service
        .create(submission("Alice", "first!"), None)
        .await
        .unwrap();
    engine
        .service
        .create(reply("Bob", "hi Alice", &a), None)
        .await
        .unwrap();
    // Matches the admin email, so the push device owner is not notified.
    engine
        .service
        .create(submission("Owner", "site news"), None)
        .await
        .unwrap();

    assert_eq!(engine.shutdown().await, 0);

    let mut sent = push.sent.lock().unwrap().clone();
    sent.sort();
    assert_eq!(
        sent,
        vec![
            ("Alice".to_string(), None),
            ("Bob".to_string(), None),
            ("Bob".to_string(), Some("Alice".to_string())),
        ]
    );
}
