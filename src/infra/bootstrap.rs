//! Wiring for a self-contained engine backed by the in-memory adapters.

use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;

use crate::application::comments::{
    CommentCollaborators, CommentLimits, CommentService, CommentTransfer, ModerationPipeline,
    NotificationChannels, NotificationDispatcher, NotificationQueue, ShutdownMode,
};
use crate::application::ports::ContentClassifier;
use crate::application::render::{ContentRenderer, spawn_emoji_watcher};
use crate::application::repos::{CommentsRepo, CounterRepo, SettingsSource, UsersRepo};
use crate::config::Settings;
use crate::domain::public_id::PublicIdCodec;

use super::http::{HttpContentClassifier, HttpEmojiSource, QqProfileClient, WebhookPushChannel};
use super::memory::{InMemoryComments, InMemoryCounters, InMemoryUsers};
use super::settings::InMemorySettings;

const EXPORTED_BY: &str = "threadline";

pub struct Engine {
    pub comments: Arc<InMemoryComments>,
    pub users: Arc<InMemoryUsers>,
    pub site_settings: Arc<InMemorySettings>,
    pub renderer: Arc<ContentRenderer>,
    pub service: CommentService,
    pub transfer: CommentTransfer,
    queue: Arc<NotificationQueue>,
    emoji_watcher: Option<JoinHandle<()>>,
}

struct Outbound {
    channels: NotificationChannels,
    classifier: Option<Arc<dyn ContentClassifier>>,
    collaborators: CommentCollaborators,
}

impl Engine {
    /// Build an engine with no outbound HTTP. Must be called inside a Tokio
    /// runtime; the notification workers are spawned immediately.
    pub fn new(
        settings: &Settings,
        renderer: Arc<ContentRenderer>,
        channels: NotificationChannels,
    ) -> Self {
        Self::assemble(
            settings,
            renderer,
            Arc::new(InMemorySettings::new()),
            Outbound {
                channels,
                classifier: None,
                collaborators: CommentCollaborators::default(),
            },
        )
    }

    /// Build an engine whose collaborators talk to the services named in
    /// `site_settings`: push webhook, content classifier, QQ profiles and
    /// the emoji pack.
    pub fn connected(
        settings: &Settings,
        renderer: Arc<ContentRenderer>,
        client: Client,
        site_settings: Arc<InMemorySettings>,
    ) -> Self {
        let source: Arc<dyn SettingsSource> = site_settings.clone();
        let outbound = Outbound {
            channels: NotificationChannels {
                push: Some(Arc::new(WebhookPushChannel::new(
                    client.clone(),
                    source.clone(),
                ))),
                ..Default::default()
            },
            classifier: Some(Arc::new(HttpContentClassifier::new(client.clone()))),
            collaborators: CommentCollaborators {
                qq: Some(Arc::new(QqProfileClient::new(client.clone(), source.clone()))),
                ..Default::default()
            },
        };

        let mut engine = Self::assemble(settings, renderer, site_settings, outbound);
        engine.emoji_watcher = Some(spawn_emoji_watcher(
            engine.renderer.clone(),
            source,
            Arc::new(HttpEmojiSource::new(client)),
        ));
        engine
    }

    fn assemble(
        settings: &Settings,
        renderer: Arc<ContentRenderer>,
        site_settings: Arc<InMemorySettings>,
        outbound: Outbound,
    ) -> Self {
        let comments = Arc::new(InMemoryComments::new());
        let users = Arc::new(InMemoryUsers::new());
        let counters: Arc<dyn CounterRepo> = Arc::new(InMemoryCounters::new());
        let codec = PublicIdCodec::new(&settings.identifiers.salt);

        let comments_repo: Arc<dyn CommentsRepo> = comments.clone();
        let users_repo: Arc<dyn UsersRepo> = users.clone();
        let settings_source: Arc<dyn SettingsSource> = site_settings.clone();

        let queue = Arc::new(NotificationQueue::start(
            settings.notifications.workers.get(),
            settings.notifications.queue_capacity.get(),
        ));
        let moderation = Arc::new(ModerationPipeline::new(
            comments_repo.clone(),
            users_repo.clone(),
            settings_source.clone(),
            Some(counters),
            outbound.classifier,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            settings_source,
            users_repo,
            outbound.channels,
            queue.clone(),
        ));

        let service = CommentService::new(
            comments_repo.clone(),
            renderer.clone(),
            moderation,
            dispatcher,
            codec.clone(),
            outbound.collaborators,
            CommentLimits::from(&settings.comments),
        );
        let transfer = CommentTransfer::new(comments_repo, renderer.clone(), codec, EXPORTED_BY);

        Self {
            comments,
            users,
            site_settings,
            renderer,
            service,
            transfer,
            queue,
            emoji_watcher: None,
        }
    }

    /// Let queued notifications finish, then stop the workers. Returns the
    /// number of jobs abandoned.
    pub async fn shutdown(&self) -> usize {
        if let Some(watcher) = &self.emoji_watcher {
            watcher.abort();
        }
        self.queue.shutdown(ShutdownMode::Drain).await
    }
}
