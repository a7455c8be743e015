//! Fan-out of published comments to email, push and in-app channels.
//!
//! Every channel runs as a job on a bounded worker pool. Callers never wait
//! on delivery and never see its outcome; failures are logged and counted.

use std::sync::Arc;

use futures::future::BoxFuture;
use metrics::counter;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::ports::{
    EmailDispatcher, InAppNotifier, NotificationPreferences, PortError, PushChannel,
};
use crate::application::repos::{RepoError, SettingsSource, UsersRepo};
use crate::application::settings::NotificationSettings;
use crate::domain::comments::CommentRecord;
use crate::domain::types::ADMIN_GROUP_ID;

const SOURCE: &str = "application::comments::notify";

pub(crate) const METRIC_DROPPED: &str = "threadline_notify_dropped_total";
pub(crate) const METRIC_FAILED: &str = "threadline_notify_failed_total";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Port(#[from] PortError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// One unit of notification work.
pub struct NotificationJob {
    channel: &'static str,
    work: BoxFuture<'static, Result<(), NotifyError>>,
}

impl NotificationJob {
    pub fn new(
        channel: &'static str,
        work: impl Future<Output = Result<(), NotifyError>> + Send + 'static,
    ) -> Self {
        Self {
            channel,
            work: Box::pin(work),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Finish everything already queued, then stop.
    Drain,
    /// Cancel running jobs and discard queued ones.
    Abandon,
}

type Signal = watch::Receiver<Option<ShutdownMode>>;

/// Bounded queue served by a fixed set of workers.
pub struct NotificationQueue {
    sender: mpsc::Sender<NotificationJob>,
    receiver: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    shutdown: watch::Sender<Option<ShutdownMode>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationQueue {
    /// Spawn `workers` tasks over a queue holding at most `capacity` jobs.
    pub fn start(workers: usize, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (shutdown, signal) = watch::channel(None);

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(worker, Arc::clone(&receiver), signal.clone()))
            })
            .collect();

        Self {
            sender,
            receiver,
            shutdown,
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue without waiting. Returns `false` when the job was dropped.
    pub fn submit(&self, job: NotificationJob) -> bool {
        if self.shutdown.borrow().is_some() {
            counter!(METRIC_DROPPED, "channel" => job.channel, "reason" => "shutdown")
                .increment(1);
            return false;
        }

        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                counter!(METRIC_DROPPED, "channel" => job.channel, "reason" => "full")
                    .increment(1);
                warn!(
                    target = SOURCE,
                    op = "submit",
                    result = "dropped",
                    channel = job.channel,
                    "Notification queue full"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                counter!(METRIC_DROPPED, "channel" => job.channel, "reason" => "closed")
                    .increment(1);
                false
            }
        }
    }

    /// Stop the workers and wait for them. Returns how many queued jobs
    /// were discarded.
    pub async fn shutdown(&self, mode: ShutdownMode) -> usize {
        self.shutdown.send_replace(Some(mode));

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(
                    target = SOURCE,
                    op = "shutdown",
                    result = "join_error",
                    error = %err,
                    "Notification worker ended abnormally"
                );
            }
        }

        let mut receiver = self.receiver.lock().await;
        let mut discarded = 0;
        while let Ok(job) = receiver.try_recv() {
            counter!(METRIC_DROPPED, "channel" => job.channel, "reason" => "abandoned")
                .increment(1);
            discarded += 1;
        }
        receiver.close();

        debug!(
            target = SOURCE,
            op = "shutdown",
            result = "ok",
            mode = ?mode,
            discarded,
            "Notification queue stopped"
        );
        discarded
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    mut signal: Signal,
) {
    loop {
        let mode = *signal.borrow_and_update();
        let next = match mode {
            Some(ShutdownMode::Abandon) => break,
            Some(ShutdownMode::Drain) => receiver.lock().await.try_recv().ok(),
            None => {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    biased;
                    changed = signal.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    job = rx.recv() => job,
                }
            }
        };

        let Some(job) = next else {
            break;
        };

        let channel = job.channel;
        tokio::select! {
            biased;
            () = abandoned(&mut signal) => {
                counter!(METRIC_DROPPED, "channel" => channel, "reason" => "abandoned")
                    .increment(1);
                break;
            }
            result = job.work => {
                if let Err(err) = result {
                    counter!(METRIC_FAILED, "channel" => channel).increment(1);
                    warn!(
                        target = SOURCE,
                        op = "deliver",
                        result = "error",
                        channel,
                        worker,
                        error = %err,
                        "Notification delivery failed"
                    );
                }
            }
        }
    }
}

async fn abandoned(signal: &mut Signal) {
    loop {
        if matches!(*signal.borrow_and_update(), Some(ShutdownMode::Abandon)) {
            return;
        }
        if signal.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Optional delivery channels; any may be absent.
#[derive(Default, Clone)]
pub struct NotificationChannels {
    pub email: Option<Arc<dyn EmailDispatcher>>,
    pub push: Option<Arc<dyn PushChannel>>,
    pub in_app: Option<Arc<dyn InAppNotifier>>,
    pub preferences: Option<Arc<dyn NotificationPreferences>>,
}

pub struct NotificationDispatcher {
    settings: Arc<dyn SettingsSource>,
    users: Arc<dyn UsersRepo>,
    channels: NotificationChannels,
    queue: Arc<NotificationQueue>,
}

impl NotificationDispatcher {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        users: Arc<dyn UsersRepo>,
        channels: NotificationChannels,
        queue: Arc<NotificationQueue>,
    ) -> Self {
        Self {
            settings,
            users,
            channels,
            queue,
        }
    }

    /// Queue every applicable channel for `comment`. Unpublished comments
    /// are ignored.
    pub async fn dispatch(&self, comment: &CommentRecord, parent: Option<&CommentRecord>) {
        if !comment.status.is_published() {
            return;
        }
        let settings = NotificationSettings::load(self.settings.as_ref()).await;

        if settings.email_enabled
            && let Some(email) = &self.channels.email
        {
            let email = Arc::clone(email);
            let id = comment.id;
            self.queue.submit(NotificationJob::new("email", async move {
                email.dispatch_comment_email(id).await?;
                Ok(())
            }));
        }

        if settings.push_enabled
            && let Some(push) = &self.channels.push
        {
            self.queue_push(Arc::clone(push), &settings, comment, parent);
        }

        if let Some(in_app) = &self.channels.in_app {
            self.queue_in_app(in_app, &settings, comment, parent);
        }
    }

    fn queue_push(
        &self,
        push: Arc<dyn PushChannel>,
        settings: &NotificationSettings,
        comment: &CommentRecord,
        parent: Option<&CommentRecord>,
    ) {
        // The push device belongs to the configured admin; never echo their own comments.
        if settings.is_admin_email(comment.email.as_deref()) {
            debug!(
                target = SOURCE,
                op = "push",
                result = "self_suppressed",
                comment_id = comment.id,
                "Commenter owns the push device"
            );
            return;
        }

        let to_admin = settings.notify_admin
            && !comment.is_admin_author
            && !parent.is_some_and(|p| p.is_admin_author);
        let to_parent = settings.notify_reply
            && parent.is_some_and(|p| p.has_email() && !p.email_eq(comment.email.as_deref()));

        if to_admin {
            let users = Arc::clone(&self.users);
            let preferences = self.channels.preferences.clone();
            let admin_email = settings.admin_email.clone();
            let push = Arc::clone(&push);
            let comment = comment.clone();
            self.queue.submit(NotificationJob::new("push", async move {
                let admin = find_admin(users.as_ref(), admin_email.as_deref()).await?;
                let allowed = match (admin, &preferences) {
                    (Some(admin_id), Some(preferences)) => {
                        preferences.allows_comment_notifications(admin_id).await?
                    }
                    _ => true,
                };
                if allowed {
                    push.send_comment_notification(&comment, None).await?;
                }
                Ok(())
            }));
        }

        if to_parent && let Some(parent) = parent {
            let preferences = self.channels.preferences.clone();
            let comment = comment.clone();
            let parent = parent.clone();
            self.queue.submit(NotificationJob::new("push", async move {
                let allowed = match (parent.user_id, &preferences) {
                    (Some(user_id), Some(preferences)) => {
                        preferences.allows_comment_notifications(user_id).await?
                    }
                    _ => parent.allow_notification,
                };
                if allowed {
                    push.send_comment_notification(&comment, Some(&parent)).await?;
                }
                Ok(())
            }));
        }
    }

    fn queue_in_app(
        &self,
        in_app: &Arc<dyn InAppNotifier>,
        settings: &NotificationSettings,
        comment: &CommentRecord,
        parent: Option<&CommentRecord>,
    ) {
        let replying_to_admin = parent.is_some_and(|p| p.is_admin_author);
        if !comment.is_admin_author
            && !replying_to_admin
            && !settings.is_admin_email(comment.email.as_deref())
        {
            let in_app = Arc::clone(in_app);
            let comment = comment.clone();
            self.queue.submit(NotificationJob::new("in_app", async move {
                in_app.notify_admin(&comment).await?;
                Ok(())
            }));
        }

        if let Some(parent) = parent
            && parent.has_email()
            && !parent.email_eq(comment.email.as_deref())
        {
            let in_app = Arc::clone(in_app);
            let comment = comment.clone();
            let parent = parent.clone();
            self.queue.submit(NotificationJob::new("in_app", async move {
                in_app.notify_reply(&comment, &parent).await?;
                Ok(())
            }));
        }
    }
}

/// The administrator owning `admin_email`, or the first administrator.
async fn find_admin(
    users: &dyn UsersRepo,
    admin_email: Option<&str>,
) -> Result<Option<u64>, NotifyError> {
    let admins = users.list_by_group(ADMIN_GROUP_ID).await?;
    let matched = admin_email.and_then(|email| admins.iter().find(|a| a.email_matches(email)));
    Ok(matched.or_else(|| admins.first()).map(|admin| admin.id))
}
