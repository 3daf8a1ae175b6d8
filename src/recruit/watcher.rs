//! Background watcher that ends a recruitment once its voice channel
//! stays empty.
//!
//! Polls the occupant count every `poll_interval`. On seeing zero occupants it
//! waits `empty_grace` and checks again: still empty means the session
//! expires, anyone back means normal polling resumes.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::announcement::{close_announcement, Closure};
use super::teardown::{TeardownCause, TeardownCoordinator};
use super::RecruitContext;
use crate::error::PlatformError;
use crate::platform::{ChannelId, MessageRef, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    Cancelled,
    /// The voice channel vanished under us; someone else cleaned up.
    ResourceGone,
    Expired,
}

enum Check {
    Empty,
    Occupied(usize),
    Gone,
    Unknown,
}

#[derive(Clone)]
pub struct LifecycleWatcher {
    ctx: RecruitContext,
    teardown: TeardownCoordinator,
    initiator: UserId,
    voice_channel: ChannelId,
    announcement: Option<MessageRef>,
    poll_interval: Duration,
    empty_grace: Duration,
}

impl LifecycleWatcher {
    pub fn new(
        ctx: RecruitContext,
        teardown: TeardownCoordinator,
        initiator: UserId,
        voice_channel: ChannelId,
        announcement: Option<MessageRef>,
    ) -> Self {
        let poll_interval = ctx.config.watcher.poll_interval();
        let empty_grace = ctx.config.watcher.empty_grace();
        Self {
            ctx,
            teardown,
            initiator,
            voice_channel,
            announcement,
            poll_interval,
            empty_grace,
        }
    }

    async fn check(&self) -> Check {
        match self.ctx.platform.voice_occupants(self.voice_channel).await {
            Ok(0) => Check::Empty,
            Ok(n) => Check::Occupied(n),
            Err(PlatformError::NotFound) => Check::Gone,
            Err(e) => {
                warn!(channel = %self.voice_channel, "occupancy check failed: {}", e);
                Check::Unknown
            }
        }
    }

    /// Sleep unless cancelled first. Returns `false` on cancellation.
    async fn pause(&self, duration: Duration, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub async fn run(self, token: CancellationToken) -> WatchOutcome {
        info!(
            initiator = %self.initiator,
            channel = %self.voice_channel,
            "watching voice channel (poll={}s, grace={}s)",
            self.poll_interval.as_secs(),
            self.empty_grace.as_secs()
        );

        let outcome = self.watch(&token).await;
        match outcome {
            WatchOutcome::Cancelled => {
                debug!(channel = %self.voice_channel, "watcher cancelled")
            }
            WatchOutcome::ResourceGone => {
                info!(channel = %self.voice_channel, "voice channel no longer exists; watcher stopping")
            }
            WatchOutcome::Expired => {
                info!(channel = %self.voice_channel, "watcher finished after expiry")
            }
        }
        outcome
    }

    async fn watch(&self, token: &CancellationToken) -> WatchOutcome {
        loop {
            if token.is_cancelled() {
                return WatchOutcome::Cancelled;
            }

            match self.check().await {
                Check::Gone => return WatchOutcome::ResourceGone,
                Check::Empty => {
                    info!(
                        channel = %self.voice_channel,
                        "voice channel is empty; rechecking in {}s",
                        self.empty_grace.as_secs()
                    );
                    if !self.pause(self.empty_grace, token).await {
                        return WatchOutcome::Cancelled;
                    }
                    match self.check().await {
                        Check::Empty | Check::Gone => {
                            if token.is_cancelled() {
                                return WatchOutcome::Cancelled;
                            }
                            self.expire().await;
                            return WatchOutcome::Expired;
                        }
                        Check::Occupied(n) => {
                            debug!(channel = %self.voice_channel, occupants = n, "voice channel repopulated")
                        }
                        Check::Unknown => {}
                    }
                }
                Check::Occupied(_) | Check::Unknown => {}
            }

            if !self.pause(self.poll_interval, token).await {
                return WatchOutcome::Cancelled;
            }
        }
    }

    async fn expire(&self) {
        info!(
            initiator = %self.initiator,
            channel = %self.voice_channel,
            "voice channel stayed empty; ending recruitment"
        );

        if self.ctx.store.contains(self.initiator).await {
            self.teardown
                .teardown(self.initiator, TeardownCause::VoiceEmpty)
                .await;
            return;
        }

        // The session is gone but our resources were left behind.
        match self.ctx.platform.delete_channel(self.voice_channel).await {
            Ok(()) | Err(PlatformError::NotFound) => {
                info!(channel = %self.voice_channel, "orphaned voice channel removed")
            }
            Err(e) => error!(channel = %self.voice_channel, "failed to delete orphaned voice channel: {}", e),
        }
        if let Some(at) = self.announcement {
            match close_announcement(&self.ctx, at, Closure::Abandoned).await {
                Ok(()) => info!(message = %at.message, "orphaned announcement closed"),
                Err(PlatformError::NotFound) => {
                    warn!(message = %at.message, "orphaned announcement already gone")
                }
                Err(e) => error!(message = %at.message, "failed to close orphaned announcement: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::{InMemoryPlatform, Platform, VoiceChannelSpec};
    use crate::recruit::announcement::render_open;
    use crate::session::{SessionPhase, SessionStore};
    use crate::ui::COLOR_ABANDONED;
    use std::sync::Arc;

    const CATEGORY: ChannelId = ChannelId(1);
    const POSTS: ChannelId = ChannelId(2);
    const ORGANISER: UserId = UserId(10);

    struct Fixture {
        ctx: RecruitContext,
        platform: InMemoryPlatform,
        vc: ChannelId,
        at: MessageRef,
    }

    async fn fixture() -> Fixture {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        let ctx = RecruitContext::new(
            SessionStore::new(),
            Arc::new(platform.clone()),
            Arc::new(Config::default()),
        );
        ctx.store.try_create(ORGANISER).await.unwrap();
        let vc = platform
            .create_voice_channel(&VoiceChannelSpec {
                name: "vc".to_string(),
                category: CATEGORY,
                owner: ORGANISER,
            })
            .await
            .unwrap();
        let session = ctx.store.get(ORGANISER).await.unwrap();
        let message = platform
            .send_announcement(POSTS, &render_open(&session))
            .await
            .unwrap();
        let at = MessageRef {
            channel: POSTS,
            message,
        };
        ctx.store
            .update(ORGANISER, |s| {
                s.voice_channel = Some(vc);
                s.announcement = Some(at);
                s.participants = vec![ORGANISER];
                s.phase = SessionPhase::Active;
                Ok(())
            })
            .await
            .unwrap();
        Fixture {
            ctx,
            platform,
            vc,
            at,
        }
    }

    fn watcher(f: &Fixture) -> LifecycleWatcher {
        LifecycleWatcher::new(
            f.ctx.clone(),
            TeardownCoordinator::new(f.ctx.clone()),
            ORGANISER,
            f.vc,
            Some(f.at),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_through_grace_expires() {
        let f = fixture().await;
        let outcome = watcher(&f).run(CancellationToken::new()).await;

        assert_eq!(outcome, WatchOutcome::Expired);
        assert!(!f.ctx.store.contains(ORGANISER).await);
        assert!(f.platform.voice_channel(f.vc).is_none());
        assert!(f
            .platform
            .announcement(f.at.message)
            .unwrap()
            .title
            .starts_with("[Closed] "));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoin_during_grace_keeps_session() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let task = tokio::spawn(watcher(&f).run(token.clone()));

        // First poll sees the channel empty; someone joins before the recheck.
        tokio::time::sleep(Duration::from_secs(100)).await;
        f.platform.move_user(UserId(20), Some(f.vc));
        tokio::time::sleep(Duration::from_secs(400)).await;

        assert!(f.ctx.store.contains(ORGANISER).await);
        assert!(f.platform.voice_channel(f.vc).is_some());
        assert!(!task.is_finished());

        token.cancel();
        assert_eq!(task.await.unwrap(), WatchOutcome::Cancelled);
        assert!(f.ctx.store.contains(ORGANISER).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_channel_stops_watching() {
        let f = fixture().await;
        f.platform.delete_channel(f.vc).await.unwrap();

        let outcome = watcher(&f).run(CancellationToken::new()).await;
        assert_eq!(outcome, WatchOutcome::ResourceGone);
        assert!(f.ctx.store.contains(ORGANISER).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_orphaned_resources_are_cleaned_directly() {
        let f = fixture().await;
        // Session removed by another path without touching the resources.
        f.ctx.store.remove(ORGANISER).await;

        let outcome = watcher(&f).run(CancellationToken::new()).await;
        assert_eq!(outcome, WatchOutcome::Expired);
        assert!(f.platform.voice_channel(f.vc).is_none());
        let closed = f.platform.announcement(f.at.message).unwrap();
        assert_eq!(closed.color, COLOR_ABANDONED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_grace_does_not_touch_state() {
        let f = fixture().await;
        let token = CancellationToken::new();
        let task = tokio::spawn(watcher(&f).run(token.clone()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        token.cancel();
        assert_eq!(task.await.unwrap(), WatchOutcome::Cancelled);
        assert!(f.ctx.store.contains(ORGANISER).await);
        assert!(f.platform.voice_channel(f.vc).is_some());
    }
}
