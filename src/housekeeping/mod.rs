//! Periodic upkeep: the persistent start button and announcement drift repair.

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PlatformResult;
use crate::platform::MessageId;
use crate::recruit::{AnnouncementSync, RecruitContext};
use crate::session::SessionPhase;
use crate::ui::{ButtonStyle, Component, ControlId, Reply};

/// How far back the button channel is searched for an existing start button.
pub const START_BUTTON_SCAN_LIMIT: usize = 50;

pub fn start_button() -> Reply {
    Reply::public("🎮 **Looking for teammates?** Press the button below to start a recruitment.")
        .with_component(Component::button(
            ControlId::Start,
            "Start recruiting",
            ButtonStyle::Success,
        ))
}

pub struct Housekeeper {
    ctx: RecruitContext,
    sync: AnnouncementSync,
}

impl Housekeeper {
    pub fn new(ctx: RecruitContext, sync: AnnouncementSync) -> Self {
        Self { ctx, sync }
    }

    /// Make sure the button channel carries our start button.
    ///
    /// Returns the id of a newly posted message, or `None` when one was
    /// already present.
    pub async fn ensure_start_button(&self) -> PlatformResult<Option<MessageId>> {
        let channel = self.ctx.config.discord.button_channel_id;
        let start_id = ControlId::Start.to_string();
        let recent = self
            .ctx
            .platform
            .recent_messages(channel, START_BUTTON_SCAN_LIMIT)
            .await?;

        if let Some(existing) = recent
            .iter()
            .find(|m| m.from_self && m.control_ids.iter().any(|id| *id == start_id))
        {
            debug!(channel = %channel, message = %existing.id, "start button present");
            return Ok(None);
        }

        let id = self.ctx.platform.send_message(channel, &start_button()).await?;
        info!(channel = %channel, message = %id, "posted start button");
        Ok(Some(id))
    }

    /// Re-render every active announcement from store state. Returns how many
    /// were updated.
    pub async fn refresh_announcements(&self) -> usize {
        let mut refreshed = 0;
        for session in self.ctx.store.snapshot().await {
            if session.phase != SessionPhase::Active {
                continue;
            }
            match self.sync.refresh(session.initiator).await {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    initiator = %session.initiator,
                    "could not refresh announcement: {}",
                    e
                ),
            }
        }
        debug!("refreshed {} announcement(s)", refreshed);
        refreshed
    }

    async fn tick(&self) {
        if let Err(e) = self.ensure_start_button().await {
            error!("failed to ensure start button: {}", e);
        }
        self.refresh_announcements().await;
    }

    pub async fn run(self, token: CancellationToken) {
        let period = self.ctx.config.housekeeping.refresh_interval();
        info!("housekeeping every {}s", period.as_secs());

        if let Err(e) = self.ensure_start_button().await {
            error!("failed to ensure start button at startup: {}", e);
        }

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("housekeeping stopped");
                    return;
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::{ChannelId, InMemoryPlatform, MessageRef, Platform, UserId};
    use crate::recruit::announcement::render_open;
    use crate::session::{PartySize, SessionStore};
    use crate::ui::Announcement;
    use std::sync::Arc;
    use std::time::Duration;

    const CATEGORY: ChannelId = ChannelId(1);
    const POSTS: ChannelId = ChannelId(2);
    const BUTTONS: ChannelId = ChannelId(3);

    fn housekeeper() -> (Housekeeper, InMemoryPlatform) {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS, BUTTONS]);
        let mut config = Config::default();
        config.discord.button_channel_id = BUTTONS;
        config.discord.announcement_channel_id = POSTS;
        let ctx = RecruitContext::new(
            SessionStore::new(),
            Arc::new(platform.clone()),
            Arc::new(config),
        );
        (
            Housekeeper::new(ctx.clone(), AnnouncementSync::new(ctx)),
            platform,
        )
    }

    #[tokio::test]
    async fn test_start_button_posted_once() {
        let (hk, platform) = housekeeper();
        assert!(hk.ensure_start_button().await.unwrap().is_some());
        assert!(hk.ensure_start_button().await.unwrap().is_none());
        assert_eq!(platform.message_count(BUTTONS), 1);
    }

    #[tokio::test]
    async fn test_foreign_messages_do_not_count() {
        let (hk, platform) = housekeeper();
        platform.post_foreign(BUTTONS, "hello");
        assert!(hk.ensure_start_button().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_button_buried_past_scan_limit_is_reposted() {
        let (hk, platform) = housekeeper();
        hk.ensure_start_button().await.unwrap();
        for i in 0..START_BUTTON_SCAN_LIMIT {
            platform.post_foreign(BUTTONS, &format!("chatter {i}"));
        }
        assert!(hk.ensure_start_button().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_repairs_drifted_announcement() {
        let (hk, platform) = housekeeper();
        let initiator = UserId(10);
        hk.ctx.store.try_create(initiator).await.unwrap();
        let stale = Announcement {
            content: String::new(),
            title: "stale".to_string(),
            description: String::new(),
            color: 0,
            fields: Vec::new(),
            controls: Vec::new(),
        };
        let message = platform.send_announcement(POSTS, &stale).await.unwrap();
        hk.ctx
            .store
            .update(initiator, |s| {
                s.people_to_recruit = Some(PartySize::try_from(1).unwrap());
                s.title = Some("fresh".to_string());
                s.participants = vec![initiator];
                s.announcement = Some(MessageRef {
                    channel: POSTS,
                    message,
                });
                s.phase = SessionPhase::Active;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(hk.refresh_announcements().await, 1);
        let expected = render_open(&hk.ctx.store.get(initiator).await.unwrap());
        assert_eq!(platform.announcement(message).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_refresh_skips_wizard_sessions() {
        let (hk, _platform) = housekeeper();
        hk.ctx.store.try_create(UserId(10)).await.unwrap();
        assert_eq!(hk.refresh_announcements().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_posts_at_startup_and_stops_on_cancel() {
        let (hk, platform) = housekeeper();
        let token = CancellationToken::new();
        let task = tokio::spawn(hk.run(token.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(platform.message_count(BUTTONS), 1);

        token.cancel();
        task.await.unwrap();
    }
}
