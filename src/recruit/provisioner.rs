//! Creates the voice channel and announcement for a completed wizard.
//!
//! Runs as a supervised task owned by the session. Cancellation is checked
//! between platform calls, never in the middle of one, so every created
//! resource is either recorded on the live session (and left for teardown)
//! or removed here before returning.

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::announcement::{close_announcement, render_open, Closure};
use super::teardown::TeardownCoordinator;
use super::watcher::LifecycleWatcher;
use super::RecruitContext;
use crate::error::{PlatformError, ProvisionError, RecruitError};
use crate::platform::{ChannelId, MessageRef, UserId, VoiceChannelSpec};
use crate::session::{Session, SessionPhase, TaskKind};
use crate::ui::Reply;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    pub voice_channel: ChannelId,
    pub announcement: MessageRef,
}

#[derive(Clone)]
pub struct ResourceProvisioner {
    ctx: RecruitContext,
    teardown: TeardownCoordinator,
}

/// Deterministic, cosmetic voice channel name.
pub fn voice_channel_name(session: &Session) -> String {
    let mode = session.mode.map(|m| m.as_str()).unwrap_or("open");
    format!("🎮-recruit-{}-{}", session.sequence, mode)
}

/// Reject changes to a session that teardown has claimed, or that replaced
/// the one being provisioned.
fn ensure_live(session: &Session, id: Uuid) -> Result<(), RecruitError> {
    if session.id != id || session.phase == SessionPhase::Closing {
        Err(RecruitError::SessionExpired)
    } else {
        Ok(())
    }
}

impl ResourceProvisioner {
    pub fn new(ctx: RecruitContext, teardown: TeardownCoordinator) -> Self {
        Self { ctx, teardown }
    }

    /// Task body: provision session `id`, report the result to the organiser,
    /// and on failure remove that session.
    pub async fn run(self, initiator: UserId, id: Uuid, token: CancellationToken) {
        let followup = self
            .ctx
            .store
            .get_by_id(initiator, id)
            .await
            .ok()
            .and_then(|s| s.followup_token);

        let reply = match self.provision(initiator, id, &token).await {
            Ok(provisioned) => {
                info!(
                    initiator = %initiator,
                    channel = %provisioned.voice_channel,
                    message = %provisioned.announcement.message,
                    "recruitment provisioned"
                );
                Reply::ephemeral(format!(
                    "Your recruitment is live in {}!",
                    provisioned.announcement.channel.mention()
                ))
            }
            Err(ProvisionError::Cancelled) => {
                info!(initiator = %initiator, "provisioning cancelled");
                Reply::ephemeral(ProvisionError::Cancelled.user_message())
            }
            Err(e) => {
                error!(initiator = %initiator, "provisioning failed: {}", e);
                if self.ctx.store.remove_by_id(initiator, id).await.is_none() {
                    info!(initiator = %initiator, "session already gone after failed provisioning");
                }
                Reply::ephemeral(e.user_message())
            }
        };

        if let Some(token) = followup {
            if let Err(e) = self.ctx.platform.send_followup(&token, &reply).await {
                warn!(initiator = %initiator, "could not deliver provisioning result: {}", e);
            }
        }
    }

    pub async fn provision(
        &self,
        initiator: UserId,
        id: Uuid,
        token: &CancellationToken,
    ) -> Result<Provisioned, ProvisionError> {
        let session = self
            .ctx
            .store
            .get_by_id(initiator, id)
            .await
            .map_err(|_| ProvisionError::Cancelled)?;
        if session.phase == SessionPhase::Closing {
            return Err(ProvisionError::Cancelled);
        }
        if !session.wizard_complete() {
            return Err(ProvisionError::ResourceCreateFailed(
                "wizard answers are incomplete".to_string(),
            ));
        }
        let discord = &self.ctx.config.discord;

        match self
            .ctx
            .platform
            .resolve_category(discord.voice_category_id)
            .await
        {
            Ok(()) => {}
            Err(PlatformError::NotFound) => {
                error!(category = %discord.voice_category_id, "voice category not found");
                return Err(ProvisionError::CategoryNotFound);
            }
            Err(e) => return Err(ProvisionError::ResourceCreateFailed(e.to_string())),
        }

        if token.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let spec = VoiceChannelSpec {
            name: voice_channel_name(&session),
            category: discord.voice_category_id,
            owner: initiator,
        };
        let voice_channel = self
            .ctx
            .platform
            .create_voice_channel(&spec)
            .await
            .map_err(|e| ProvisionError::ResourceCreateFailed(e.to_string()))?;
        info!(initiator = %initiator, channel = %voice_channel, name = %spec.name, "voice channel created");

        // From here on the channel is recorded on the session, so teardown
        // owns it if we get cancelled.
        let recorded = self
            .ctx
            .store
            .update(initiator, |s| {
                ensure_live(s, id)?;
                s.voice_channel = Some(voice_channel);
                s.participants = vec![initiator];
                Ok(s.clone())
            })
            .await;
        let session = match recorded {
            Ok(session) => session,
            Err(_) => {
                self.delete_voice_channel(voice_channel).await;
                return Err(ProvisionError::Cancelled);
            }
        };

        if token.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let announcement_channel = discord.announcement_channel_id;
        let message = match self
            .ctx
            .platform
            .send_announcement(announcement_channel, &render_open(&session))
            .await
        {
            Ok(message) => message,
            Err(e) => {
                self.delete_voice_channel(voice_channel).await;
                let cleared = self
                    .ctx
                    .store
                    .update(initiator, |s| {
                        if s.id != id {
                            return Err(RecruitError::SessionExpired);
                        }
                        s.voice_channel = None;
                        Ok(())
                    })
                    .await;
                if let Err(e) = cleared {
                    warn!(initiator = %initiator, "could not clear the deleted voice channel: {}", e);
                }
                return Err(ProvisionError::AnnouncementPostFailed(e.to_string()));
            }
        };
        let announcement = MessageRef {
            channel: announcement_channel,
            message,
        };

        let activated = self
            .ctx
            .store
            .update(initiator, |s| {
                ensure_live(s, id)?;
                s.announcement = Some(announcement);
                s.phase = SessionPhase::Active;
                Ok(())
            })
            .await;
        if activated.is_err() {
            // Torn down while posting: teardown saw no announcement to close.
            if let Err(e) = close_announcement(&self.ctx, announcement, Closure::Ended).await {
                warn!(message = %message, "failed to close unowned announcement: {}", e);
            }
            if self.ctx.store.get_by_id(initiator, id).await.is_err() {
                self.delete_voice_channel(voice_channel).await;
            }
            return Err(ProvisionError::Cancelled);
        }

        if token.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }

        let watcher = LifecycleWatcher::new(
            self.ctx.clone(),
            self.teardown.clone(),
            initiator,
            voice_channel,
            Some(announcement),
        );
        let started = self
            .ctx
            .store
            .spawn_task(initiator, id, TaskKind::Watcher, "watcher", move |token| async move {
                watcher.run(token).await;
            })
            .await;
        if started.is_err() {
            warn!(initiator = %initiator, "session ended before the watcher could start");
        }

        Ok(Provisioned {
            voice_channel,
            announcement,
        })
    }

    async fn delete_voice_channel(&self, channel: ChannelId) {
        match self.ctx.platform.delete_channel(channel).await {
            Ok(()) | Err(PlatformError::NotFound) => {
                info!(channel = %channel, "removed voice channel after failed provisioning")
            }
            Err(e) => error!(channel = %channel, "failed to remove voice channel: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TargetTag};
    use crate::platform::memory::FailureFlags;
    use crate::platform::{InMemoryPlatform, RoleId};
    use crate::session::{GameMode, PartySize, SessionStore};
    use std::sync::Arc;

    const CATEGORY: ChannelId = ChannelId(1);
    const POSTS: ChannelId = ChannelId(2);
    const ORGANISER: UserId = UserId(10);

    fn config() -> Config {
        let mut config = Config::default();
        config.discord.voice_category_id = CATEGORY;
        config.discord.announcement_channel_id = POSTS;
        config.recruitment.target_tags = vec![TargetTag {
            role_id: RoleId(7),
            label: "Anyone".to_string(),
        }];
        config
    }

    async fn ready(platform: &InMemoryPlatform) -> (ResourceProvisioner, Uuid) {
        let ctx = RecruitContext::new(
            SessionStore::new(),
            Arc::new(platform.clone()),
            Arc::new(config()),
        );
        let id = ctx.store.try_create(ORGANISER).await.unwrap().id;
        ctx.store
            .update(ORGANISER, |s| {
                s.mode = Some(GameMode::Competitive);
                s.people_to_recruit = Some(PartySize::try_from(4).unwrap());
                s.target_tags = vec![RoleId(7)];
                s.title = Some("gg".to_string());
                s.sequence = 3;
                s.phase = SessionPhase::Provisioning;
                Ok(())
            })
            .await
            .unwrap();
        (
            ResourceProvisioner::new(ctx.clone(), TeardownCoordinator::new(ctx)),
            id,
        )
    }

    #[tokio::test]
    async fn test_provision_success_activates_session() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        let (provisioner, id) = ready(&platform).await;

        let result = provisioner
            .provision(ORGANISER, id, &CancellationToken::new())
            .await
            .unwrap();

        let session = provisioner.ctx.store.get(ORGANISER).await.unwrap();
        assert_eq!(session.phase, SessionPhase::Active);
        assert_eq!(session.participants, vec![ORGANISER]);
        assert_eq!(session.voice_channel, Some(result.voice_channel));
        assert_eq!(session.announcement, Some(result.announcement));

        let vc = platform.voice_channel(result.voice_channel).unwrap();
        assert_eq!(vc.name, "🎮-recruit-3-competitive");
        assert!(vc.allowed.contains(&ORGANISER));

        let posted = platform.announcement(result.announcement.message).unwrap();
        assert!(posted.description.contains("4 more (5 total"));

        let watcher = provisioner
            .ctx
            .store
            .take_task(ORGANISER, TaskKind::Watcher)
            .await
            .unwrap();
        watcher.cancel_and_wait().await;
    }

    #[tokio::test]
    async fn test_missing_category_fails_and_run_removes_session() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        platform.remove_category(CATEGORY);
        let (provisioner, id) = ready(&platform).await;

        let err = provisioner
            .provision(ORGANISER, id, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::CategoryNotFound));

        let store = provisioner.ctx.store.clone();
        provisioner.run(ORGANISER, id, CancellationToken::new()).await;
        assert!(!store.contains(ORGANISER).await);
    }

    #[tokio::test]
    async fn test_post_failure_deletes_voice_channel() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        platform.set_failures(FailureFlags {
            send_announcement: true,
            ..Default::default()
        });
        let (provisioner, id) = ready(&platform).await;
        let store = provisioner.ctx.store.clone();

        provisioner.run(ORGANISER, id, CancellationToken::new()).await;

        assert!(!store.contains(ORGANISER).await);
        assert!(platform.voice_channels().is_empty());
        assert_eq!(platform.deleted_channels().len(), 1);
    }

    #[tokio::test]
    async fn test_create_failure_removes_session() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        platform.set_failures(FailureFlags {
            create_voice: true,
            ..Default::default()
        });
        let (provisioner, id) = ready(&platform).await;
        let store = provisioner.ctx.store.clone();

        provisioner.run(ORGANISER, id, CancellationToken::new()).await;
        assert!(!store.contains(ORGANISER).await);
        assert!(platform.voice_channels().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_creates_nothing() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        let (provisioner, id) = ready(&platform).await;
        let token = CancellationToken::new();
        token.cancel();

        let err = provisioner.provision(ORGANISER, id, &token).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Cancelled));
        assert!(platform.voice_channels().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_for_claimed_session_spares_the_next_one() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[POSTS]);
        let (provisioner, id) = ready(&platform).await;
        let store = provisioner.ctx.store.clone();

        // Teardown claims the session between the title step and the spawn.
        store
            .update(ORGANISER, |s| {
                s.phase = SessionPhase::Closing;
                Ok(())
            })
            .await
            .unwrap();
        assert!(store
            .take_task(ORGANISER, TaskKind::Provisioning)
            .await
            .is_none());

        let task = provisioner.clone();
        let spawned = store
            .spawn_task(ORGANISER, id, TaskKind::Provisioning, "provisioning", move |token| {
                task.run(ORGANISER, id, token)
            })
            .await;
        assert!(matches!(spawned, Err(RecruitError::SessionExpired)));

        store.remove(ORGANISER).await.unwrap();
        store.try_create(ORGANISER).await.unwrap();

        // Even a stale run that slipped through must leave the new session alone.
        provisioner.run(ORGANISER, id, CancellationToken::new()).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let fresh = store.get(ORGANISER).await.unwrap();
        assert_ne!(fresh.id, id);
        assert_eq!(fresh.phase, SessionPhase::AwaitingMode);
        assert!(platform.voice_channels().is_empty());
    }
}
