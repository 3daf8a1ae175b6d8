//! The single path that ends a recruitment session.
//!
//! Every stop trigger (organiser stop, self-cancel, owner force-stop,
//! shutdown, empty voice channel) lands here. Each step is best-effort and
//! logged on failure; removal from the store always happens last.

use serde::Serialize;
use tracing::{error, info, warn};

use super::announcement::{close_announcement, Closure};
use super::RecruitContext;
use crate::error::{PlatformError, RecruitError};
use crate::platform::UserId;
use crate::session::{SessionPhase, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownCause {
    OrganiserStop,
    SelfCancel,
    ForceStop,
    Shutdown,
    VoiceEmpty,
}

impl TeardownCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrganiserStop => "organiser_stop",
            Self::SelfCancel => "self_cancel",
            Self::ForceStop => "force_stop",
            Self::Shutdown => "shutdown",
            Self::VoiceEmpty => "voice_empty",
        }
    }

    fn closure(&self) -> Closure {
        match self {
            Self::VoiceEmpty => Closure::VoiceEmptied,
            _ => Closure::Ended,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownOutcome {
    Torn,
    /// No live session, or another teardown already claimed it.
    NoOp,
}

#[derive(Clone)]
pub struct TeardownCoordinator {
    ctx: RecruitContext,
}

impl TeardownCoordinator {
    pub fn new(ctx: RecruitContext) -> Self {
        Self { ctx }
    }

    pub async fn teardown(&self, initiator: UserId, cause: TeardownCause) -> TeardownOutcome {
        // Claim the session so a concurrent teardown becomes a no-op and
        // roster handlers stop accepting changes.
        let claimed = self
            .ctx
            .store
            .update(initiator, |s| {
                if s.phase == SessionPhase::Closing {
                    return Err(RecruitError::SessionExpired);
                }
                s.phase = SessionPhase::Closing;
                Ok(s.id)
            })
            .await;
        let Ok(id) = claimed else {
            return TeardownOutcome::NoOp;
        };

        info!(initiator = %initiator, cause = cause.as_str(), "tearing down recruitment");

        if let Some(task) = self.ctx.store.take_task(initiator, TaskKind::Provisioning).await {
            task.cancel_and_wait().await;
        }

        // Taken after provisioning has settled, since provisioning starts the watcher.
        if let Some(task) = self.ctx.store.take_task(initiator, TaskKind::Watcher).await {
            if cause == TeardownCause::VoiceEmpty {
                // The watcher itself is calling us; it exits after this returns.
                drop(task);
            } else {
                task.cancel_and_wait().await;
            }
        }

        // Re-read: provisioning may have recorded (or unwound) resources meanwhile.
        let session = self.ctx.store.get_by_id(initiator, id).await.ok();
        let voice_channel = session.as_ref().and_then(|s| s.voice_channel);
        let announcement = session.as_ref().and_then(|s| s.announcement);

        if let Some(channel) = voice_channel {
            match self.ctx.platform.delete_channel(channel).await {
                Ok(()) => info!(initiator = %initiator, channel = %channel, "voice channel deleted"),
                Err(PlatformError::NotFound) => {
                    info!(channel = %channel, "voice channel already gone")
                }
                Err(e) => error!(channel = %channel, "failed to delete voice channel: {}", e),
            }
        }

        if let Some(at) = announcement {
            match close_announcement(&self.ctx, at, cause.closure()).await {
                Ok(()) => info!(message = %at.message, "announcement closed"),
                Err(PlatformError::NotFound) => {
                    warn!(message = %at.message, "announcement already gone")
                }
                Err(e) => error!(message = %at.message, "failed to close announcement: {}", e),
            }
        }

        match self.ctx.store.remove_by_id(initiator, id).await {
            Some(removed) => {
                // Nothing may outlive the session.
                for task in [removed.provisioning, removed.watcher].into_iter().flatten() {
                    warn!(initiator = %initiator, "{} task was still attached at removal", task.name());
                    task.cancel_and_wait().await;
                }
            }
            // Provisioning failed and removed the session while we waited.
            None => info!(initiator = %initiator, "session already removed during teardown"),
        }

        info!(initiator = %initiator, "recruitment torn down");
        TeardownOutcome::Torn
    }

    /// Tear down every live session, one after another.
    pub async fn teardown_all(&self, cause: TeardownCause) -> usize {
        let initiators = self.ctx.store.initiators().await;
        let mut torn = 0;
        for initiator in initiators {
            if self.teardown(initiator, cause).await == TeardownOutcome::Torn {
                torn += 1;
            }
        }
        info!("tore down {} recruitment session(s)", torn);
        torn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::platform::{ChannelId, InMemoryPlatform, MessageRef, Platform, VoiceChannelSpec};
    use crate::recruit::announcement::render_open;
    use crate::session::{GameMode, PartySize, SessionStore};
    use crate::ui::COLOR_CLOSED;
    use std::sync::Arc;

    const CATEGORY: ChannelId = ChannelId(1);
    const POSTS: ChannelId = ChannelId(2);
    const ORGANISER: UserId = UserId(10);

    async fn provisioned() -> (TeardownCoordinator, InMemoryPlatform, ChannelId, MessageRef) {
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
        let session = ctx
            .store
            .update(ORGANISER, |s| {
                s.mode = Some(GameMode::Casual);
                s.people_to_recruit = Some(PartySize::try_from(1).unwrap());
                s.title = Some("t".to_string());
                s.voice_channel = Some(vc);
                s.participants = vec![ORGANISER];
                s.phase = SessionPhase::Active;
                Ok(s.clone())
            })
            .await
            .unwrap();
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
                s.announcement = Some(at);
                Ok(())
            })
            .await
            .unwrap();

        (TeardownCoordinator::new(ctx), platform, vc, at)
    }

    #[tokio::test]
    async fn test_teardown_then_noop() {
        let (teardown, platform, vc, at) = provisioned().await;

        assert_eq!(
            teardown.teardown(ORGANISER, TeardownCause::OrganiserStop).await,
            TeardownOutcome::Torn
        );
        assert_eq!(
            teardown.teardown(ORGANISER, TeardownCause::OrganiserStop).await,
            TeardownOutcome::NoOp
        );

        assert!(!teardown.ctx.store.contains(ORGANISER).await);
        assert!(platform.voice_channel(vc).is_none());
        let closed = platform.announcement(at.message).unwrap();
        assert!(closed.title.starts_with("[Closed] "));
        assert_eq!(closed.color, COLOR_CLOSED);
        assert!(closed.controls.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_tolerates_missing_resources() {
        let (teardown, platform, vc, at) = provisioned().await;
        platform.delete_channel(vc).await.unwrap();
        platform.delete_message(at.message);

        assert_eq!(
            teardown.teardown(ORGANISER, TeardownCause::ForceStop).await,
            TeardownOutcome::Torn
        );
        assert!(!teardown.ctx.store.contains(ORGANISER).await);
    }

    #[tokio::test]
    async fn test_teardown_removes_session_even_when_steps_fail() {
        let (teardown, platform, _vc, _at) = provisioned().await;
        platform.set_failures(crate::platform::memory::FailureFlags {
            delete_channel: true,
            edit_announcement: true,
            ..Default::default()
        });

        assert_eq!(
            teardown.teardown(ORGANISER, TeardownCause::Shutdown).await,
            TeardownOutcome::Torn
        );
        assert!(!teardown.ctx.store.contains(ORGANISER).await);
    }

    #[tokio::test]
    async fn test_teardown_unknown_initiator_is_noop() {
        let (teardown, _platform, _vc, _at) = provisioned().await;
        assert_eq!(
            teardown.teardown(UserId(999), TeardownCause::SelfCancel).await,
            TeardownOutcome::NoOp
        );
    }

    #[tokio::test]
    async fn test_teardown_all_clears_store() {
        let (teardown, _platform, _vc, _at) = provisioned().await;
        teardown.ctx.store.try_create(UserId(11)).await.unwrap();
        assert_eq!(teardown.teardown_all(TeardownCause::Shutdown).await, 2);
        assert!(teardown.ctx.store.is_empty().await);
    }
}
