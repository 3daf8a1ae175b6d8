//! Join/leave handling for live recruitments.
//!
//! The roster change is the primary effect; voice permissions and the
//! announcement re-render follow as best-effort steps that never undo it.

use serde::Serialize;
use tracing::{info, warn};

use super::announcement::AnnouncementSync;
use super::RecruitContext;
use crate::error::{RecruitError, RecruitResult};
use crate::platform::{ChannelId, UserId};
use crate::session::{Session, SessionPhase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Joined {
    pub participants: Vec<UserId>,
    pub remaining_slots: usize,
    pub full: bool,
    /// Set when the roster changed but voice access could not be granted.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Left {
    pub participants: Vec<UserId>,
    pub remaining_slots: usize,
    pub warning: Option<String>,
}

fn require_active(session: &Session) -> RecruitResult<()> {
    if session.phase == SessionPhase::Active {
        Ok(())
    } else {
        Err(RecruitError::SessionExpired)
    }
}

#[derive(Clone)]
pub struct ParticipantRegistry {
    ctx: RecruitContext,
    sync: AnnouncementSync,
}

impl ParticipantRegistry {
    pub fn new(ctx: RecruitContext, sync: AnnouncementSync) -> Self {
        Self { ctx, sync }
    }

    pub async fn join(&self, initiator: UserId, user: UserId) -> RecruitResult<Joined> {
        let (session, voice_channel) = self
            .ctx
            .store
            .update(initiator, |s| {
                require_active(s)?;
                s.add_participant(user)?;
                Ok((s.clone(), s.voice_channel))
            })
            .await?;
        info!(
            initiator = %initiator,
            user = %user,
            remaining = session.remaining_slots(),
            "participant joined"
        );

        let warning = match voice_channel {
            Some(channel) => self.grant(channel, user).await,
            None => None,
        };
        self.refresh(initiator).await;

        Ok(Joined {
            remaining_slots: session.remaining_slots(),
            full: session.is_full(),
            participants: session.participants,
            warning,
        })
    }

    pub async fn leave(&self, initiator: UserId, user: UserId) -> RecruitResult<Left> {
        let (session, voice_channel) = self
            .ctx
            .store
            .update(initiator, |s| {
                require_active(s)?;
                s.remove_participant(user)?;
                Ok((s.clone(), s.voice_channel))
            })
            .await?;
        info!(
            initiator = %initiator,
            user = %user,
            remaining = session.remaining_slots(),
            "participant left"
        );

        let warning = match voice_channel {
            Some(channel) => self.revoke(channel, user).await,
            None => None,
        };
        self.refresh(initiator).await;

        Ok(Left {
            remaining_slots: session.remaining_slots(),
            participants: session.participants,
            warning,
        })
    }

    async fn grant(&self, channel: ChannelId, user: UserId) -> Option<String> {
        match self.ctx.platform.grant_voice_access(channel, user).await {
            Ok(()) => None,
            Err(e) => {
                warn!(channel = %channel, user = %user, "failed to grant voice access: {}", e);
                Some(
                    "You joined the recruitment, but voice channel access could not be granted. Ask the organiser to let you in."
                        .to_string(),
                )
            }
        }
    }

    async fn revoke(&self, channel: ChannelId, user: UserId) -> Option<String> {
        match self.ctx.platform.revoke_voice_access(channel, user).await {
            Ok(()) => None,
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(channel = %channel, user = %user, "failed to revoke voice access: {}", e);
                Some("You left the recruitment, but your voice channel access could not be removed.".to_string())
            }
        }
    }

    async fn refresh(&self, initiator: UserId) {
        if let Err(e) = self.sync.refresh(initiator).await {
            warn!(initiator = %initiator, "announcement re-render failed: {}", e);
        }
    }
}
