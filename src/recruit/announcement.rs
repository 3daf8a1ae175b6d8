//! Announcement rendering and sync.
//!
//! The announcement is always rendered from scratch out of the live session;
//! it is never patched incrementally.

use tracing::{debug, warn};

use super::RecruitContext;
use crate::error::{PlatformError, PlatformResult};
use crate::platform::{MessageRef, UserId};
use crate::session::{Session, SessionPhase};
use crate::ui::{
    Announcement, ButtonStyle, Component, ControlId, EmbedField, COLOR_ABANDONED, COLOR_CLOSED,
    COLOR_OPEN,
};

const CLOSED_PREFIX: &str = "[Closed] ";

/// Why an announcement is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// Regular teardown of a live session.
    Ended,
    /// Teardown driven by the voice channel staying empty.
    VoiceEmptied,
    /// Cleanup of resources whose session was already gone.
    Abandoned,
}

impl Closure {
    fn note(&self) -> &'static str {
        match self {
            Self::Ended => "**This recruitment has ended.**",
            Self::VoiceEmptied | Self::Abandoned => {
                "**This recruitment ended because its voice channel was empty.**"
            }
        }
    }

    fn color(&self) -> u32 {
        match self {
            Self::Ended | Self::VoiceEmptied => COLOR_CLOSED,
            Self::Abandoned => COLOR_ABANDONED,
        }
    }
}

fn participant_field(session: &Session, total: usize) -> EmbedField {
    let value = if session.participants.is_empty() {
        "No participants yet.".to_string()
    } else {
        session
            .participants
            .iter()
            .map(|u| u.mention())
            .collect::<Vec<_>>()
            .join("\n")
    };
    EmbedField {
        name: format!("Participants ({}/{})", session.participants.len(), total),
        value,
    }
}

fn controls(initiator: UserId, full: bool) -> Vec<Component> {
    vec![
        Component::button(ControlId::Join(initiator), "✅ Join", ButtonStyle::Primary)
            .disabled(full),
        Component::button(ControlId::Leave(initiator), "❌ Leave", ButtonStyle::Danger),
        Component::button(ControlId::Stop(initiator), "🚫 Stop", ButtonStyle::Danger),
    ]
}

/// Render the open announcement for a session.
pub fn render_open(session: &Session) -> Announcement {
    let total = session.total_party_size().unwrap_or(0);
    let mentions: Vec<String> = session.target_tags.iter().map(|r| r.mention()).collect();
    let voice = session
        .voice_channel
        .map(|c| c.mention())
        .unwrap_or_else(|| "(pending)".to_string());
    let mode = session.mode.map(|m| m.label()).unwrap_or("-");

    let description = format!(
        "**Mode:** {mode}\n\
         **Looking for:** {remaining} more ({total} total including the organiser)\n\
         **Target:** {targets}\n\
         **Voice channel:** {voice}\n",
        remaining = session.remaining_slots(),
        targets = mentions.join(", "),
    );

    Announcement {
        content: mentions.join(" "),
        title: session.title.clone().unwrap_or_default(),
        description,
        color: COLOR_OPEN,
        fields: vec![participant_field(session, total)],
        controls: controls(session.initiator, session.is_full()),
    }
}

/// Turn a fetched announcement into its terminal form.
///
/// Applying it twice yields the same result.
pub fn render_closed(mut existing: Announcement, closure: Closure) -> Announcement {
    if !existing.title.starts_with(CLOSED_PREFIX) {
        existing.title = format!("{CLOSED_PREFIX}{}", existing.title);
    }
    if !existing.description.contains(closure.note()) {
        existing.description = format!("{}\n\n{}", existing.description.trim_end(), closure.note());
    }
    existing.color = closure.color();
    existing.controls.clear();
    existing
}

/// Fetch an announcement and edit it into its closed form.
///
/// `NotFound` from either call means the message is already gone.
pub async fn close_announcement(
    ctx: &RecruitContext,
    at: MessageRef,
    closure: Closure,
) -> PlatformResult<()> {
    let existing = ctx.platform.fetch_announcement(at).await?;
    let closed = render_closed(existing, closure);
    ctx.platform.edit_announcement(at, &closed).await
}

/// Re-renders a session's announcement from store state.
#[derive(Clone)]
pub struct AnnouncementSync {
    ctx: RecruitContext,
}

impl AnnouncementSync {
    pub fn new(ctx: RecruitContext) -> Self {
        Self { ctx }
    }

    /// Re-render the announcement of `initiator`'s session, if it is live.
    ///
    /// Returns `Ok(false)` when there is nothing to render (session gone or
    /// not active yet).
    pub async fn refresh(&self, initiator: UserId) -> PlatformResult<bool> {
        let Ok(session) = self.ctx.store.get(initiator).await else {
            return Ok(false);
        };
        if session.phase != SessionPhase::Active {
            return Ok(false);
        }
        let Some(at) = session.announcement else {
            return Ok(false);
        };

        let rendered = render_open(&session);
        match self.ctx.platform.edit_announcement(at, &rendered).await {
            Ok(()) => {
                debug!(
                    initiator = %initiator,
                    participants = session.participants.len(),
                    remaining = session.remaining_slots(),
                    "announcement refreshed"
                );
                Ok(true)
            }
            Err(PlatformError::NotFound) => {
                warn!(initiator = %initiator, "announcement message no longer exists");
                Err(PlatformError::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{ChannelId, RoleId};
    use crate::session::{GameMode, PartySize};

    fn session() -> Session {
        let mut session = Session::new(UserId(1));
        session.mode = Some(GameMode::Casual);
        session.people_to_recruit = Some(PartySize::try_from(2).unwrap());
        session.target_tags = vec![RoleId(7), RoleId(8)];
        session.title = Some("test".to_string());
        session.voice_channel = Some(ChannelId(50));
        session.participants = vec![UserId(1)];
        session.phase = SessionPhase::Active;
        session
    }

    #[test]
    fn test_render_open_initial_state() {
        let rendered = render_open(&session());
        assert_eq!(rendered.title, "test");
        assert_eq!(rendered.content, "<@&7> <@&8>");
        assert!(rendered.description.contains("**Mode:** Casual"));
        assert!(rendered.description.contains("2 more (3 total"));
        assert!(rendered.description.contains("<#50>"));
        assert_eq!(rendered.fields[0].name, "Participants (1/3)");
        assert_eq!(rendered.fields[0].value, "<@1>");
        let join = rendered.control(ControlId::Join(UserId(1))).unwrap();
        assert!(!join.is_disabled());
    }

    #[test]
    fn test_render_open_full_disables_join() {
        let mut s = session();
        s.participants.extend([UserId(2), UserId(3)]);
        let rendered = render_open(&s);
        assert!(rendered.description.contains("0 more"));
        assert_eq!(rendered.fields[0].name, "Participants (3/3)");
        assert!(rendered
            .control(ControlId::Join(UserId(1)))
            .unwrap()
            .is_disabled());
        assert!(!rendered
            .control(ControlId::Leave(UserId(1)))
            .unwrap()
            .is_disabled());
    }

    #[test]
    fn test_render_closed_is_idempotent() {
        let open = render_open(&session());
        let once = render_closed(open, Closure::Ended);
        assert!(once.title.starts_with("[Closed] "));
        assert_eq!(once.color, COLOR_CLOSED);
        assert!(once.controls.is_empty());
        assert!(once.description.ends_with("**This recruitment has ended.**"));

        let twice = render_closed(once.clone(), Closure::Ended);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_render_closed_abandoned_uses_red() {
        let closed = render_closed(render_open(&session()), Closure::Abandoned);
        assert_eq!(closed.color, COLOR_ABANDONED);
        assert!(closed.description.contains("voice channel was empty"));
    }
}
