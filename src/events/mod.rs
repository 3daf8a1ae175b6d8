//! Event routing.
//!
//! Every user action arrives as one [`InteractionEvent`] variant and is routed
//! by [`Dispatcher::dispatch`] to the matching recruitment handler. Errors are
//! turned into ephemeral replies for the acting user here and nowhere else.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{RecruitError, RecruitResult};
use crate::platform::{ChannelId, UserId};
use crate::recruit::{Recruiter, TeardownCause, TeardownOutcome};
use crate::session::SessionPhase;
use crate::ui::{ControlId, Reply};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionEvent {
    StartWizard {
        user: UserId,
    },
    ModeSelected {
        user: UserId,
        value: String,
    },
    PartySizeSelected {
        user: UserId,
        value: String,
    },
    TagsSelected {
        user: UserId,
        values: Vec<String>,
    },
    TitleRequested {
        user: UserId,
    },
    TitleSubmitted {
        user: UserId,
        title: String,
        /// Interaction token used to deliver the provisioning result.
        #[serde(default)]
        token: Option<String>,
    },
    Join {
        user: UserId,
        initiator: UserId,
    },
    Leave {
        user: UserId,
        initiator: UserId,
    },
    Stop {
        user: UserId,
        initiator: UserId,
    },
    /// The initiator abandons their own session at any phase.
    Cancel {
        user: UserId,
    },
    ForceStop {
        actor: UserId,
        target: UserId,
    },
    Shutdown {
        actor: UserId,
    },
    Ping,
    VoiceStateUpdate {
        user: UserId,
        channel: Option<ChannelId>,
    },
    /// A raw component interaction, decoded through its custom id.
    Component {
        user: UserId,
        custom_id: String,
        #[serde(default)]
        values: Vec<String>,
        #[serde(default)]
        token: Option<String>,
    },
}

impl InteractionEvent {
    /// Decode a raw component interaction into the event it stands for.
    pub fn from_component(
        user: UserId,
        custom_id: &str,
        values: Vec<String>,
        token: Option<String>,
    ) -> RecruitResult<Self> {
        let control: ControlId = custom_id.parse().map_err(RecruitError::Validation)?;
        let first = || {
            values
                .first()
                .cloned()
                .ok_or_else(|| RecruitError::validation("no value was selected"))
        };

        Ok(match control {
            ControlId::Start => Self::StartWizard { user },
            ControlId::Mode => Self::ModeSelected {
                user,
                value: first()?,
            },
            ControlId::PartySize => Self::PartySizeSelected {
                user,
                value: first()?,
            },
            ControlId::Tags => Self::TagsSelected {
                user,
                values: values.clone(),
            },
            ControlId::Title => Self::TitleRequested { user },
            ControlId::TitleModal => Self::TitleSubmitted {
                user,
                title: first()?,
                token,
            },
            ControlId::Join(initiator) => Self::Join { user, initiator },
            ControlId::Leave(initiator) => Self::Leave { user, initiator },
            ControlId::Stop(initiator) => Self::Stop { user, initiator },
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartWizard { .. } => "start_wizard",
            Self::ModeSelected { .. } => "mode_selected",
            Self::PartySizeSelected { .. } => "party_size_selected",
            Self::TagsSelected { .. } => "tags_selected",
            Self::TitleRequested { .. } => "title_requested",
            Self::TitleSubmitted { .. } => "title_submitted",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Stop { .. } => "stop",
            Self::Cancel { .. } => "cancel",
            Self::ForceStop { .. } => "force_stop",
            Self::Shutdown { .. } => "shutdown",
            Self::Ping => "ping",
            Self::VoiceStateUpdate { .. } => "voice_state_update",
            Self::Component { .. } => "component",
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// `None` for events that need no response, such as voice-state updates.
    pub reply: Option<Reply>,
    /// The service should exit once the reply is delivered.
    pub shutdown: bool,
}

impl Dispatched {
    fn reply(reply: Reply) -> Self {
        Self {
            reply: Some(reply),
            shutdown: false,
        }
    }

    fn silent() -> Self {
        Self {
            reply: None,
            shutdown: false,
        }
    }
}

pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (days, hours, minutes, seconds) =
        (secs / 86_400, (secs / 3600) % 24, (secs / 60) % 60, secs % 60);
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else {
        format!("{minutes}m {seconds}s")
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    recruiter: Recruiter,
    owner: UserId,
    started: Instant,
}

impl Dispatcher {
    pub fn new(recruiter: Recruiter) -> Self {
        let owner = recruiter.ctx.config.discord.owner_id;
        Self {
            recruiter,
            owner,
            started: Instant::now(),
        }
    }

    pub fn recruiter(&self) -> &Recruiter {
        &self.recruiter
    }

    pub async fn dispatch(&self, event: InteractionEvent) -> Dispatched {
        let kind = event.kind();
        debug!(event = kind, "dispatching interaction");
        match self.handle(event).await {
            Ok(dispatched) => dispatched,
            Err(e) => {
                match &e {
                    RecruitError::Provision(_) | RecruitError::NotOwner => {
                        warn!(event = kind, "interaction rejected: {}", e)
                    }
                    _ => debug!(event = kind, "interaction rejected: {}", e),
                }
                Dispatched::reply(Reply::ephemeral(e.user_message()))
            }
        }
    }

    fn require_owner(&self, actor: UserId) -> RecruitResult<()> {
        if actor == self.owner {
            Ok(())
        } else {
            Err(RecruitError::NotOwner)
        }
    }

    async fn handle(&self, event: InteractionEvent) -> RecruitResult<Dispatched> {
        let event = match event {
            InteractionEvent::Component {
                user,
                custom_id,
                values,
                token,
            } => InteractionEvent::from_component(user, &custom_id, values, token)?,
            other => other,
        };

        let r = &self.recruiter;
        let reply = match event {
            InteractionEvent::StartWizard { user } => r.wizard.start(user).await?,
            InteractionEvent::ModeSelected { user, value } => {
                r.wizard.select_mode(user, &value).await?
            }
            InteractionEvent::PartySizeSelected { user, value } => {
                r.wizard.select_party_size(user, &value).await?
            }
            InteractionEvent::TagsSelected { user, values } => {
                r.wizard.select_tags(user, &values).await?
            }
            InteractionEvent::TitleRequested { user } => r.wizard.request_title(user).await?,
            InteractionEvent::TitleSubmitted { user, title, token } => {
                r.wizard.submit_title(user, &title, token).await?
            }
            InteractionEvent::Join { user, initiator } => {
                let joined = r.participants.join(initiator, user).await?;
                let mut text = if joined.full {
                    "You joined! The party is now full.".to_string()
                } else {
                    format!("You joined! {} slot(s) left.", joined.remaining_slots)
                };
                if let Some(warning) = joined.warning {
                    text = format!("{text}\n⚠️ {warning}");
                }
                Reply::ephemeral(text)
            }
            InteractionEvent::Leave { user, initiator } => {
                let left = r.participants.leave(initiator, user).await?;
                let mut text = "You left the recruitment.".to_string();
                if let Some(warning) = left.warning {
                    text = format!("{text}\n⚠️ {warning}");
                }
                Reply::ephemeral(text)
            }
            InteractionEvent::Stop { user, initiator } => {
                if user != initiator {
                    return Err(RecruitError::NotInitiator);
                }
                let session = r.ctx.store.get(initiator).await?;
                if session.phase != SessionPhase::Active {
                    return Err(RecruitError::SessionExpired);
                }
                match r.teardown.teardown(initiator, TeardownCause::OrganiserStop).await {
                    TeardownOutcome::Torn => Reply::ephemeral("Recruitment stopped."),
                    TeardownOutcome::NoOp => return Err(RecruitError::SessionExpired),
                }
            }
            InteractionEvent::Cancel { user } => {
                match r.teardown.teardown(user, TeardownCause::SelfCancel).await {
                    TeardownOutcome::Torn => Reply::ephemeral("Your recruitment was cancelled."),
                    TeardownOutcome::NoOp => return Err(RecruitError::SessionExpired),
                }
            }
            InteractionEvent::ForceStop { actor, target } => {
                self.require_owner(actor)?;
                info!(actor = %actor, target = %target, "force stop requested");
                match r.teardown.teardown(target, TeardownCause::ForceStop).await {
                    TeardownOutcome::Torn => Reply::ephemeral(format!(
                        "Stopped the recruitment of {}.",
                        target.mention()
                    )),
                    TeardownOutcome::NoOp => Reply::ephemeral(format!(
                        "{} has no active recruitment.",
                        target.mention()
                    )),
                }
            }
            InteractionEvent::Shutdown { actor } => {
                self.require_owner(actor)?;
                info!(actor = %actor, "shutdown requested");
                let torn = r.teardown.teardown_all(TeardownCause::Shutdown).await;
                return Ok(Dispatched {
                    reply: Some(Reply::ephemeral(format!(
                        "Closed {torn} recruitment(s). Shutting down."
                    ))),
                    shutdown: true,
                });
            }
            InteractionEvent::Ping => Reply::ephemeral(format!(
                "Pong! Up for {}.",
                format_uptime(self.started.elapsed())
            )),
            InteractionEvent::VoiceStateUpdate { user, channel } => {
                r.ctx.platform.observe_voice_state(user, channel);
                return Ok(Dispatched::silent());
            }
            InteractionEvent::Component { custom_id, .. } => {
                return Err(RecruitError::validation(format!(
                    "control {custom_id} could not be decoded"
                )));
            }
        };
        Ok(Dispatched::reply(reply))
    }
}
