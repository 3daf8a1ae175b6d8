//! The four-step recruitment wizard.
//!
//! Steps run in order: mode, party size, target tags, title. Each handler
//! re-reads the session, validates against the configured option set before
//! touching it, then answers with the next step's selector. A step may be
//! answered again (the field is overwritten), but never before the previous
//! one and never after the title has been submitted.

use tracing::{debug, info};

use super::provisioner::ResourceProvisioner;
use super::RecruitContext;
use crate::error::{RecruitError, RecruitResult};
use crate::platform::{RoleId, UserId};
use crate::session::{GameMode, PartySize, Session, SessionPhase, TaskKind};
use crate::ui::{ButtonStyle, Component, ControlId, Reply, SelectOption, TitleModal};

/// Gate a step: its predecessor must be answered and the wizard still open.
fn require_step(session: &Session, step: SessionPhase) -> RecruitResult<()> {
    if !session.phase.in_wizard() {
        return Err(RecruitError::validation(
            "this recruitment has already been submitted",
        ));
    }
    if session.phase < step {
        return Err(RecruitError::validation(
            "please answer the previous step first",
        ));
    }
    Ok(())
}

fn advance(session: &mut Session, next: SessionPhase) {
    session.phase = session.phase.max(next);
}

#[derive(Clone)]
pub struct WizardStateMachine {
    ctx: RecruitContext,
    provisioner: ResourceProvisioner,
}

impl WizardStateMachine {
    pub fn new(ctx: RecruitContext, provisioner: ResourceProvisioner) -> Self {
        Self { ctx, provisioner }
    }

    fn mode_prompt(&self) -> Reply {
        let options = self
            .ctx
            .config
            .recruitment
            .modes
            .iter()
            .map(|m| SelectOption {
                label: m.label().to_string(),
                value: m.as_str().to_string(),
            })
            .collect();
        Reply::ephemeral("**Step 1/4:** Which mode are you playing?")
            .with_component(Component::select(ControlId::Mode, "Choose a mode", options))
    }

    fn party_prompt(&self) -> Reply {
        let options = self
            .ctx
            .config
            .recruitment
            .party_sizes
            .iter()
            .map(|p| SelectOption {
                label: p.label.clone(),
                value: p.recruit.to_string(),
            })
            .collect();
        Reply::ephemeral("**Step 2/4:** How many people are you looking for?").with_component(
            Component::select(ControlId::PartySize, "Choose a party size", options),
        )
    }

    fn tags_prompt(&self) -> Reply {
        let tags = &self.ctx.config.recruitment.target_tags;
        let options = tags
            .iter()
            .map(|t| SelectOption {
                label: t.label.clone(),
                value: t.role_id.to_string(),
            })
            .collect();
        Reply::ephemeral("**Step 3/4:** Who should see this recruitment?").with_component(
            Component::multi_select(ControlId::Tags, "Choose target roles", options, tags.len()),
        )
    }

    fn title_prompt(&self) -> Reply {
        Reply::ephemeral("**Step 4/4:** Give your recruitment a title.").with_component(
            Component::button(ControlId::Title, "📝 Enter title", ButtonStyle::Primary),
        )
    }

    pub async fn start(&self, user: UserId) -> RecruitResult<Reply> {
        let session = self.ctx.store.try_create(user).await?;
        info!(initiator = %user, session = %session.id, "recruitment wizard started");
        Ok(self.mode_prompt())
    }

    pub async fn select_mode(&self, user: UserId, value: &str) -> RecruitResult<Reply> {
        let mode: GameMode = value.parse().map_err(RecruitError::Validation)?;
        if !self.ctx.config.recruitment.modes.contains(&mode) {
            return Err(RecruitError::validation(format!(
                "mode '{mode}' is not offered"
            )));
        }

        self.ctx
            .store
            .update(user, |s| {
                require_step(s, SessionPhase::AwaitingMode)?;
                s.mode = Some(mode);
                advance(s, SessionPhase::AwaitingPartySize);
                Ok(())
            })
            .await?;
        debug!(initiator = %user, mode = mode.as_str(), "mode selected");
        Ok(self.party_prompt())
    }

    pub async fn select_party_size(&self, user: UserId, value: &str) -> RecruitResult<Reply> {
        let size: PartySize = value.parse().map_err(RecruitError::Validation)?;
        if !self.ctx.config.recruitment.offers_party_size(size) {
            return Err(RecruitError::validation(format!(
                "party size {} is not offered",
                size.get()
            )));
        }

        self.ctx
            .store
            .update(user, |s| {
                require_step(s, SessionPhase::AwaitingPartySize)?;
                s.people_to_recruit = Some(size);
                advance(s, SessionPhase::AwaitingTags);
                Ok(())
            })
            .await?;
        debug!(initiator = %user, recruit = size.get(), "party size selected");
        Ok(self.tags_prompt())
    }

    pub async fn select_tags(&self, user: UserId, values: &[String]) -> RecruitResult<Reply> {
        if values.is_empty() {
            return Err(RecruitError::validation("pick at least one role"));
        }
        let mut tags: Vec<RoleId> = Vec::with_capacity(values.len());
        for value in values {
            let role: RoleId = value
                .parse()
                .map_err(|_| RecruitError::validation(format!("'{value}' is not a role")))?;
            if self.ctx.config.recruitment.tag(role).is_none() {
                return Err(RecruitError::validation(format!(
                    "role {role} is not a recruitment target"
                )));
            }
            if !tags.contains(&role) {
                tags.push(role);
            }
        }

        let count = tags.len();
        self.ctx
            .store
            .update(user, |s| {
                require_step(s, SessionPhase::AwaitingTags)?;
                s.target_tags = tags;
                advance(s, SessionPhase::AwaitingTitle);
                Ok(())
            })
            .await?;
        debug!(initiator = %user, tags = count, "target tags selected");
        Ok(self.title_prompt())
    }

    /// Open the title dialog.
    pub async fn request_title(&self, user: UserId) -> RecruitResult<Reply> {
        let session = self.ctx.store.get(user).await?;
        require_step(&session, SessionPhase::AwaitingTitle)?;
        Ok(Reply::modal(TitleModal::new(
            self.ctx.config.recruitment.title_max_len,
        )))
    }

    /// Record the title and hand off to provisioning.
    ///
    /// Returns as soon as the provisioning task is spawned; its result is
    /// delivered through `followup_token`.
    pub async fn submit_title(
        &self,
        user: UserId,
        title: &str,
        followup_token: Option<String>,
    ) -> RecruitResult<Reply> {
        let title = title.trim();
        let max_len = self.ctx.config.recruitment.title_max_len;
        if title.is_empty() {
            return Err(RecruitError::validation("the title cannot be empty"));
        }
        if title.chars().count() > max_len {
            return Err(RecruitError::validation(format!(
                "the title must be at most {max_len} characters"
            )));
        }

        let sequence = self.ctx.store.len().await;
        let id = self
            .ctx
            .store
            .update(user, |s| {
                require_step(s, SessionPhase::AwaitingTitle)?;
                if s.mode.is_none() || s.people_to_recruit.is_none() || s.target_tags.is_empty() {
                    return Err(RecruitError::validation(
                        "please answer the previous step first",
                    ));
                }
                s.title = Some(title.to_string());
                s.followup_token = followup_token;
                s.sequence = sequence;
                s.phase = SessionPhase::Provisioning;
                Ok(s.id)
            })
            .await?;
        info!(initiator = %user, sequence, "title submitted; provisioning");

        let provisioner = self.provisioner.clone();
        self.ctx
            .store
            .spawn_task(user, id, TaskKind::Provisioning, "provisioning", move |token| {
                provisioner.run(user, id, token)
            })
            .await?;

        Ok(Reply::ephemeral(
            "Got it! Setting up your voice channel and announcement...",
        ))
    }
}
