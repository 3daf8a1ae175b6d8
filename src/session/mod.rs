//! Recruitment session state.
//!
//! A [`Session`] is created when a user opens the wizard, filled in step by
//! step, provisioned, and finally removed by the teardown coordinator. The
//! [`SessionStore`] is the only place sessions live.

pub mod store;
pub mod task;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{JoinError, LeaveError};
use crate::platform::{ChannelId, MessageRef, RoleId, UserId};

pub use store::{RemovedSession, SessionStore, TaskKind};
pub use task::TaskHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Competitive,
    Casual,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Competitive => "competitive",
            Self::Casual => "casual",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Competitive => "Competitive",
            Self::Casual => "Casual",
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "competitive" => Ok(Self::Competitive),
            "casual" => Ok(Self::Casual),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Number of people to recruit, not counting the initiator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PartySize(u8);

impl PartySize {
    pub const ALLOWED: [u8; 3] = [1, 2, 4];

    pub fn get(self) -> u8 {
        self.0
    }

    /// Party size including the initiator.
    pub fn total(self) -> usize {
        usize::from(self.0) + 1
    }
}

impl TryFrom<u8> for PartySize {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if Self::ALLOWED.contains(&value) {
            Ok(Self(value))
        } else {
            Err(format!("party size {value} is not one of {:?}", Self::ALLOWED))
        }
    }
}

impl From<PartySize> for u8 {
    fn from(size: PartySize) -> Self {
        size.0
    }
}

impl FromStr for PartySize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw: u8 = s
            .trim()
            .parse()
            .map_err(|_| format!("'{s}' is not a number"))?;
        Self::try_from(raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    AwaitingMode,
    AwaitingPartySize,
    AwaitingTags,
    AwaitingTitle,
    Provisioning,
    Active,
    Closing,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingMode => "awaiting_mode",
            Self::AwaitingPartySize => "awaiting_party_size",
            Self::AwaitingTags => "awaiting_tags",
            Self::AwaitingTitle => "awaiting_title",
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Closing => "closing",
        }
    }

    /// Still collecting wizard input.
    pub fn in_wizard(&self) -> bool {
        *self < Self::Provisioning
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub initiator: UserId,
    pub phase: SessionPhase,
    pub mode: Option<GameMode>,
    pub people_to_recruit: Option<PartySize>,
    pub target_tags: Vec<RoleId>,
    pub title: Option<String>,
    pub voice_channel: Option<ChannelId>,
    pub announcement: Option<MessageRef>,
    /// `participants[0]` is the initiator once provisioned.
    pub participants: Vec<UserId>,
    /// Cosmetic running number, taken from the live session count.
    pub sequence: usize,
    #[serde(skip)]
    pub followup_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(initiator: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            initiator,
            phase: SessionPhase::AwaitingMode,
            mode: None,
            people_to_recruit: None,
            target_tags: Vec::new(),
            title: None,
            voice_channel: None,
            announcement: None,
            participants: Vec::new(),
            sequence: 0,
            followup_token: None,
            created_at: Utc::now(),
        }
    }

    pub fn total_party_size(&self) -> Option<usize> {
        self.people_to_recruit.map(PartySize::total)
    }

    pub fn remaining_slots(&self) -> usize {
        self.total_party_size()
            .unwrap_or(0)
            .saturating_sub(self.participants.len())
    }

    pub fn is_full(&self) -> bool {
        self.total_party_size()
            .is_some_and(|total| self.participants.len() >= total)
    }

    /// All four wizard answers are present.
    pub fn wizard_complete(&self) -> bool {
        self.mode.is_some()
            && self.people_to_recruit.is_some()
            && !self.target_tags.is_empty()
            && self.title.is_some()
    }

    pub fn is_provisioned(&self) -> bool {
        self.voice_channel.is_some() && self.announcement.is_some()
    }

    pub fn add_participant(&mut self, user: UserId) -> Result<(), JoinError> {
        if user == self.initiator {
            return Err(JoinError::IsInitiator);
        }
        if self.participants.contains(&user) {
            return Err(JoinError::AlreadyJoined);
        }
        if self.is_full() {
            return Err(JoinError::Full);
        }
        self.participants.push(user);
        Ok(())
    }

    pub fn remove_participant(&mut self, user: UserId) -> Result<(), LeaveError> {
        if user == self.initiator {
            return Err(LeaveError::IsInitiator);
        }
        let position = self
            .participants
            .iter()
            .position(|p| *p == user)
            .ok_or(LeaveError::NotJoined)?;
        self.participants.remove(position);
        Ok(())
    }
}
