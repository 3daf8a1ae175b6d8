//! Error taxonomy for the recruitment core.
//!
//! Validation and admission errors are reported to the acting user only.
//! `PlatformError::NotFound` means a resource is already gone and callers
//! treat it as a completed cleanup.

use thiserror::Error;

use crate::platform::UserId;

pub type RecruitResult<T> = Result<T, RecruitError>;

#[derive(Debug, Error)]
pub enum RecruitError {
    #[error("no active recruitment session")]
    SessionExpired,

    #[error("invalid selection: {0}")]
    Validation(String),

    #[error("a recruitment session is already active for {0}")]
    AlreadyActive(UserId),

    #[error("this command is restricted to the bot owner")]
    NotOwner,

    #[error("only the initiator can do this")]
    NotInitiator,

    #[error(transparent)]
    Join(#[from] JoinError),

    #[error(transparent)]
    Leave(#[from] LeaveError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

impl RecruitError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Text shown to the acting user in an ephemeral reply.
    pub fn user_message(&self) -> String {
        match self {
            Self::SessionExpired => {
                "This recruitment is no longer active. Press the start button again to begin a new one."
                    .to_string()
            }
            Self::Validation(msg) => format!("That selection is not valid: {msg}"),
            Self::AlreadyActive(_) => {
                "You already have a recruitment in progress. Finish or cancel it first.".to_string()
            }
            Self::NotOwner => "Only the bot owner can run this command.".to_string(),
            Self::NotInitiator => "Only the organiser can stop this recruitment.".to_string(),
            Self::Join(err) => err.user_message().to_string(),
            Self::Leave(err) => err.user_message().to_string(),
            Self::Provision(err) => err.user_message().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JoinError {
    #[error("initiator cannot join their own recruitment")]
    IsInitiator,
    #[error("user already joined")]
    AlreadyJoined,
    #[error("recruitment is full")]
    Full,
}

impl JoinError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::IsInitiator => "You started this recruitment, so you are already in it.",
            Self::AlreadyJoined => "You have already joined this recruitment.",
            Self::Full => "This recruitment is already full.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LeaveError {
    #[error("user has not joined")]
    NotJoined,
    #[error("initiator cannot leave their own recruitment")]
    IsInitiator,
}

impl LeaveError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotJoined => "You have not joined this recruitment.",
            Self::IsInitiator => {
                "The organiser cannot leave. Use the stop button to end the recruitment instead."
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("voice category not found")]
    CategoryNotFound,
    #[error("failed to create voice channel: {0}")]
    ResourceCreateFailed(String),
    #[error("failed to post announcement: {0}")]
    AnnouncementPostFailed(String),
    #[error("provisioning cancelled")]
    Cancelled,
}

impl ProvisionError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::CategoryNotFound => {
                "The voice channel category could not be found. Please ask an admin to check the bot configuration."
            }
            Self::ResourceCreateFailed(_) => {
                "Creating the voice channel failed. Please try again in a moment."
            }
            Self::AnnouncementPostFailed(_) => {
                "Posting the recruitment failed, so the voice channel was removed. Please try again."
            }
            Self::Cancelled => "The recruitment was cancelled before it was posted.",
        }
    }
}

/// Failure talking to the chat platform.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("resource not found")]
    NotFound,

    #[error("platform rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;
