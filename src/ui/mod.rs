//! Interactive component model.
//!
//! Each control is a distinct variant with its own custom id; the event layer
//! routes on the decoded [`ControlId`] rather than on component instances.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::platform::UserId;

pub const COLOR_OPEN: u32 = 0x2ecc71;
pub const COLOR_CLOSED: u32 = 0x607d8b;
pub const COLOR_ABANDONED: u32 = 0xe74c3c;

const PREFIX: &str = "rally";

/// Decoded custom id of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlId {
    Start,
    Mode,
    PartySize,
    Tags,
    Title,
    TitleModal,
    Join(UserId),
    Leave(UserId),
    Stop(UserId),
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "{PREFIX}:start"),
            Self::Mode => write!(f, "{PREFIX}:mode"),
            Self::PartySize => write!(f, "{PREFIX}:party"),
            Self::Tags => write!(f, "{PREFIX}:tags"),
            Self::Title => write!(f, "{PREFIX}:title"),
            Self::TitleModal => write!(f, "{PREFIX}:title-modal"),
            Self::Join(id) => write!(f, "{PREFIX}:join:{id}"),
            Self::Leave(id) => write!(f, "{PREFIX}:leave:{id}"),
            Self::Stop(id) => write!(f, "{PREFIX}:stop:{id}"),
        }
    }
}

impl FromStr for ControlId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        if parts.next() != Some(PREFIX) {
            return Err(format!("unknown control id: {s}"));
        }
        let kind = parts.next().unwrap_or_default();
        let owner = parts.next();
        let parse_owner = || -> Result<UserId, String> {
            owner
                .ok_or_else(|| format!("control id {s} is missing its initiator"))?
                .parse()
                .map_err(|_| format!("control id {s} has a malformed initiator"))
        };

        match kind {
            "start" => Ok(Self::Start),
            "mode" => Ok(Self::Mode),
            "party" => Ok(Self::PartySize),
            "tags" => Ok(Self::Tags),
            "title" => Ok(Self::Title),
            "title-modal" => Ok(Self::TitleModal),
            "join" => Ok(Self::Join(parse_owner()?)),
            "leave" => Ok(Self::Leave(parse_owner()?)),
            "stop" => Ok(Self::Stop(parse_owner()?)),
            _ => Err(format!("unknown control id: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonStyle {
    Primary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Component {
    Select {
        custom_id: String,
        placeholder: String,
        options: Vec<SelectOption>,
        min_values: u8,
        max_values: u8,
    },
    Button {
        custom_id: String,
        label: String,
        style: ButtonStyle,
        disabled: bool,
    },
}

impl Component {
    pub fn select(id: ControlId, placeholder: &str, options: Vec<SelectOption>) -> Self {
        Self::multi_select(id, placeholder, options, 1)
    }

    pub fn multi_select(
        id: ControlId,
        placeholder: &str,
        options: Vec<SelectOption>,
        max_values: usize,
    ) -> Self {
        Self::Select {
            custom_id: id.to_string(),
            placeholder: placeholder.to_string(),
            max_values: max_values.clamp(1, 25) as u8,
            min_values: 1,
            options,
        }
    }

    pub fn button(id: ControlId, label: &str, style: ButtonStyle) -> Self {
        Self::Button {
            custom_id: id.to_string(),
            label: label.to_string(),
            style,
            disabled: false,
        }
    }

    pub fn custom_id(&self) -> &str {
        match self {
            Self::Select { custom_id, .. } | Self::Button { custom_id, .. } => custom_id,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::Button { disabled: true, .. })
    }

    pub fn disabled(mut self, value: bool) -> Self {
        if let Self::Button { disabled, .. } = &mut self {
            *disabled = value;
        }
        self
    }
}

/// Text-entry dialog for the recruitment title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleModal {
    pub custom_id: String,
    pub title: String,
    pub label: String,
    pub placeholder: String,
    pub max_length: usize,
}

impl TitleModal {
    pub fn new(max_length: usize) -> Self {
        Self {
            custom_id: ControlId::TitleModal.to_string(),
            title: "Recruitment title".to_string(),
            label: "Title".to_string(),
            placeholder: "e.g. chill games, anyone welcome!".to_string(),
            max_length,
        }
    }
}

/// Response to an interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub content: String,
    /// Visible to the requester only.
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Component>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modal: Option<TitleModal>,
}

impl Reply {
    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
            components: Vec::new(),
            modal: None,
        }
    }

    pub fn public(content: impl Into<String>) -> Self {
        Self {
            ephemeral: false,
            ..Self::ephemeral(content)
        }
    }

    pub fn modal(modal: TitleModal) -> Self {
        Self {
            modal: Some(modal),
            ..Self::ephemeral(String::new())
        }
    }

    pub fn with_component(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
}

/// A posted recruitment announcement, as rendered or as fetched back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Message body outside the embed, used for role mentions.
    pub content: String,
    pub title: String,
    pub description: String,
    pub color: u32,
    pub fields: Vec<EmbedField>,
    pub controls: Vec<Component>,
}

impl Announcement {
    pub fn control(&self, id: ControlId) -> Option<&Component> {
        let wanted = id.to_string();
        self.controls.iter().find(|c| c.custom_id() == wanted)
    }
}
