//! Chat platform collaborator.
//!
//! Everything the recruitment core needs from the platform sits behind the
//! [`Platform`] trait. [`DiscordRest`] talks to the real REST API;
//! [`InMemoryPlatform`] keeps everything in process for tests and dry runs.

pub mod discord;
pub mod ids;
pub mod memory;
pub mod occupancy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PlatformResult;
use crate::ui::{Announcement, Reply};

pub use discord::DiscordRest;
pub use ids::{ChannelId, MessageId, RoleId, UserId};
pub use memory::InMemoryPlatform;
pub use occupancy::OccupancyCache;

/// Parameters for a temporary voice channel.
///
/// The channel denies view/connect to everyone and grants
/// connect/view/speak to `owner`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceChannelSpec {
    pub name: String,
    pub category: ChannelId,
    pub owner: UserId,
}

/// Location of a posted announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: ChannelId,
    pub message: MessageId,
}

/// Summary of a message found while scanning channel history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub id: MessageId,
    pub from_self: bool,
    pub control_ids: Vec<String>,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Succeeds if `category` exists and is a channel category.
    async fn resolve_category(&self, category: ChannelId) -> PlatformResult<()>;

    async fn create_voice_channel(&self, spec: &VoiceChannelSpec) -> PlatformResult<ChannelId>;

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()>;

    /// Allow connect/view/speak on `channel` for `user`.
    async fn grant_voice_access(&self, channel: ChannelId, user: UserId) -> PlatformResult<()>;

    /// Deny connect/view/speak on `channel` for `user`.
    async fn revoke_voice_access(&self, channel: ChannelId, user: UserId) -> PlatformResult<()>;

    /// Number of users currently connected. `NotFound` if the channel is gone.
    async fn voice_occupants(&self, channel: ChannelId) -> PlatformResult<usize>;

    async fn send_announcement(
        &self,
        channel: ChannelId,
        announcement: &Announcement,
    ) -> PlatformResult<MessageId>;

    async fn edit_announcement(
        &self,
        at: MessageRef,
        announcement: &Announcement,
    ) -> PlatformResult<()>;

    async fn fetch_announcement(&self, at: MessageRef) -> PlatformResult<Announcement>;

    /// Most recent messages in `channel`, newest first.
    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> PlatformResult<Vec<PostedMessage>>;

    /// Post a plain message with controls (used for the start button).
    async fn send_message(&self, channel: ChannelId, reply: &Reply) -> PlatformResult<MessageId>;

    /// Follow-up to an interaction that was already acknowledged.
    async fn send_followup(&self, token: &str, reply: &Reply) -> PlatformResult<()>;

    /// Feed a voice-state change observed on the gateway.
    fn observe_voice_state(&self, _user: UserId, _channel: Option<ChannelId>) {}
}
