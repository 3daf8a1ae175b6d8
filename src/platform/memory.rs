//! In-process platform.
//!
//! Keeps channels, permission overwrites, messages and voice occupancy in
//! memory. Used by the test suite and by `rallycall serve --dry-run`.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{
    ChannelId, MessageId, MessageRef, OccupancyCache, Platform, PostedMessage, UserId,
    VoiceChannelSpec,
};
use crate::error::{PlatformError, PlatformResult};
use crate::ui::{Announcement, Reply};

#[derive(Debug, Clone)]
pub struct VoiceChannelState {
    pub name: String,
    pub category: ChannelId,
    pub allowed: HashSet<UserId>,
}

#[derive(Debug, Clone)]
enum StoredBody {
    Announcement(Announcement),
    Plain(Reply),
}

#[derive(Debug, Clone)]
struct StoredMessage {
    channel: ChannelId,
    body: StoredBody,
    from_self: bool,
}

/// Failures to inject into the next matching call(s).
#[derive(Debug, Clone, Copy, Default)]
pub struct FailureFlags {
    pub create_voice: bool,
    pub send_announcement: bool,
    pub grant_access: bool,
    pub delete_channel: bool,
    pub edit_announcement: bool,
}

#[derive(Default)]
struct State {
    categories: HashSet<ChannelId>,
    text_channels: HashSet<ChannelId>,
    voice: HashMap<ChannelId, VoiceChannelState>,
    deleted: Vec<ChannelId>,
    messages: HashMap<MessageId, StoredMessage>,
    order: Vec<MessageId>,
    followups: Vec<(String, Reply)>,
    failures: FailureFlags,
}

#[derive(Clone)]
pub struct InMemoryPlatform {
    state: Arc<Mutex<State>>,
    occupancy: OccupancyCache,
    next_id: Arc<AtomicU64>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            occupancy: OccupancyCache::default(),
            next_id: Arc::new(AtomicU64::new(900_000)),
        }
    }
}

impl InMemoryPlatform {
    /// A platform with the given category and text channels already present.
    pub fn with_channels(category: ChannelId, text_channels: &[ChannelId]) -> Self {
        let platform = Self::default();
        {
            let mut state = platform.lock();
            state.categories.insert(category);
            state.text_channels.extend(text_channels.iter().copied());
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_failures(&self, failures: FailureFlags) {
        self.lock().failures = failures;
    }

    pub fn remove_category(&self, category: ChannelId) {
        self.lock().categories.remove(&category);
    }

    /// Simulate a user connecting to (or leaving, with `None`) voice.
    pub fn move_user(&self, user: UserId, channel: Option<ChannelId>) {
        self.occupancy.update(user, channel);
    }

    pub fn voice_channel(&self, channel: ChannelId) -> Option<VoiceChannelState> {
        self.lock().voice.get(&channel).cloned()
    }

    pub fn voice_channels(&self) -> Vec<ChannelId> {
        self.lock().voice.keys().copied().collect()
    }

    pub fn deleted_channels(&self) -> Vec<ChannelId> {
        self.lock().deleted.clone()
    }

    pub fn announcement(&self, message: MessageId) -> Option<Announcement> {
        match self.lock().messages.get(&message).map(|m| &m.body) {
            Some(StoredBody::Announcement(a)) => Some(a.clone()),
            _ => None,
        }
    }

    pub fn message_count(&self, channel: ChannelId) -> usize {
        self.lock()
            .messages
            .values()
            .filter(|m| m.channel == channel)
            .count()
    }

    /// Simulate a message removed by a moderator.
    pub fn delete_message(&self, message: MessageId) {
        let mut state = self.lock();
        state.messages.remove(&message);
        state.order.retain(|id| *id != message);
    }

    pub fn followups(&self) -> Vec<(String, Reply)> {
        self.lock().followups.clone()
    }

    /// Simulate a message posted by someone other than the bot.
    pub fn post_foreign(&self, channel: ChannelId, content: &str) -> MessageId {
        let id = MessageId(self.next_id());
        let mut state = self.lock();
        state.messages.insert(
            id,
            StoredMessage {
                channel,
                body: StoredBody::Plain(Reply::public(content)),
                from_self: false,
            },
        );
        state.order.push(id);
        id
    }

    fn store_message(&self, channel: ChannelId, body: StoredBody) -> PlatformResult<MessageId> {
        let id = MessageId(self.next_id());
        let mut state = self.lock();
        if !state.text_channels.contains(&channel) {
            return Err(PlatformError::NotFound);
        }
        state.messages.insert(
            id,
            StoredMessage {
                channel,
                body,
                from_self: true,
            },
        );
        state.order.push(id);
        Ok(id)
    }
}

fn injected(what: &str) -> PlatformError {
    PlatformError::Rejected {
        status: 500,
        message: format!("injected {what} failure"),
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn resolve_category(&self, category: ChannelId) -> PlatformResult<()> {
        if self.lock().categories.contains(&category) {
            Ok(())
        } else {
            Err(PlatformError::NotFound)
        }
    }

    async fn create_voice_channel(&self, spec: &VoiceChannelSpec) -> PlatformResult<ChannelId> {
        let id = ChannelId(self.next_id());
        let mut state = self.lock();
        if state.failures.create_voice {
            return Err(injected("create voice"));
        }
        if !state.categories.contains(&spec.category) {
            return Err(PlatformError::NotFound);
        }
        state.voice.insert(
            id,
            VoiceChannelState {
                name: spec.name.clone(),
                category: spec.category,
                allowed: HashSet::from([spec.owner]),
            },
        );
        debug!(channel = %id, name = %spec.name, "in-memory voice channel created");
        Ok(id)
    }

    async fn delete_channel(&self, channel: ChannelId) -> PlatformResult<()> {
        let mut state = self.lock();
        if state.failures.delete_channel {
            return Err(injected("delete channel"));
        }
        if state.voice.remove(&channel).is_none() {
            return Err(PlatformError::NotFound);
        }
        state.deleted.push(channel);
        drop(state);
        self.occupancy.clear_channel(channel);
        Ok(())
    }

    async fn grant_voice_access(&self, channel: ChannelId, user: UserId) -> PlatformResult<()> {
        let mut state = self.lock();
        if state.failures.grant_access {
            return Err(injected("grant access"));
        }
        let voice = state.voice.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        voice.allowed.insert(user);
        Ok(())
    }

    async fn revoke_voice_access(&self, channel: ChannelId, user: UserId) -> PlatformResult<()> {
        let mut state = self.lock();
        let voice = state.voice.get_mut(&channel).ok_or(PlatformError::NotFound)?;
        voice.allowed.remove(&user);
        Ok(())
    }

    async fn voice_occupants(&self, channel: ChannelId) -> PlatformResult<usize> {
        if !self.lock().voice.contains_key(&channel) {
            return Err(PlatformError::NotFound);
        }
        Ok(self.occupancy.count(channel))
    }

    async fn send_announcement(
        &self,
        channel: ChannelId,
        announcement: &Announcement,
    ) -> PlatformResult<MessageId> {
        if self.lock().failures.send_announcement {
            return Err(injected("send announcement"));
        }
        self.store_message(channel, StoredBody::Announcement(announcement.clone()))
    }

    async fn edit_announcement(
        &self,
        at: MessageRef,
        announcement: &Announcement,
    ) -> PlatformResult<()> {
        let mut state = self.lock();
        if state.failures.edit_announcement {
            return Err(injected("edit announcement"));
        }
        let stored = state
            .messages
            .get_mut(&at.message)
            .filter(|m| m.channel == at.channel)
            .ok_or(PlatformError::NotFound)?;
        stored.body = StoredBody::Announcement(announcement.clone());
        Ok(())
    }

    async fn fetch_announcement(&self, at: MessageRef) -> PlatformResult<Announcement> {
        let state = self.lock();
        match state.messages.get(&at.message) {
            Some(StoredMessage {
                channel,
                body: StoredBody::Announcement(a),
                ..
            }) if *channel == at.channel => Ok(a.clone()),
            _ => Err(PlatformError::NotFound),
        }
    }

    async fn recent_messages(
        &self,
        channel: ChannelId,
        limit: usize,
    ) -> PlatformResult<Vec<PostedMessage>> {
        let state = self.lock();
        if !state.text_channels.contains(&channel) {
            return Err(PlatformError::NotFound);
        }
        let found = state
            .order
            .iter()
            .rev()
            .filter_map(|id| state.messages.get(id).map(|m| (*id, m)))
            .filter(|(_, m)| m.channel == channel)
            .take(limit)
            .map(|(id, m)| {
                let controls = match &m.body {
                    StoredBody::Announcement(a) => &a.controls,
                    StoredBody::Plain(r) => &r.components,
                };
                PostedMessage {
                    id,
                    from_self: m.from_self,
                    control_ids: controls.iter().map(|c| c.custom_id().to_string()).collect(),
                }
            })
            .collect();
        Ok(found)
    }

    async fn send_message(&self, channel: ChannelId, reply: &Reply) -> PlatformResult<MessageId> {
        self.store_message(channel, StoredBody::Plain(reply.clone()))
    }

    async fn send_followup(&self, token: &str, reply: &Reply) -> PlatformResult<()> {
        self.lock().followups.push((token.to_string(), reply.clone()));
        Ok(())
    }

    fn observe_voice_state(&self, user: UserId, channel: Option<ChannelId>) {
        self.occupancy.update(user, channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATEGORY: ChannelId = ChannelId(1);
    const TEXT: ChannelId = ChannelId(2);

    #[tokio::test]
    async fn test_voice_channel_lifecycle() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[TEXT]);
        let spec = VoiceChannelSpec {
            name: "vc".to_string(),
            category: CATEGORY,
            owner: UserId(5),
        };
        let vc = platform.create_voice_channel(&spec).await.unwrap();
        assert!(platform.voice_channel(vc).unwrap().allowed.contains(&UserId(5)));

        platform.move_user(UserId(5), Some(vc));
        assert_eq!(platform.voice_occupants(vc).await.unwrap(), 1);

        platform.delete_channel(vc).await.unwrap();
        assert!(platform.delete_channel(vc).await.unwrap_err().is_not_found());
        assert!(platform.voice_occupants(vc).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_send_to_unknown_channel_is_not_found() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[TEXT]);
        let err = platform
            .send_message(ChannelId(99), &Reply::public("hi"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_recent_messages_newest_first() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[TEXT]);
        let first = platform.send_message(TEXT, &Reply::public("a")).await.unwrap();
        let second = platform.post_foreign(TEXT, "b");
        let recent = platform.recent_messages(TEXT, 10).await.unwrap();
        assert_eq!(recent[0].id, second);
        assert!(!recent[0].from_self);
        assert_eq!(recent[1].id, first);
        assert!(recent[1].from_self);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let platform = InMemoryPlatform::with_channels(CATEGORY, &[TEXT]);
        platform.set_failures(FailureFlags {
            create_voice: true,
            ..Default::default()
        });
        let spec = VoiceChannelSpec {
            name: "vc".to_string(),
            category: CATEGORY,
            owner: UserId(5),
        };
        assert!(platform.create_voice_channel(&spec).await.is_err());
    }
}
