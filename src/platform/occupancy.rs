//! Voice occupancy tracked from voice-state events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use super::{ChannelId, UserId};

/// Which users are connected to which voice channel.
///
/// A user is in at most one voice channel, so an update moves them.
#[derive(Clone, Default)]
pub struct OccupancyCache {
    inner: Arc<RwLock<HashMap<UserId, ChannelId>>>,
}

impl OccupancyCache {
    pub fn update(&self, user: UserId, channel: Option<ChannelId>) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match channel {
            Some(channel) => {
                map.insert(user, channel);
            }
            None => {
                map.remove(&user);
            }
        }
    }

    pub fn count(&self, channel: ChannelId) -> usize {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|c| **c == channel).count()
    }

    pub fn members(&self, channel: ChannelId) -> HashSet<UserId> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.iter()
            .filter(|(_, c)| **c == channel)
            .map(|(u, _)| *u)
            .collect()
    }

    /// Forget everyone in a deleted channel.
    pub fn clear_channel(&self, channel: ChannelId) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.retain(|_, c| *c != channel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_moves_between_channels() {
        let cache = OccupancyCache::default();
        cache.update(UserId(1), Some(ChannelId(10)));
        cache.update(UserId(2), Some(ChannelId(10)));
        assert_eq!(cache.count(ChannelId(10)), 2);

        cache.update(UserId(1), Some(ChannelId(20)));
        assert_eq!(cache.count(ChannelId(10)), 1);
        assert_eq!(cache.count(ChannelId(20)), 1);

        cache.update(UserId(2), None);
        assert_eq!(cache.count(ChannelId(10)), 0);
    }

    #[test]
    fn test_clear_channel() {
        let cache = OccupancyCache::default();
        cache.update(UserId(1), Some(ChannelId(10)));
        cache.update(UserId(2), Some(ChannelId(11)));
        cache.clear_channel(ChannelId(10));
        assert!(cache.members(ChannelId(10)).is_empty());
        assert_eq!(cache.members(ChannelId(11)).len(), 1);
    }
}
