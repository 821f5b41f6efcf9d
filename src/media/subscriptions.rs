//! Event subscription bookkeeping
//!
//! Each registration is one (source, token) row. Rows are removed in reverse
//! registration order so dependent subscriptions go before the ones they
//! depend on.

use log::{debug, warn};

use super::player::{EventSource, EventToken, MediaPlayer, SignalHandler};
use crate::error::{PlaybackError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub source: EventSource,
    pub token: EventToken,
}

#[derive(Debug, Default)]
pub struct SubscriptionTable {
    entries: Vec<Subscription>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `source` and record the token
    ///
    /// A source may only be registered once per table.
    pub fn subscribe<P: MediaPlayer>(
        &mut self,
        player: &P,
        source: EventSource,
        handler: SignalHandler<P>,
    ) -> Result<()> {
        if self.token(source).is_some() {
            return Err(PlaybackError::InvalidArgument(format!(
                "{:?} is already subscribed",
                source
            )));
        }

        let token = player.subscribe(source, handler)?;
        debug!("Subscribed to {:?} (token {})", source, token.0);
        self.entries.push(Subscription { source, token });
        Ok(())
    }

    pub fn token(&self, source: EventSource) -> Option<EventToken> {
        self.entries
            .iter()
            .find(|entry| entry.source == source)
            .map(|entry| entry.token)
    }

    pub fn entries(&self) -> &[Subscription] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every subscription, newest first
    ///
    /// Failures are logged and skipped so one bad token cannot keep the rest
    /// registered. Returns the number removed successfully.
    pub fn unsubscribe_all<P: MediaPlayer>(&mut self, player: &P) -> usize {
        let mut removed = 0;
        while let Some(entry) = self.entries.pop() {
            match player.unsubscribe(entry.source, entry.token) {
                Ok(()) => {
                    debug!("Unsubscribed from {:?} (token {})", entry.source, entry.token.0);
                    removed += 1;
                }
                Err(e) => warn!(
                    "Failed to unsubscribe from {:?} (token {}): {}",
                    entry.source, entry.token.0, e
                ),
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::simulated::{SimulatedMediaLibrary, SimulatedPlayer};
    use std::sync::Arc;

    fn noop_handler() -> SignalHandler<SimulatedPlayer> {
        Arc::new(|_: &SimulatedPlayer, _| Ok(()))
    }

    #[test]
    fn test_distinct_tokens_per_source() {
        let player = SimulatedPlayer::new(SimulatedMediaLibrary::new());
        let mut table = SubscriptionTable::new();
        table
            .subscribe(&player, EventSource::PlaybackStateChanged, noop_handler())
            .unwrap();
        table
            .subscribe(&player, EventSource::PositionChanged, noop_handler())
            .unwrap();

        let state = table.token(EventSource::PlaybackStateChanged).unwrap();
        let position = table.token(EventSource::PositionChanged).unwrap();
        assert_ne!(state, position);
        assert_eq!(player.subscription_count(), 2);
    }

    #[test]
    fn test_duplicate_source_rejected() {
        let player = SimulatedPlayer::new(SimulatedMediaLibrary::new());
        let mut table = SubscriptionTable::new();
        table
            .subscribe(&player, EventSource::MediaOpened, noop_handler())
            .unwrap();
        assert!(table
            .subscribe(&player, EventSource::MediaOpened, noop_handler())
            .is_err());
        assert_eq!(table.len(), 1);
        assert_eq!(player.subscription_count(), 1);
    }

    #[test]
    fn test_unsubscribe_all_reverse_order() {
        let player = SimulatedPlayer::new(SimulatedMediaLibrary::new());
        let mut table = SubscriptionTable::new();
        for source in EventSource::REGISTRATION_ORDER {
            table.subscribe(&player, source, noop_handler()).unwrap();
        }

        assert_eq!(table.unsubscribe_all(&player), 6);
        assert!(table.is_empty());
        assert_eq!(player.subscription_count(), 0);

        let mut expected = EventSource::REGISTRATION_ORDER.to_vec();
        expected.reverse();
        assert_eq!(player.unsubscribe_log(), expected);
    }

    #[test]
    fn test_unsubscribe_all_twice_is_noop() {
        let player = SimulatedPlayer::new(SimulatedMediaLibrary::new());
        let mut table = SubscriptionTable::new();
        table
            .subscribe(&player, EventSource::MediaEnded, noop_handler())
            .unwrap();
        assert_eq!(table.unsubscribe_all(&player), 1);
        assert_eq!(table.unsubscribe_all(&player), 0);
        assert_eq!(player.unsubscribe_log().len(), 1);
    }
}
