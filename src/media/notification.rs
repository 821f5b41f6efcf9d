//! State notification bridge
//!
//! Converts each raw engine callback into exactly one [`NotificationEvent`]
//! and hands it to the host's callback on the calling thread. There is no
//! queue and no coalescing: two engine events produce two deliveries, and two
//! engine threads may deliver at the same time.

use log::{debug, error, warn};
use parking_lot::RwLock;
use std::sync::mpsc;
use std::sync::Arc;

use super::player::{EngineSignal, MediaFailure, MediaPlayer, PlaybackSession};
use super::ticks::Ticks;
use crate::error::{PlaybackError, Result};

/// Transport state reported by the session
#[repr(u16)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    #[default]
    None = 0,
    Opening = 1,
    Buffering = 2,
    Playing = 3,
    Paused = 4,
    Ended = 5,
}

impl PlaybackState {
    /// Unknown values map to `None`
    pub fn from_raw(value: u16) -> Self {
        match value {
            1 => PlaybackState::Opening,
            2 => PlaybackState::Buffering,
            3 => PlaybackState::Playing,
            4 => PlaybackState::Paused,
            5 => PlaybackState::Ended,
            _ => PlaybackState::None,
        }
    }
}

/// Natural properties of a newly opened source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaDescription {
    pub width: u32,
    pub height: u32,
    pub duration: Ticks,
    pub can_seek: bool,
}

/// One notification delivered to the host
///
/// Fully owned; holds no GPU or engine references.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    Opened(MediaDescription),
    StateChanged {
        state: PlaybackState,
        position: Ticks,
    },
    Failed {
        code: i32,
        message: String,
    },
}

impl NotificationEvent {
    pub fn as_error(&self) -> Option<PlaybackError> {
        match self {
            NotificationEvent::Failed { code, message } => Some(PlaybackError::DecoderFailed {
                code: *code,
                message: message.clone(),
            }),
            _ => None,
        }
    }
}

/// Host notification callback
///
/// Must be thread-safe and must not block; it runs on decode engine threads.
pub type StateCallback = Arc<dyn Fn(NotificationEvent) + Send + Sync>;

/// Callback that forwards every event into a channel
pub fn notification_channel() -> (StateCallback, mpsc::Receiver<NotificationEvent>) {
    let (tx, rx) = mpsc::channel();
    let callback: StateCallback = Arc::new(move |event| {
        // Receiver gone means the host stopped listening
        let _ = tx.send(event);
    });
    (callback, rx)
}

pub struct NotificationBridge {
    callback: RwLock<Option<StateCallback>>,
}

impl NotificationBridge {
    pub fn new(callback: StateCallback) -> Self {
        Self {
            callback: RwLock::new(Some(callback)),
        }
    }

    /// Translate a raw engine signal into its notification
    ///
    /// Frame-available carries no notification and yields `None`.
    pub fn translate<P: MediaPlayer>(
        &self,
        player: &P,
        signal: &EngineSignal,
    ) -> Result<Option<NotificationEvent>> {
        let event = match signal {
            EngineSignal::Opened => Some(Self::opened(player.session())?),
            EngineSignal::Ended => Some(NotificationEvent::StateChanged {
                state: PlaybackState::Ended,
                position: Ticks::ZERO,
            }),
            EngineSignal::Failed(failure) => Some(Self::failed(failure)),
            EngineSignal::FrameAvailable => None,
            EngineSignal::StateChanged | EngineSignal::PositionChanged => {
                Some(Self::session_changed(player.session())?)
            }
        };
        Ok(event)
    }

    /// Translate and deliver in one step
    pub fn dispatch<P: MediaPlayer>(&self, player: &P, signal: &EngineSignal) -> Result<()> {
        match self.translate(player, signal) {
            Ok(Some(event)) => {
                self.deliver(event);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!("Failed to read payload for {:?}: {}", signal.source(), e);
                Err(e)
            }
        }
    }

    /// Invoke the host callback, unless the bridge was disconnected
    pub fn deliver(&self, event: NotificationEvent) {
        // Clone out so the host runs without the lock held
        let callback = self.callback.read().clone();
        match callback {
            Some(callback) => {
                debug!("Delivering {:?}", event);
                callback(event);
            }
            None => debug!("Dropping {:?}, bridge disconnected", event),
        }
    }

    /// Stop delivering; later engine events are dropped
    pub fn disconnect(&self) {
        self.callback.write().take();
    }

    pub fn is_connected(&self) -> bool {
        self.callback.read().is_some()
    }

    fn opened<S: PlaybackSession>(session: &S) -> Result<NotificationEvent> {
        let (width, height) = session.natural_video_size()?;
        let can_seek = session.can_seek()?;
        let duration = session.natural_duration()?;
        Ok(NotificationEvent::Opened(MediaDescription {
            width,
            height,
            duration,
            can_seek,
        }))
    }

    fn failed(failure: &MediaFailure) -> NotificationEvent {
        warn!(
            "Media failed (0x{:08X}): {}",
            failure.code, failure.message
        );
        NotificationEvent::Failed {
            code: failure.code,
            message: failure.message.clone(),
        }
    }

    fn session_changed<S: PlaybackSession>(session: &S) -> Result<NotificationEvent> {
        let position = session.position()?;
        let state = session.playback_state()?;
        Ok(NotificationEvent::StateChanged { state, position })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::simulated::{SimulatedMedia, SimulatedMediaLibrary, SimulatedPlayer};

    fn opened_player() -> SimulatedPlayer {
        let library = SimulatedMediaLibrary::new();
        library.insert(
            "file:///clip.mp4",
            SimulatedMedia::new(640, 360, Ticks::from_secs(4)).seekable(false),
        );
        let player = SimulatedPlayer::new(library);
        player.set_source("file:///clip.mp4").unwrap();
        player.decoder().open();
        player
    }

    #[test]
    fn test_opened_payload() {
        let player = opened_player();
        let (callback, rx) = notification_channel();
        let bridge = NotificationBridge::new(callback);

        bridge.dispatch(&player, &EngineSignal::Opened).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            NotificationEvent::Opened(MediaDescription {
                width: 640,
                height: 360,
                duration: Ticks::from_secs(4),
                can_seek: false,
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frame_available_has_no_notification() {
        let player = opened_player();
        let (callback, rx) = notification_channel();
        let bridge = NotificationBridge::new(callback);

        assert_eq!(
            bridge.translate(&player, &EngineSignal::FrameAvailable).unwrap(),
            None
        );
        bridge.dispatch(&player, &EngineSignal::FrameAvailable).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_state_and_position_deliver_separately() {
        let player = opened_player();
        let (callback, rx) = notification_channel();
        let bridge = NotificationBridge::new(callback);

        bridge.dispatch(&player, &EngineSignal::StateChanged).unwrap();
        bridge.dispatch(&player, &EngineSignal::PositionChanged).unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        for event in events {
            assert!(matches!(
                event,
                NotificationEvent::StateChanged {
                    state: PlaybackState::Paused,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_failed_carries_code_and_message() {
        let player = opened_player();
        let (callback, rx) = notification_channel();
        let bridge = NotificationBridge::new(callback);
        let failure = MediaFailure {
            code: 0xC00D_36C4_u32 as i32,
            message: "unsupported".into(),
        };

        bridge
            .dispatch(&player, &EngineSignal::Failed(failure.clone()))
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(
            event.as_error(),
            Some(PlaybackError::DecoderFailed {
                code: failure.code,
                message: failure.message,
            })
        );
    }

    #[test]
    fn test_ended_is_state_changed() {
        let player = opened_player();
        let (callback, rx) = notification_channel();
        let bridge = NotificationBridge::new(callback);

        bridge.dispatch(&player, &EngineSignal::Ended).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            NotificationEvent::StateChanged {
                state: PlaybackState::Ended,
                position: Ticks::ZERO,
            }
        );
    }

    #[test]
    fn test_disconnected_bridge_drops_events() {
        let player = opened_player();
        let (callback, rx) = notification_channel();
        let bridge = NotificationBridge::new(callback);
        bridge.disconnect();
        assert!(!bridge.is_connected());

        bridge.dispatch(&player, &EngineSignal::Ended).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_concurrent_delivery() {
        let (callback, rx) = notification_channel();
        let bridge = Arc::new(NotificationBridge::new(callback));

        let threads: Vec<_> = (0..4)
            .map(|i| {
                let bridge = bridge.clone();
                std::thread::spawn(move || {
                    for n in 0..25 {
                        bridge.deliver(NotificationEvent::StateChanged {
                            state: PlaybackState::Playing,
                            position: Ticks(i * 100 + n),
                        });
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(rx.try_iter().count(), 100);
    }

    #[test]
    fn test_state_from_raw() {
        assert_eq!(PlaybackState::from_raw(3), PlaybackState::Playing);
        assert_eq!(PlaybackState::from_raw(5), PlaybackState::Ended);
        assert_eq!(PlaybackState::from_raw(42), PlaybackState::None);
    }
}
