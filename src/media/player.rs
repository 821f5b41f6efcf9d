//! Decode engine player abstraction
//!
//! A [`MediaPlayer`] is the decode engine's player object: it owns one
//! [`PlaybackSession`] for its whole life, accepts a new source on every load
//! and raises its events on engine-internal threads.

use std::sync::Arc;

use super::notification::PlaybackState;
use super::ticks::Ticks;
use crate::error::{hresult, Result};

/// Event sources a player raises
///
/// `PlaybackStateChanged` and `PositionChanged` both belong to the session and
/// are separate subscriptions with separate tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    MediaOpened,
    MediaEnded,
    MediaFailed,
    VideoFrameAvailable,
    PlaybackStateChanged,
    PositionChanged,
}

impl EventSource {
    /// Registration order used by the playback engine
    ///
    /// Teardown walks it backwards: session events, then the frame server,
    /// then the remaining player events.
    pub const REGISTRATION_ORDER: [EventSource; 6] = [
        EventSource::MediaOpened,
        EventSource::MediaEnded,
        EventSource::MediaFailed,
        EventSource::VideoFrameAvailable,
        EventSource::PlaybackStateChanged,
        EventSource::PositionChanged,
    ];

    /// Raised by the session rather than the player
    pub fn is_session_event(self) -> bool {
        matches!(
            self,
            EventSource::PlaybackStateChanged | EventSource::PositionChanged
        )
    }
}

/// Registration token returned by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventToken(pub i64);

/// Extended error reported by a failed open or decode
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFailure {
    pub code: i32,
    pub message: String,
}

impl MediaFailure {
    /// Build a failure from whatever details the engine could supply
    ///
    /// A missing code becomes `E_FAIL` and a missing message is empty; the
    /// failure itself is always reported.
    pub fn from_parts(code: Option<i32>, message: Option<String>) -> Self {
        Self {
            code: code.unwrap_or(hresult::E_FAIL),
            message: message.unwrap_or_default(),
        }
    }
}

/// Raw callback payload, one variant per [`EventSource`]
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    Opened,
    Ended,
    Failed(MediaFailure),
    FrameAvailable,
    StateChanged,
    PositionChanged,
}

impl EngineSignal {
    pub fn source(&self) -> EventSource {
        match self {
            EngineSignal::Opened => EventSource::MediaOpened,
            EngineSignal::Ended => EventSource::MediaEnded,
            EngineSignal::Failed(_) => EventSource::MediaFailed,
            EngineSignal::FrameAvailable => EventSource::VideoFrameAvailable,
            EngineSignal::StateChanged => EventSource::PlaybackStateChanged,
            EngineSignal::PositionChanged => EventSource::PositionChanged,
        }
    }
}

/// Callback registered for one event source
///
/// Receives the player that raised the event; invoked on whatever thread the
/// engine uses.
pub type SignalHandler<P> = Arc<dyn Fn(&P, EngineSignal) -> Result<()> + Send + Sync>;

/// Transport state and timing of the currently bound source
pub trait PlaybackSession: Send + Sync {
    fn playback_state(&self) -> Result<PlaybackState>;
    fn position(&self) -> Result<Ticks>;
    /// The engine seeks asynchronously; readback may lag briefly
    fn set_position(&self, position: Ticks) -> Result<()>;
    fn natural_duration(&self) -> Result<Ticks>;
    fn natural_video_size(&self) -> Result<(u32, u32)>;
    fn can_seek(&self) -> Result<bool>;
    fn playback_rate(&self) -> Result<f64>;
    fn set_playback_rate(&self, rate: f64) -> Result<()>;
}

pub trait MediaPlayer: Send + Sync + Sized + 'static {
    type Session: PlaybackSession;
    /// Copy target accepted by [`MediaPlayer::copy_frame_to_surface`]
    type Surface: Send + Sync + 'static;

    /// Session bound 1:1 to this player
    fn session(&self) -> &Self::Session;

    /// Route decoded frames to `VideoFrameAvailable` instead of a swap chain
    fn enable_frame_server(&self) -> Result<()>;
    fn set_auto_play(&self, enabled: bool) -> Result<()>;
    fn set_looping(&self, enabled: bool) -> Result<()>;

    fn subscribe(&self, source: EventSource, handler: SignalHandler<Self>) -> Result<EventToken>;
    fn unsubscribe(&self, source: EventSource, token: EventToken) -> Result<()>;

    /// Resolve a media source for `location` and bind it as the active source
    ///
    /// Returns once the source is bound; opening completes asynchronously.
    fn set_source(&self, location: &str) -> Result<()>;
    /// Unbind the active source
    fn clear_source(&self) -> Result<()>;

    fn play(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;

    /// Copy the engine's current video frame into `surface`
    fn copy_frame_to_surface(&self, surface: &Self::Surface) -> Result<()>;
}
