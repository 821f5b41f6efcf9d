//! Media Module
//!
//! Shared-texture video playback: device pairing, the decode engine player,
//! the shared texture the renderer samples and state notifications.

pub mod device_manager;
pub mod gpu;
pub mod message;
pub mod notification;
pub mod playback;
pub mod player;
pub mod shared_texture;
pub mod simulated;
pub mod subscriptions;
pub mod ticks;

#[cfg(windows)]
pub mod d3d11;
#[cfg(windows)]
pub mod winrt_player;

pub use device_manager::{DecodeRuntime, DeviceManagerLock, ResetToken};
pub use gpu::{DevicePair, GpuInterop, SharedTexture, TextureDescription, TextureFormat};
pub use message::{MessageKind, PlaybackStateMessage};
pub use notification::{
    notification_channel, MediaDescription, NotificationBridge, NotificationEvent, PlaybackState,
    StateCallback,
};
pub use playback::PlaybackEngine;
pub use player::{EngineSignal, EventSource, MediaPlayer, PlaybackSession};
pub use shared_texture::SharedTextureManager;
pub use ticks::{Ticks, TICKS_PER_SECOND};

#[cfg(windows)]
pub use d3d11::D3D11Interop;
#[cfg(windows)]
pub use winrt_player::{MediaFoundationRuntime, WinRtPlayer};

/// Engine over D3D11 and `Windows.Media.Playback`
#[cfg(windows)]
pub type WindowsPlaybackEngine = PlaybackEngine<D3D11Interop, MediaFoundationRuntime>;
