//! Windows.Media.Playback backend
//!
//! `MediaPlayer` in frame-server mode decodes on the device registered with
//! the process-wide Media Foundation DXGI device manager and raises
//! `VideoFrameAvailable` for every frame; the frame handler copies it into the
//! shared texture with `CopyFrameToVideoSurface`.
//!
//! The calling thread must have WinRT initialized.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use windows::core::{IInspectable, Interface, Ref, HRESULT, HSTRING};
use windows::Foundation::{TimeSpan, TypedEventHandler, Uri};
use windows::Media::Core::MediaSource;
use windows::Media::Playback::{
    IMediaPlaybackSource, MediaPlaybackItem, MediaPlaybackSession, MediaPlayer as WinMediaPlayer,
    MediaPlayerFailedEventArgs,
};
use windows::Win32::Media::MediaFoundation::{
    IMFDXGIDeviceManager, MFLockDXGIDeviceManager, MFUnlockDXGIDeviceManager,
};

use super::d3d11::{D3D11Device, MediaSurface};
use super::device_manager::{DecodeRuntime, ResetToken};
use super::notification::PlaybackState;
use super::player::{
    EngineSignal, EventSource, EventToken, MediaFailure, MediaPlayer, PlaybackSession,
    SignalHandler,
};
use super::ticks::Ticks;
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

fn engine_error(operation: &'static str) -> impl Fn(windows::core::Error) -> PlaybackError {
    move |e| PlaybackError::engine(operation, format!("{:?}", e))
}

/// Hand a handler failure back to the engine as an HRESULT
fn to_winrt_error(e: PlaybackError) -> windows::core::Error {
    windows::core::Error::new(HRESULT(e.hresult()), e.to_string())
}

/// `MediaPlaybackSession` wrapper
#[derive(Debug, Clone)]
pub struct WinRtSession(MediaPlaybackSession);

unsafe impl Send for WinRtSession {}
unsafe impl Sync for WinRtSession {}

impl PlaybackSession for WinRtSession {
    fn playback_state(&self) -> Result<PlaybackState> {
        let state = self
            .0
            .PlaybackState()
            .map_err(engine_error("PlaybackState"))?;
        Ok(PlaybackState::from_raw(state.0 as u16))
    }

    fn position(&self) -> Result<Ticks> {
        let position = self.0.Position().map_err(engine_error("Position"))?;
        Ok(Ticks(position.Duration))
    }

    fn set_position(&self, position: Ticks) -> Result<()> {
        self.0
            .SetPosition(TimeSpan {
                Duration: position.0,
            })
            .map_err(engine_error("SetPosition"))
    }

    fn natural_duration(&self) -> Result<Ticks> {
        let duration = self
            .0
            .NaturalDuration()
            .map_err(engine_error("NaturalDuration"))?;
        Ok(Ticks(duration.Duration))
    }

    fn natural_video_size(&self) -> Result<(u32, u32)> {
        let width = self
            .0
            .NaturalVideoWidth()
            .map_err(engine_error("NaturalVideoWidth"))?;
        let height = self
            .0
            .NaturalVideoHeight()
            .map_err(engine_error("NaturalVideoHeight"))?;
        Ok((width, height))
    }

    fn can_seek(&self) -> Result<bool> {
        self.0.CanSeek().map_err(engine_error("CanSeek"))
    }

    fn playback_rate(&self) -> Result<f64> {
        self.0.PlaybackRate().map_err(engine_error("PlaybackRate"))
    }

    fn set_playback_rate(&self, rate: f64) -> Result<()> {
        self.0
            .SetPlaybackRate(rate)
            .map_err(engine_error("SetPlaybackRate"))
    }
}

/// `Windows.Media.Playback.MediaPlayer` in frame-server mode
#[derive(Debug, Clone)]
pub struct WinRtPlayer {
    player: WinMediaPlayer,
    session: WinRtSession,
}

unsafe impl Send for WinRtPlayer {}
unsafe impl Sync for WinRtPlayer {}

impl WinRtPlayer {
    pub fn new() -> Result<Self> {
        let player = WinMediaPlayer::new()
            .map_err(|e| PlaybackError::DeviceCreationFailed(format!("MediaPlayer: {:?}", e)))?;
        Self::wrap(player)
            .map_err(|e| PlaybackError::DeviceCreationFailed(format!("PlaybackSession: {:?}", e)))
    }

    fn wrap(player: WinMediaPlayer) -> windows::core::Result<Self> {
        let session = player.PlaybackSession()?;
        Ok(Self {
            player,
            session: WinRtSession(session),
        })
    }

    fn invoke(
        handler: &SignalHandler<Self>,
        player: WinMediaPlayer,
        signal: EngineSignal,
    ) -> windows::core::Result<()> {
        let player = Self::wrap(player)?;
        handler(&player, signal).map_err(to_winrt_error)
    }

    fn player_handler(
        handler: SignalHandler<Self>,
        signal: EngineSignal,
    ) -> TypedEventHandler<WinMediaPlayer, IInspectable> {
        TypedEventHandler::new(
            move |sender: Ref<WinMediaPlayer>, _args: Ref<IInspectable>| {
                Self::invoke(&handler, sender.ok()?.clone(), signal.clone())
            },
        )
    }

    fn session_handler(
        handler: SignalHandler<Self>,
        signal: EngineSignal,
    ) -> TypedEventHandler<MediaPlaybackSession, IInspectable> {
        TypedEventHandler::new(
            move |sender: Ref<MediaPlaybackSession>, _args: Ref<IInspectable>| {
                let player = sender.ok()?.MediaPlayer()?;
                Self::invoke(&handler, player, signal.clone())
            },
        )
    }

    fn failed_handler(
        handler: SignalHandler<Self>,
    ) -> TypedEventHandler<WinMediaPlayer, MediaPlayerFailedEventArgs> {
        TypedEventHandler::new(
            move |sender: Ref<WinMediaPlayer>, args: Ref<MediaPlayerFailedEventArgs>| {
                let args = args.ok().ok();
                let failure = MediaFailure::from_parts(
                    args.and_then(|args| args.ExtendedErrorCode().ok()).map(|code| code.0),
                    args.and_then(|args| args.ErrorMessage().ok())
                        .map(|message| message.to_string_lossy()),
                );
                if failure.message.is_empty() {
                    warn!("MediaFailed 0x{:08X} without an error message", failure.code);
                } else {
                    error!("MediaFailed 0x{:08X}: {}", failure.code, failure.message);
                }
                Self::invoke(&handler, sender.ok()?.clone(), EngineSignal::Failed(failure))
            },
        )
    }

    fn create_source(location: &str) -> Result<IMediaPlaybackSource> {
        let resolve = |e: windows::core::Error| {
            PlaybackError::SourceResolutionFailed(format!("{}: {:?}", location, e))
        };
        let uri = Uri::CreateUri(&HSTRING::from(location)).map_err(resolve)?;
        let source = MediaSource::CreateFromUri(&uri).map_err(resolve)?;
        let item = MediaPlaybackItem::Create(&source).map_err(resolve)?;
        item.cast().map_err(resolve)
    }
}

impl MediaPlayer for WinRtPlayer {
    type Session = WinRtSession;
    type Surface = MediaSurface;

    fn session(&self) -> &WinRtSession {
        &self.session
    }

    fn enable_frame_server(&self) -> Result<()> {
        self.player
            .SetIsVideoFrameServerEnabled(true)
            .map_err(engine_error("SetIsVideoFrameServerEnabled"))
    }

    fn set_auto_play(&self, enabled: bool) -> Result<()> {
        self.player
            .SetAutoPlay(enabled)
            .map_err(engine_error("SetAutoPlay"))
    }

    fn set_looping(&self, enabled: bool) -> Result<()> {
        self.player
            .SetIsLoopingEnabled(enabled)
            .map_err(engine_error("SetIsLoopingEnabled"))
    }

    fn subscribe(&self, source: EventSource, handler: SignalHandler<Self>) -> Result<EventToken> {
        let token = match source {
            EventSource::MediaOpened => self
                .player
                .MediaOpened(&Self::player_handler(handler, EngineSignal::Opened)),
            EventSource::MediaEnded => self
                .player
                .MediaEnded(&Self::player_handler(handler, EngineSignal::Ended)),
            EventSource::MediaFailed => self.player.MediaFailed(&Self::failed_handler(handler)),
            EventSource::VideoFrameAvailable => self.player.VideoFrameAvailable(
                &Self::player_handler(handler, EngineSignal::FrameAvailable),
            ),
            EventSource::PlaybackStateChanged => self.session.0.PlaybackStateChanged(
                &Self::session_handler(handler, EngineSignal::StateChanged),
            ),
            EventSource::PositionChanged => self.session.0.PositionChanged(
                &Self::session_handler(handler, EngineSignal::PositionChanged),
            ),
        }
        .map_err(|e| {
            error!("Failed to subscribe to {:?}: {:?}", source, e);
            PlaybackError::engine("subscribe", format!("{:?}: {:?}", source, e))
        })?;
        Ok(EventToken(token))
    }

    fn unsubscribe(&self, source: EventSource, token: EventToken) -> Result<()> {
        let token = token.0;
        match source {
            EventSource::MediaOpened => self.player.RemoveMediaOpened(token),
            EventSource::MediaEnded => self.player.RemoveMediaEnded(token),
            EventSource::MediaFailed => self.player.RemoveMediaFailed(token),
            EventSource::VideoFrameAvailable => self.player.RemoveVideoFrameAvailable(token),
            EventSource::PlaybackStateChanged => self.session.0.RemovePlaybackStateChanged(token),
            EventSource::PositionChanged => self.session.0.RemovePositionChanged(token),
        }
        .map_err(engine_error("unsubscribe"))
    }

    fn set_source(&self, location: &str) -> Result<()> {
        let source = Self::create_source(location)?;
        self.player
            .SetSource(&source)
            .map_err(|e| PlaybackError::BindingFailed(format!("{}: {:?}", location, e)))?;
        debug!("Source bound: {}", location);
        Ok(())
    }

    fn clear_source(&self) -> Result<()> {
        self.player
            .SetSource(None::<&IMediaPlaybackSource>)
            .map_err(engine_error("SetSource"))
    }

    fn play(&self) -> Result<()> {
        self.player.Play().map_err(engine_error("Play"))
    }

    fn pause(&self) -> Result<()> {
        self.player.Pause().map_err(engine_error("Pause"))
    }

    fn copy_frame_to_surface(&self, surface: &MediaSurface) -> Result<()> {
        self.player
            .CopyFrameToVideoSurface(&surface.0)
            .map_err(engine_error("CopyFrameToVideoSurface"))
    }
}

/// Set while this process holds the Media Foundation device manager
static DEVICE_MANAGER_LOCKED: AtomicBool = AtomicBool::new(false);

/// Locked `IMFDXGIDeviceManager`
pub struct MfDeviceManager(IMFDXGIDeviceManager);

unsafe impl Send for MfDeviceManager {}
unsafe impl Sync for MfDeviceManager {}

/// Media Foundation device manager plus `MediaPlayer` activation
#[derive(Debug, Default)]
pub struct MediaFoundationRuntime;

impl MediaFoundationRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeRuntime for MediaFoundationRuntime {
    type DecodeDevice = D3D11Device;
    type DeviceManager = MfDeviceManager;
    type Player = WinRtPlayer;

    fn lock_device_manager(&self) -> Result<(ResetToken, MfDeviceManager)> {
        if DEVICE_MANAGER_LOCKED.swap(true, Ordering::AcqRel) {
            return Err(PlaybackError::DeviceCreationFailed(
                "Media Foundation device manager is already locked".into(),
            ));
        }

        let mut token = 0u32;
        match unsafe { MFLockDXGIDeviceManager(Some(&mut token)) } {
            Ok(manager) => Ok((ResetToken(token), MfDeviceManager(manager))),
            Err(e) => {
                DEVICE_MANAGER_LOCKED.store(false, Ordering::Release);
                Err(PlaybackError::DeviceCreationFailed(format!(
                    "MFLockDXGIDeviceManager failed: {:?}",
                    e
                )))
            }
        }
    }

    fn reset_device(
        &self,
        manager: &MfDeviceManager,
        device: &D3D11Device,
        token: ResetToken,
    ) -> Result<()> {
        unsafe {
            manager.0.ResetDevice(&device.0, token.0).map_err(|e| {
                PlaybackError::DeviceCreationFailed(format!("ResetDevice failed: {:?}", e))
            })
        }
    }

    fn unlock_device_manager(&self) {
        if !DEVICE_MANAGER_LOCKED.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = unsafe { MFUnlockDXGIDeviceManager() } {
            warn!("MFUnlockDXGIDeviceManager failed: {:?}", e);
        }
        DEVICE_MANAGER_LOCKED.store(false, Ordering::Release);
    }

    fn create_player(&self, config: &PlaybackConfig) -> Result<WinRtPlayer> {
        let player = WinRtPlayer::new()?;
        info!(
            "Created MediaPlayer (auto_play={}, looping={})",
            config.auto_play, config.looping
        );
        Ok(player)
    }
}
