//! Software GPU and decode engine
//!
//! Stands in for D3D11 and the platform player on machines without either.
//! The simulated engine never runs threads of its own: a [`SimulatedDecoder`]
//! plays the role of the engine's worker thread and raises events when the
//! caller drives it, which keeps ordering deterministic in tests.
//!
//! Texture memory is modelled as a shared frame counter seen by both the
//! decoder surface and the renderer view, mirroring the aliasing of a real
//! shared-handle texture.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::device_manager::{DecodeRuntime, ResetToken};
use super::gpu::{DevicePair, ExportedHandle, GpuInterop, SharedTexture, TextureDescription};
use super::notification::PlaybackState;
use super::player::{
    EngineSignal, EventSource, EventToken, MediaFailure, MediaPlayer, PlaybackSession,
    SignalHandler,
};
use super::ticks::{Ticks, TICKS_PER_SECOND};
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

/// HRESULT_FROM_WIN32(ERROR_FILE_NOT_FOUND), raised for unknown locations
pub const FILE_NOT_FOUND: i32 = 0x8007_0002_u32 as i32;

// ---------------------------------------------------------------------------
// GPU
// ---------------------------------------------------------------------------

/// Allocation steps that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureStep {
    CreateTexture,
    CreateView,
    ExportHandle,
    ImportHandle,
    WrapSurface,
}

impl TextureStep {
    fn name(self) -> &'static str {
        match self {
            TextureStep::CreateTexture => "texture creation",
            TextureStep::CreateView => "shader view creation",
            TextureStep::ExportHandle => "handle export",
            TextureStep::ImportHandle => "handle import",
            TextureStep::WrapSurface => "surface wrapping",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub decode_devices_created: u64,
    pub live_decode_devices: u64,
    pub textures_created: u64,
    pub textures_released: u64,
    pub handles_exported: u64,
    pub handles_closed: u64,
}

#[derive(Default)]
struct GpuShared {
    stats: Mutex<GpuStats>,
    live_handles: Mutex<HashSet<usize>>,
    next_handle: AtomicUsize,
    next_texture: AtomicU64,
    fail_next: Mutex<Option<TextureStep>>,
}

/// Host render device handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedRenderDevice {
    adapter: usize,
    lost: bool,
}

impl SimulatedRenderDevice {
    pub fn on_adapter(adapter: usize) -> Self {
        Self {
            adapter,
            lost: false,
        }
    }

    /// A device that was removed before it reached us
    pub fn lost() -> Self {
        Self {
            adapter: 0,
            lost: true,
        }
    }

    pub fn adapter(&self) -> usize {
        self.adapter
    }
}

struct DecodeDeviceInner {
    adapter: usize,
    multithread_protected: bool,
    gpu: Arc<GpuShared>,
}

impl Drop for DecodeDeviceInner {
    fn drop(&mut self) {
        let mut stats = self.gpu.stats.lock();
        stats.live_decode_devices = stats.live_decode_devices.saturating_sub(1);
    }
}

/// Decode device; clones share one underlying device
#[derive(Clone)]
pub struct SimulatedDecodeDevice {
    inner: Arc<DecodeDeviceInner>,
}

impl SimulatedDecodeDevice {
    pub fn adapter(&self) -> usize {
        self.inner.adapter
    }

    pub fn is_multithread_protected(&self) -> bool {
        self.inner.multithread_protected
    }
}

impl fmt::Debug for SimulatedDecodeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedDecodeDevice")
            .field("adapter", &self.inner.adapter)
            .finish()
    }
}

/// Pixels of one texture, reduced to what was last written
#[derive(Default)]
struct FrameMemory {
    frames_written: AtomicU64,
    last_position: AtomicI64,
}

/// Renderer-side shader view
#[derive(Clone)]
pub struct SimulatedView {
    texture_id: u64,
    width: u32,
    height: u32,
    memory: Arc<FrameMemory>,
}

impl SimulatedView {
    pub fn texture_id(&self) -> u64 {
        self.texture_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frames_written(&self) -> u64 {
        self.memory.frames_written.load(Ordering::Acquire)
    }

    /// Presentation time of the last frame copied in, if any
    pub fn last_frame_position(&self) -> Option<Ticks> {
        if self.frames_written() == 0 {
            return None;
        }
        Some(Ticks(self.memory.last_position.load(Ordering::Acquire)))
    }
}

impl fmt::Debug for SimulatedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedView")
            .field("texture_id", &self.texture_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Decoder-side copy target aliasing the same memory as the view
pub struct SimulatedSurface {
    texture_id: u64,
    memory: Arc<FrameMemory>,
}

impl SimulatedSurface {
    pub fn texture_id(&self) -> u64 {
        self.texture_id
    }

    fn write_frame(&self, position: Ticks) {
        self.memory.last_position.store(position.0, Ordering::Release);
        self.memory.frames_written.fetch_add(1, Ordering::AcqRel);
    }
}

/// Exported handle, closed on drop
struct SimulatedHandle {
    value: usize,
    gpu: Arc<GpuShared>,
}

impl SimulatedHandle {
    fn export(gpu: &Arc<GpuShared>) -> Self {
        let value = 0x1000 + gpu.next_handle.fetch_add(4, Ordering::Relaxed);
        gpu.live_handles.lock().insert(value);
        gpu.stats.lock().handles_exported += 1;
        Self {
            value,
            gpu: gpu.clone(),
        }
    }
}

impl Drop for SimulatedHandle {
    fn drop(&mut self) {
        if self.gpu.live_handles.lock().remove(&self.value) {
            self.gpu.stats.lock().handles_closed += 1;
        } else {
            warn!("Shared handle 0x{:x} closed twice", self.value);
        }
    }
}

pub struct SimulatedTexture {
    // Field order is release order
    handle: SimulatedHandle,
    surface: SimulatedSurface,
    view: SimulatedView,
    description: TextureDescription,
    gpu: Arc<GpuShared>,
}

impl Drop for SimulatedTexture {
    fn drop(&mut self) {
        debug!("Releasing simulated texture {}", self.view.texture_id);
        self.gpu.stats.lock().textures_released += 1;
    }
}

impl SharedTexture for SimulatedTexture {
    type View = SimulatedView;
    type Surface = SimulatedSurface;

    fn description(&self) -> &TextureDescription {
        &self.description
    }

    fn view(&self) -> SimulatedView {
        self.view.clone()
    }

    fn surface(&self) -> &SimulatedSurface {
        &self.surface
    }

    fn exported_handle(&self) -> ExportedHandle {
        ExportedHandle(self.handle.value)
    }
}

/// Software GPU with one or more named adapters
pub struct SimulatedGpu {
    adapters: Vec<String>,
    shared: Arc<GpuShared>,
}

impl SimulatedGpu {
    pub fn new() -> Self {
        Self::with_adapters(&["Simulated Adapter"])
    }

    pub fn with_adapters(names: &[&str]) -> Self {
        Self {
            adapters: names.iter().map(|name| name.to_string()).collect(),
            shared: Arc::new(GpuShared::default()),
        }
    }

    pub fn render_device(&self, adapter: usize) -> SimulatedRenderDevice {
        SimulatedRenderDevice::on_adapter(adapter)
    }

    /// Make the next texture allocation fail at `step`
    pub fn fail_next(&self, step: TextureStep) {
        *self.shared.fail_next.lock() = Some(step);
    }

    pub fn stats(&self) -> GpuStats {
        *self.shared.stats.lock()
    }

    pub fn live_handles(&self) -> usize {
        self.shared.live_handles.lock().len()
    }
}

impl Default for SimulatedGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuInterop for SimulatedGpu {
    type RenderDevice = SimulatedRenderDevice;
    type DecodeDevice = SimulatedDecodeDevice;
    type Texture = SimulatedTexture;

    fn resolve_decode_device(&self, render: &SimulatedRenderDevice) -> Result<SimulatedDecodeDevice> {
        if render.lost {
            return Err(PlaybackError::InvalidArgument(
                "render device is not initialized".into(),
            ));
        }
        let name = self.adapters.get(render.adapter).ok_or_else(|| {
            PlaybackError::DeviceCreationFailed(format!(
                "render device reports adapter {} which does not exist",
                render.adapter
            ))
        })?;

        info!("Creating decode device on adapter {} ({})", render.adapter, name);
        let mut stats = self.shared.stats.lock();
        stats.decode_devices_created += 1;
        stats.live_decode_devices += 1;
        Ok(SimulatedDecodeDevice {
            inner: Arc::new(DecodeDeviceInner {
                adapter: render.adapter,
                multithread_protected: true,
                gpu: self.shared.clone(),
            }),
        })
    }

    fn create_shared_texture(
        &self,
        devices: &DevicePair<Self>,
        desc: &TextureDescription,
        handle_name: Option<&str>,
    ) -> Result<SimulatedTexture> {
        let fail = self.shared.fail_next.lock().take();
        let step = |step: TextureStep| -> Result<()> {
            if fail == Some(step) {
                return Err(PlaybackError::resource(step.name(), "injected failure"));
            }
            Ok(())
        };

        step(TextureStep::CreateTexture)?;
        step(TextureStep::CreateView)?;
        step(TextureStep::ExportHandle)?;
        let handle = SimulatedHandle::export(&self.shared);
        debug!(
            "Exported handle 0x{:x} ({})",
            handle.value,
            handle_name.unwrap_or("unnamed")
        );

        if devices.decode.adapter() != devices.render.adapter() {
            return Err(PlaybackError::resource(
                TextureStep::ImportHandle.name(),
                "decode device is on a different adapter",
            ));
        }
        step(TextureStep::ImportHandle)?;
        step(TextureStep::WrapSurface)?;

        let texture_id = self.shared.next_texture.fetch_add(1, Ordering::Relaxed) + 1;
        let memory = Arc::new(FrameMemory::default());
        self.shared.stats.lock().textures_created += 1;

        Ok(SimulatedTexture {
            handle,
            surface: SimulatedSurface {
                texture_id,
                memory: memory.clone(),
            },
            view: SimulatedView {
                texture_id,
                width: desc.width,
                height: desc.height,
                memory,
            },
            description: *desc,
            gpu: self.shared.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

/// Properties of one piece of simulated content
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedMedia {
    pub width: u32,
    pub height: u32,
    pub duration: Ticks,
    pub can_seek: bool,
    pub frame_interval: Ticks,
}

impl SimulatedMedia {
    /// Seekable, 30 frames per second
    pub fn new(width: u32, height: u32, duration: Ticks) -> Self {
        Self {
            width,
            height,
            duration,
            can_seek: true,
            frame_interval: Ticks(TICKS_PER_SECOND / 30),
        }
    }

    pub fn seekable(mut self, can_seek: bool) -> Self {
        self.can_seek = can_seek;
        self
    }

    pub fn frame_interval(mut self, interval: Ticks) -> Self {
        self.frame_interval = interval;
        self
    }
}

/// Content reachable by location; shared between clones
#[derive(Clone, Default)]
pub struct SimulatedMediaLibrary {
    entries: Arc<Mutex<HashMap<String, SimulatedMedia>>>,
}

impl SimulatedMediaLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, location: impl Into<String>, media: SimulatedMedia) {
        self.entries.lock().insert(location.into(), media);
    }

    pub fn get(&self, location: &str) -> Option<SimulatedMedia> {
        self.entries.lock().get(location).cloned()
    }
}

#[derive(Debug, Clone)]
enum SourceStatus {
    Pending,
    Open(SimulatedMedia),
    Failed,
}

#[derive(Debug, Clone)]
struct BoundSource {
    location: String,
    status: SourceStatus,
}

struct Registration {
    source: EventSource,
    token: EventToken,
    handler: SignalHandler<SimulatedPlayer>,
}

struct PlayerState {
    source: Option<BoundSource>,
    playback_state: PlaybackState,
    position: Ticks,
    rate: f64,
    auto_play: bool,
    looping: bool,
    frame_server: bool,
    play_requested: bool,
    pause_requested: bool,
    frames_presented: u64,
    frames_copied: u64,
    reject_next_bind: bool,
    registrations: Vec<Registration>,
    next_token: i64,
    unsubscribe_log: Vec<EventSource>,
}

impl PlayerState {
    fn new() -> Self {
        Self {
            source: None,
            playback_state: PlaybackState::None,
            position: Ticks::ZERO,
            rate: 1.0,
            auto_play: false,
            looping: false,
            frame_server: false,
            play_requested: false,
            pause_requested: false,
            frames_presented: 0,
            frames_copied: 0,
            reject_next_bind: false,
            registrations: Vec::new(),
            next_token: 1,
            unsubscribe_log: Vec::new(),
        }
    }

    fn open_media(&self) -> Option<&SimulatedMedia> {
        match self.source.as_ref().map(|source| &source.status) {
            Some(SourceStatus::Open(media)) => Some(media),
            _ => None,
        }
    }
}

/// Session view over the player's state
pub struct SimulatedSession {
    state: Arc<Mutex<PlayerState>>,
}

impl PlaybackSession for SimulatedSession {
    fn playback_state(&self) -> Result<PlaybackState> {
        Ok(self.state.lock().playback_state)
    }

    fn position(&self) -> Result<Ticks> {
        Ok(self.state.lock().position)
    }

    fn set_position(&self, position: Ticks) -> Result<()> {
        let mut state = self.state.lock();
        let duration = state
            .open_media()
            .map(|media| media.duration)
            .ok_or_else(|| PlaybackError::engine("set_position", "no media is open"))?;
        state.position = position.clamp(Ticks::ZERO, duration);
        Ok(())
    }

    fn natural_duration(&self) -> Result<Ticks> {
        let state = self.state.lock();
        Ok(state.open_media().map(|media| media.duration).unwrap_or_default())
    }

    fn natural_video_size(&self) -> Result<(u32, u32)> {
        let state = self.state.lock();
        Ok(state
            .open_media()
            .map(|media| (media.width, media.height))
            .unwrap_or((0, 0)))
    }

    fn can_seek(&self) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.open_media().map(|media| media.can_seek).unwrap_or(false))
    }

    fn playback_rate(&self) -> Result<f64> {
        Ok(self.state.lock().rate)
    }

    fn set_playback_rate(&self, rate: f64) -> Result<()> {
        if !rate.is_finite() {
            return Err(PlaybackError::engine(
                "set_playback_rate",
                format!("rate {} is not finite", rate),
            ));
        }
        self.state.lock().rate = rate;
        Ok(())
    }
}

/// Simulated player; clones share one player
#[derive(Clone)]
pub struct SimulatedPlayer {
    state: Arc<Mutex<PlayerState>>,
    session: Arc<SimulatedSession>,
    library: SimulatedMediaLibrary,
}

impl SimulatedPlayer {
    pub fn new(library: SimulatedMediaLibrary) -> Self {
        let state = Arc::new(Mutex::new(PlayerState::new()));
        Self {
            session: Arc::new(SimulatedSession {
                state: state.clone(),
            }),
            state,
            library,
        }
    }

    /// Driver standing in for the engine's worker thread
    pub fn decoder(&self) -> SimulatedDecoder {
        SimulatedDecoder {
            player: self.clone(),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Sources in the order they were unsubscribed
    pub fn unsubscribe_log(&self) -> Vec<EventSource> {
        self.state.lock().unsubscribe_log.clone()
    }

    /// Make the next `set_source` fail to attach
    pub fn reject_next_bind(&self) {
        self.state.lock().reject_next_bind = true;
    }

    pub fn bound_location(&self) -> Option<String> {
        self.state
            .lock()
            .source
            .as_ref()
            .map(|source| source.location.clone())
    }

    pub fn frame_server_enabled(&self) -> bool {
        self.state.lock().frame_server
    }

    pub fn auto_play(&self) -> bool {
        self.state.lock().auto_play
    }

    pub fn frames_copied(&self) -> u64 {
        self.state.lock().frames_copied
    }

    /// Invoke every handler registered for the signal's source
    ///
    /// Handlers run without the state lock so they can call back in.
    fn emit(&self, signal: EngineSignal) {
        let source = signal.source();
        let handlers: Vec<_> = self
            .state
            .lock()
            .registrations
            .iter()
            .filter(|registration| registration.source == source)
            .map(|registration| registration.handler.clone())
            .collect();

        for handler in handlers {
            if let Err(e) = handler(self, signal.clone()) {
                warn!("{:?} handler failed: {}", source, e);
            }
        }
    }
}

fn has_uri_scheme(location: &str) -> bool {
    match location.find("://") {
        Some(end) if end > 0 => {
            let scheme = &location[..end];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

impl MediaPlayer for SimulatedPlayer {
    type Session = SimulatedSession;
    type Surface = SimulatedSurface;

    fn session(&self) -> &SimulatedSession {
        &self.session
    }

    fn enable_frame_server(&self) -> Result<()> {
        self.state.lock().frame_server = true;
        Ok(())
    }

    fn set_auto_play(&self, enabled: bool) -> Result<()> {
        self.state.lock().auto_play = enabled;
        Ok(())
    }

    fn set_looping(&self, enabled: bool) -> Result<()> {
        self.state.lock().looping = enabled;
        Ok(())
    }

    fn subscribe(
        &self,
        source: EventSource,
        handler: SignalHandler<Self>,
    ) -> Result<EventToken> {
        let mut state = self.state.lock();
        let token = EventToken(state.next_token);
        state.next_token += 1;
        state.registrations.push(Registration {
            source,
            token,
            handler,
        });
        Ok(token)
    }

    fn unsubscribe(&self, source: EventSource, token: EventToken) -> Result<()> {
        let mut state = self.state.lock();
        let index = state
            .registrations
            .iter()
            .position(|registration| registration.source == source && registration.token == token)
            .ok_or_else(|| {
                PlaybackError::engine(
                    "unsubscribe",
                    format!("no {:?} registration with token {}", source, token.0),
                )
            })?;
        state.registrations.remove(index);
        state.unsubscribe_log.push(source);
        Ok(())
    }

    fn set_source(&self, location: &str) -> Result<()> {
        if !has_uri_scheme(location) {
            return Err(PlaybackError::SourceResolutionFailed(format!(
                "{:?} is not a valid URI",
                location
            )));
        }

        let mut state = self.state.lock();
        if std::mem::take(&mut state.reject_next_bind) {
            return Err(PlaybackError::BindingFailed(format!(
                "player refused source {}",
                location
            )));
        }
        state.source = Some(BoundSource {
            location: location.to_string(),
            status: SourceStatus::Pending,
        });
        state.playback_state = PlaybackState::Opening;
        state.position = Ticks::ZERO;
        state.frames_presented = 0;
        state.play_requested = false;
        state.pause_requested = false;
        debug!("Bound source {}", location);
        Ok(())
    }

    fn clear_source(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.source = None;
        state.playback_state = PlaybackState::None;
        state.position = Ticks::ZERO;
        state.frames_presented = 0;
        state.play_requested = false;
        state.pause_requested = false;
        Ok(())
    }

    fn play(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.source.is_some() {
            state.play_requested = true;
            state.pause_requested = false;
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.source.is_some() {
            state.pause_requested = true;
            state.play_requested = false;
        }
        Ok(())
    }

    fn copy_frame_to_surface(&self, surface: &SimulatedSurface) -> Result<()> {
        let mut state = self.state.lock();
        if state.open_media().is_none() || state.frames_presented == 0 {
            return Err(PlaybackError::engine(
                "copy_frame_to_surface",
                "no video frame available",
            ));
        }
        surface.write_frame(state.position);
        state.frames_copied += 1;
        Ok(())
    }
}

/// Drives a [`SimulatedPlayer`] the way the engine's worker thread would
#[derive(Clone)]
pub struct SimulatedDecoder {
    player: SimulatedPlayer,
}

impl SimulatedDecoder {
    pub fn player(&self) -> &SimulatedPlayer {
        &self.player
    }

    /// Finish opening the pending source
    ///
    /// Raises `Opened` for known content and `Failed` otherwise. Returns
    /// false when no source is waiting to open.
    pub fn open(&self) -> bool {
        let location = {
            let state = self.player.state.lock();
            match &state.source {
                Some(BoundSource {
                    location,
                    status: SourceStatus::Pending,
                }) => location.clone(),
                _ => return false,
            }
        };
        self.player.emit(EngineSignal::StateChanged);

        let Some(media) = self.player.library.get(&location) else {
            {
                let mut state = self.player.state.lock();
                if let Some(source) = state.source.as_mut() {
                    source.status = SourceStatus::Failed;
                }
                state.playback_state = PlaybackState::None;
            }
            info!("Simulated open of {} failed", location);
            self.player.emit(EngineSignal::Failed(MediaFailure {
                code: FILE_NOT_FOUND,
                message: format!("{} could not be found", location),
            }));
            return true;
        };

        let auto_play = {
            let mut state = self.player.state.lock();
            if let Some(source) = state.source.as_mut() {
                source.status = SourceStatus::Open(media);
            }
            state.playback_state = PlaybackState::Paused;
            state.position = Ticks::ZERO;
            state.auto_play
        };
        self.player.emit(EngineSignal::Opened);

        if auto_play {
            self.player.state.lock().play_requested = true;
            self.pump();
        } else {
            self.player.emit(EngineSignal::StateChanged);
        }
        true
    }

    /// Apply pending play and pause requests
    pub fn pump(&self) {
        let transition = {
            let mut state = self.player.state.lock();
            if state.open_media().is_none() {
                return;
            }
            if state.play_requested && state.playback_state != PlaybackState::Playing {
                state.play_requested = false;
                state.playback_state = PlaybackState::Buffering;
                Some(true)
            } else if state.pause_requested && state.playback_state == PlaybackState::Playing {
                state.pause_requested = false;
                state.playback_state = PlaybackState::Paused;
                Some(false)
            } else {
                None
            }
        };

        match transition {
            Some(true) => {
                self.player.emit(EngineSignal::StateChanged);
                self.player.state.lock().playback_state = PlaybackState::Playing;
                self.player.emit(EngineSignal::StateChanged);
            }
            Some(false) => self.player.emit(EngineSignal::StateChanged),
            None => {}
        }
    }

    /// Present one frame while playing
    ///
    /// Returns false when nothing is playing. The final frame is followed by
    /// `Ended` unless looping is enabled.
    pub fn render_frame(&self) -> bool {
        let (frame_server, ended) = {
            let mut state = self.player.state.lock();
            if state.playback_state != PlaybackState::Playing {
                return false;
            }
            let Some(media) = state.open_media().cloned() else {
                return false;
            };

            state.frames_presented += 1;
            let advance = (media.frame_interval.0 as f64 * state.rate.abs()) as i64;
            state.position = state.position.saturating_add(Ticks(advance.max(1)));

            let mut ended = false;
            if state.position >= media.duration {
                if state.looping {
                    state.position = Ticks::ZERO;
                } else {
                    state.position = media.duration;
                    state.playback_state = PlaybackState::Paused;
                    ended = true;
                }
            }
            (state.frame_server, ended)
        };

        if frame_server {
            self.player.emit(EngineSignal::FrameAvailable);
        }
        self.player.emit(EngineSignal::PositionChanged);
        if ended {
            self.player.emit(EngineSignal::Ended);
        }
        true
    }

    /// Pump, then present frames until playback stops or `max_frames` is hit
    pub fn run(&self, max_frames: usize) -> usize {
        self.pump();
        let mut frames = 0;
        while frames < max_frames && self.render_frame() {
            frames += 1;
        }
        frames
    }

    /// Raise an asynchronous decode failure
    pub fn fail(&self, code: i32, message: &str) {
        {
            let mut state = self.player.state.lock();
            if let Some(source) = state.source.as_mut() {
                source.status = SourceStatus::Failed;
            }
            state.playback_state = PlaybackState::None;
        }
        let message = (!message.is_empty()).then(|| message.to_string());
        self.player
            .emit(EngineSignal::Failed(MediaFailure::from_parts(Some(code), message)));
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub locks: u32,
    pub unlocks: u32,
    pub resets: u32,
    pub locked: bool,
    pub bound_adapter: Option<usize>,
    pub players_created: u32,
}

#[derive(Default)]
struct ManagerState {
    stats: RuntimeStats,
    current_token: u32,
    bound: Option<SimulatedDecodeDevice>,
}

/// Locked device manager handle
pub struct SimulatedDeviceManager {
    token: ResetToken,
}

/// Device manager and player factory over a media library
pub struct SimulatedRuntime {
    library: SimulatedMediaLibrary,
    manager: Mutex<ManagerState>,
    players: Mutex<Vec<SimulatedPlayer>>,
    fail_player_creation: Mutex<bool>,
}

impl SimulatedRuntime {
    pub fn new(library: SimulatedMediaLibrary) -> Self {
        Self {
            library,
            manager: Mutex::new(ManagerState::default()),
            players: Mutex::new(Vec::new()),
            fail_player_creation: Mutex::new(false),
        }
    }

    pub fn library(&self) -> &SimulatedMediaLibrary {
        &self.library
    }

    pub fn stats(&self) -> RuntimeStats {
        self.manager.lock().stats.clone()
    }

    /// Most recently created player
    pub fn player(&self) -> Option<SimulatedPlayer> {
        self.players.lock().last().cloned()
    }

    pub fn decoder(&self) -> Option<SimulatedDecoder> {
        self.player().map(|player| player.decoder())
    }

    /// Make the next player activation fail
    pub fn fail_player_creation(&self) {
        *self.fail_player_creation.lock() = true;
    }
}

impl DecodeRuntime for SimulatedRuntime {
    type DecodeDevice = SimulatedDecodeDevice;
    type DeviceManager = SimulatedDeviceManager;
    type Player = SimulatedPlayer;

    fn lock_device_manager(&self) -> Result<(ResetToken, SimulatedDeviceManager)> {
        let mut manager = self.manager.lock();
        if manager.stats.locked {
            return Err(PlaybackError::DeviceCreationFailed(
                "device manager is already locked".into(),
            ));
        }
        manager.stats.locked = true;
        manager.stats.locks += 1;
        manager.current_token += 1;
        let token = ResetToken(manager.current_token);
        Ok((token, SimulatedDeviceManager { token }))
    }

    fn reset_device(
        &self,
        device_manager: &SimulatedDeviceManager,
        device: &SimulatedDecodeDevice,
        token: ResetToken,
    ) -> Result<()> {
        let mut manager = self.manager.lock();
        if !manager.stats.locked
            || token != device_manager.token
            || token.0 != manager.current_token
        {
            return Err(PlaybackError::DeviceCreationFailed(format!(
                "reset token {} is stale",
                token.0
            )));
        }
        manager.bound = Some(device.clone());
        manager.stats.bound_adapter = Some(device.adapter());
        manager.stats.resets += 1;
        Ok(())
    }

    fn unlock_device_manager(&self) {
        let mut manager = self.manager.lock();
        if manager.stats.locked {
            manager.stats.locked = false;
            manager.stats.unlocks += 1;
            manager.stats.bound_adapter = None;
            manager.bound = None;
        }
    }

    fn create_player(&self, config: &PlaybackConfig) -> Result<SimulatedPlayer> {
        if std::mem::take(&mut *self.fail_player_creation.lock()) {
            return Err(PlaybackError::DeviceCreationFailed(
                "player activation failed".into(),
            ));
        }
        let player = SimulatedPlayer::new(self.library.clone());
        debug!(
            "Created simulated player (auto_play={}, looping={})",
            config.auto_play, config.looping
        );
        self.players.lock().push(player.clone());
        self.manager.lock().stats.players_created += 1;
        Ok(player)
    }
}
