//! Playback engine
//!
//! Owns the device pair, the device-manager lock, the player with its
//! subscriptions, the shared texture and the notification bridge, and tears
//! them down in dependency order.
//!
//! Threading: transport calls and shutdown serialize on one mutex. Engine
//! callbacks never take it; they only touch the texture manager and the
//! bridge, which carry their own synchronization, so a callback racing a
//! transport call cannot deadlock.

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use std::sync::Arc;

use super::device_manager::{DecodeRuntime, DeviceManagerLock};
use super::gpu::{DevicePair, GpuInterop, SurfaceOf, TextureDescription, ViewOf};
use super::notification::{NotificationBridge, PlaybackState, StateCallback};
use super::player::{EngineSignal, EventSource, MediaPlayer, PlaybackSession, SignalHandler};
use super::shared_texture::SharedTextureManager;
use super::subscriptions::SubscriptionTable;
use super::ticks::Ticks;
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

struct EngineState<R: DecodeRuntime> {
    device_manager: Option<DeviceManagerLock<R>>,
    player: Option<R::Player>,
    subscriptions: SubscriptionTable,
    shut_down: bool,
}

pub struct PlaybackEngine<G: GpuInterop, R: DecodeRuntime> {
    runtime: Arc<R>,
    config: PlaybackConfig,
    textures: Arc<SharedTextureManager<G>>,
    bridge: Arc<NotificationBridge>,
    state: Mutex<EngineState<R>>,
}

impl<G, R> PlaybackEngine<G, R>
where
    G: GpuInterop,
    R: DecodeRuntime<DecodeDevice = G::DecodeDevice>,
    R::Player: MediaPlayer<Surface = SurfaceOf<G>>,
{
    /// Bring up devices, the device-manager lock and the player
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn initialize(
        gpu: Arc<G>,
        runtime: Arc<R>,
        render_device: G::RenderDevice,
        callback: StateCallback,
        config: PlaybackConfig,
    ) -> Result<Self> {
        config.validate()?;
        info!("Initializing playback engine");

        let devices = DevicePair::resolve(gpu.as_ref(), render_device)?;
        let textures = Arc::new(SharedTextureManager::new(gpu, devices, &config));

        let engine = Self {
            runtime,
            config,
            textures,
            bridge: Arc::new(NotificationBridge::new(callback)),
            state: Mutex::new(EngineState {
                device_manager: None,
                player: None,
                subscriptions: SubscriptionTable::new(),
                shut_down: false,
            }),
        };

        if let Err(e) = engine.start() {
            error!("Playback engine initialization failed: {}", e);
            engine.shutdown();
            return Err(e);
        }

        info!("Playback engine initialized");
        Ok(engine)
    }

    fn start(&self) -> Result<()> {
        let mut state = self.state.lock();

        let lock = DeviceManagerLock::acquire(self.runtime.clone())?;
        let decode = self
            .textures
            .decode_device()
            .ok_or(PlaybackError::NotInitialized)?;
        let bound = lock.bind(&decode);
        state.device_manager = Some(lock);
        bound?;

        let player = self.runtime.create_player(&self.config)?;
        let configured = self.configure_player(&player, &mut state.subscriptions);
        state.player = Some(player);
        configured
    }

    fn configure_player(
        &self,
        player: &R::Player,
        subscriptions: &mut SubscriptionTable,
    ) -> Result<()> {
        player.set_auto_play(self.config.auto_play)?;
        player.set_looping(self.config.looping)?;
        player
            .session()
            .set_playback_rate(self.config.initial_playback_rate)?;
        // Frame-server mode must be on before the frame event is wired up
        player.enable_frame_server()?;

        for source in EventSource::REGISTRATION_ORDER {
            subscriptions.subscribe(player, source, self.handler_for(source))?;
        }
        Ok(())
    }

    fn handler_for(&self, source: EventSource) -> SignalHandler<R::Player> {
        match source {
            EventSource::VideoFrameAvailable => {
                let textures = self.textures.clone();
                Arc::new(move |player: &R::Player, _signal: EngineSignal| {
                    if let Err(e) = textures.copy_frame_to_surface(player) {
                        warn!("Failed to copy video frame: {}", e);
                        return Err(e);
                    }
                    Ok(())
                })
            }
            _ => {
                let bridge = self.bridge.clone();
                Arc::new(move |player: &R::Player, signal: EngineSignal| {
                    bridge.dispatch(player, &signal)
                })
            }
        }
    }

    /// Allocate (or reallocate) the shared texture and return its shader view
    pub fn create_playback_texture(&self, width: u32, height: u32) -> Result<ViewOf<G>> {
        let state = self.state.lock();
        if state.shut_down {
            return Err(PlaybackError::NotInitialized);
        }
        info!("CreatePlaybackTexture {}x{}", width, height);
        self.textures.create_or_resize(width, height)
    }

    /// Bind a new source; opening completes asynchronously
    ///
    /// The outcome arrives as an `Opened` or `Failed` notification.
    pub fn load_content(&self, location: &str) -> Result<()> {
        let state = self.state.lock();
        let player = state.player.as_ref().ok_or(PlaybackError::NotInitialized)?;
        if location.is_empty() {
            return Err(PlaybackError::InvalidArgument(
                "content location is empty".into(),
            ));
        }

        info!("LoadContent {}", location);
        player.set_source(location).map_err(|e| {
            error!("Failed to load {}: {}", location, e);
            e
        })
    }

    pub fn play(&self) -> Result<()> {
        self.transport("play", |player| player.play())
    }

    pub fn pause(&self) -> Result<()> {
        self.transport("pause", |player| player.pause())
    }

    /// Unbind the source; later transport calls are harmless no-ops
    pub fn stop(&self) -> Result<()> {
        self.transport("stop", |player| player.clear_source())
    }

    pub fn position(&self) -> Result<Ticks> {
        let position = self.query("position", Ticks::ZERO, |s| s.position())?;
        trace!("GetPosition {}", position.0);
        Ok(position)
    }

    pub fn duration(&self) -> Result<Ticks> {
        self.query("duration", Ticks::ZERO, |s| s.natural_duration())
    }

    pub fn playback_rate(&self) -> Result<f64> {
        self.query("playback_rate", 1.0, |s| s.playback_rate())
    }

    pub fn playback_state(&self) -> Result<PlaybackState> {
        self.query("playback_state", PlaybackState::None, |s| s.playback_state())
    }

    /// Seek; fails with `SeekNotSupported` when the session cannot seek
    pub fn set_position(&self, position: Ticks) -> Result<()> {
        if position.0 < 0 {
            return Err(PlaybackError::InvalidArgument(format!(
                "position {} is negative",
                position.0
            )));
        }

        let state = self.state.lock();
        let Some(player) = state.player.as_ref() else {
            debug!("SetPosition with no player");
            return Ok(());
        };
        let session = player.session();
        if !session.can_seek()? {
            warn!("SetPosition {} rejected: media cannot seek", position.0);
            return Err(PlaybackError::SeekNotSupported);
        }

        info!("SetPosition {}", position.0);
        session.set_position(position).map_err(|e| {
            error!("SetPosition {} failed: {}", position.0, e);
            e
        })
    }

    pub fn set_playback_rate(&self, rate: f64) -> Result<()> {
        if !rate.is_finite() {
            return Err(PlaybackError::InvalidArgument(format!(
                "playback rate {} is not finite",
                rate
            )));
        }
        info!("SetPlaybackRate {}", rate);
        let state = self.state.lock();
        match state.player.as_ref() {
            Some(player) => player.session().set_playback_rate(rate),
            None => Ok(()),
        }
    }

    fn transport(
        &self,
        operation: &'static str,
        call: impl FnOnce(&R::Player) -> Result<()>,
    ) -> Result<()> {
        let state = self.state.lock();
        let Some(player) = state.player.as_ref() else {
            debug!("{} with no player", operation);
            return Ok(());
        };
        info!("{}", operation);
        call(player).map_err(|e| {
            error!("{} failed: {}", operation, e);
            match e {
                PlaybackError::EngineCall { .. } => e,
                other => PlaybackError::engine(operation, other.to_string()),
            }
        })
    }

    fn query<T>(
        &self,
        operation: &'static str,
        unbound: T,
        read: impl FnOnce(&<R::Player as MediaPlayer>::Session) -> Result<T>,
    ) -> Result<T> {
        let state = self.state.lock();
        match state.player.as_ref() {
            Some(player) => read(player.session()).map_err(|e| {
                error!("{} failed: {}", operation, e);
                e
            }),
            None => Ok(unbound),
        }
    }
}

impl<G: GpuInterop, R: DecodeRuntime> PlaybackEngine<G, R> {
    /// Description of the current texture, zeroed when none exists
    pub fn texture_description(&self) -> TextureDescription {
        self.textures.description()
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Release everything in dependency order; later calls do nothing
    ///
    /// Texture first, then event registrations newest first, then the source
    /// binding and the player, then the device-manager lock, then devices.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shut_down {
            debug!("Playback engine already shut down");
            return;
        }
        state.shut_down = true;
        info!("Shutting down playback engine");

        self.textures.release();

        if let Some(player) = state.player.take() {
            let removed = state.subscriptions.unsubscribe_all(&player);
            debug!("Removed {} event subscriptions", removed);
            if let Err(e) = player.clear_source() {
                warn!("Failed to stop player during shutdown: {}", e);
            }
            drop(player);
        }

        if let Some(mut lock) = state.device_manager.take() {
            lock.release();
        }

        self.bridge.disconnect();
        self.textures.release_devices();
        info!("Playback engine shut down");
    }
}

impl<G: GpuInterop, R: DecodeRuntime> Drop for PlaybackEngine<G, R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::notification::{notification_channel, NotificationEvent};
    use crate::media::simulated::{
        SimulatedGpu, SimulatedMedia, SimulatedMediaLibrary, SimulatedRenderDevice,
        SimulatedRuntime, FILE_NOT_FOUND,
    };
    use std::sync::mpsc::Receiver;

    type SimEngine = PlaybackEngine<SimulatedGpu, SimulatedRuntime>;

    struct Harness {
        gpu: Arc<SimulatedGpu>,
        runtime: Arc<SimulatedRuntime>,
        engine: SimEngine,
        events: Receiver<NotificationEvent>,
    }

    fn library() -> SimulatedMediaLibrary {
        let library = SimulatedMediaLibrary::new();
        library.insert(
            "file:///movie.mp4",
            SimulatedMedia::new(1280, 720, Ticks::from_millis(200))
                .frame_interval(Ticks::from_millis(40)),
        );
        library.insert(
            "https://example.com/live",
            SimulatedMedia::new(640, 480, Ticks::from_secs(60)).seekable(false),
        );
        library
    }

    fn harness_with(config: PlaybackConfig) -> Harness {
        let gpu = Arc::new(SimulatedGpu::new());
        let runtime = Arc::new(SimulatedRuntime::new(library()));
        let (callback, events) = notification_channel();
        let engine = SimEngine::initialize(
            gpu.clone(),
            runtime.clone(),
            gpu.render_device(0),
            callback,
            config,
        )
        .unwrap();
        Harness {
            gpu,
            runtime,
            engine,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(PlaybackConfig::default())
    }

    fn states(events: &[NotificationEvent]) -> Vec<PlaybackState> {
        let mut states: Vec<PlaybackState> = events
            .iter()
            .filter_map(|event| match event {
                NotificationEvent::StateChanged { state, .. } => Some(*state),
                _ => None,
            })
            .collect();
        states.dedup();
        states
    }

    #[test]
    fn test_initialize_wires_everything() {
        let h = harness();
        let player = h.runtime.player().unwrap();
        assert_eq!(player.subscription_count(), 6);
        assert!(player.frame_server_enabled());

        let stats = h.runtime.stats();
        assert!(stats.locked);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.bound_adapter, Some(0));
        assert_eq!(h.gpu.stats().live_decode_devices, 1);
        assert_eq!(h.engine.playback_state().unwrap(), PlaybackState::None);
    }

    #[test]
    fn test_initialize_rejects_lost_device() {
        let gpu = Arc::new(SimulatedGpu::new());
        let runtime = Arc::new(SimulatedRuntime::new(library()));
        let (callback, _events) = notification_channel();
        let result = SimEngine::initialize(
            gpu.clone(),
            runtime.clone(),
            SimulatedRenderDevice::lost(),
            callback,
            PlaybackConfig::default(),
        );
        assert!(matches!(result, Err(PlaybackError::InvalidArgument(_))));
        assert_eq!(runtime.stats().locks, 0);
    }

    #[test]
    fn test_failed_initialize_releases_partial_state() {
        let gpu = Arc::new(SimulatedGpu::new());
        let runtime = Arc::new(SimulatedRuntime::new(library()));
        runtime.fail_player_creation();
        let (callback, _events) = notification_channel();
        let result = SimEngine::initialize(
            gpu.clone(),
            runtime.clone(),
            gpu.render_device(0),
            callback,
            PlaybackConfig::default(),
        );
        assert!(matches!(result, Err(PlaybackError::DeviceCreationFailed(_))));

        let stats = runtime.stats();
        assert!(!stats.locked);
        assert_eq!(stats.unlocks, 1);
        assert_eq!(gpu.stats().live_decode_devices, 0);
    }

    #[test]
    fn test_second_engine_cannot_lock_device_manager() {
        let h = harness();
        let (callback, _events) = notification_channel();
        let result = SimEngine::initialize(
            h.gpu.clone(),
            h.runtime.clone(),
            h.gpu.render_device(0),
            callback,
            PlaybackConfig::default(),
        );
        assert!(matches!(result, Err(PlaybackError::DeviceCreationFailed(_))));
        assert!(h.runtime.stats().locked);
    }

    #[test]
    fn test_play_to_end() {
        let h = harness();
        // Texture size is the host's choice and differs from the natural size
        let view = h.engine.create_playback_texture(640, 360).unwrap();
        assert_eq!((view.width(), view.height()), (640, 360));
        h.engine.load_content("file:///movie.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        assert!(decoder.open());
        h.engine.play().unwrap();
        assert_eq!(decoder.run(100), 5);

        let events: Vec<_> = h.events.try_iter().collect();
        let opened: Vec<_> = events
            .iter()
            .filter(|event| matches!(event, NotificationEvent::Opened(_)))
            .collect();
        assert_eq!(opened.len(), 1);
        if let NotificationEvent::Opened(description) = opened[0] {
            assert_eq!((description.width, description.height), (1280, 720));
            assert_eq!(description.duration, Ticks::from_millis(200));
            assert!(description.can_seek);
        }

        let states = states(&events);
        let playing = states
            .iter()
            .position(|state| *state == PlaybackState::Playing)
            .unwrap();
        assert_eq!(states[playing - 1], PlaybackState::Buffering);
        assert_eq!(states.first(), Some(&PlaybackState::Opening));

        let ended = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    NotificationEvent::StateChanged {
                        state: PlaybackState::Ended,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(ended, 1);
        assert!(matches!(
            events.last(),
            Some(NotificationEvent::StateChanged {
                state: PlaybackState::Ended,
                ..
            })
        ));

        assert_eq!(view.frames_written(), 5);
        assert_eq!(view.last_frame_position(), Some(Ticks::from_millis(200)));
        assert!(!decoder.render_frame());
        assert_eq!(view.frames_written(), 5);
    }

    #[test]
    fn test_auto_play_starts_after_open() {
        let h = harness_with(PlaybackConfig {
            auto_play: true,
            ..PlaybackConfig::default()
        });
        h.engine.load_content("file:///movie.mp4").unwrap();
        h.runtime.decoder().unwrap().open();
        assert_eq!(h.engine.playback_state().unwrap(), PlaybackState::Playing);

        let events: Vec<_> = h.events.try_iter().collect();
        assert_eq!(
            states(&events),
            vec![
                PlaybackState::Opening,
                PlaybackState::Buffering,
                PlaybackState::Playing
            ]
        );
    }

    #[test]
    fn test_frames_before_texture_are_dropped() {
        let h = harness();
        h.engine.load_content("file:///movie.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        decoder.open();
        h.engine.play().unwrap();
        decoder.pump();
        assert!(decoder.render_frame());
        assert_eq!(h.runtime.player().unwrap().frames_copied(), 0);

        let view = h.engine.create_playback_texture(1280, 720).unwrap();
        assert!(decoder.render_frame());
        assert_eq!(view.frames_written(), 1);
    }

    #[test]
    fn test_unresolvable_location_fails_then_recovers() {
        let h = harness();
        h.engine.load_content("file:///missing.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        decoder.open();

        let events: Vec<_> = h.events.try_iter().collect();
        let failures: Vec<_> = events.iter().filter_map(|e| e.as_error()).collect();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            PlaybackError::DecoderFailed { code, .. } if code == FILE_NOT_FOUND
        ));
        assert!(!events
            .iter()
            .any(|event| matches!(event, NotificationEvent::Opened(_))));

        h.engine.load_content("file:///movie.mp4").unwrap();
        decoder.open();
        assert!(h
            .events
            .try_iter()
            .any(|event| matches!(event, NotificationEvent::Opened(_))));
    }

    #[test]
    fn test_load_content_errors() {
        let h = harness();
        assert!(matches!(
            h.engine.load_content(""),
            Err(PlaybackError::InvalidArgument(_))
        ));
        assert!(matches!(
            h.engine.load_content("not a uri"),
            Err(PlaybackError::SourceResolutionFailed(_))
        ));

        h.runtime.player().unwrap().reject_next_bind();
        assert!(matches!(
            h.engine.load_content("file:///movie.mp4"),
            Err(PlaybackError::BindingFailed(_))
        ));
        h.engine.load_content("file:///movie.mp4").unwrap();
    }

    #[test]
    fn test_seek_on_non_seekable_source() {
        let h = harness();
        h.engine.load_content("https://example.com/live").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        decoder.open();
        h.engine.play().unwrap();
        assert_eq!(decoder.run(3), 3);

        let before = h.engine.position().unwrap();
        assert!(before > Ticks::ZERO);
        assert_eq!(
            h.engine.set_position(Ticks::from_secs(10)),
            Err(PlaybackError::SeekNotSupported)
        );
        assert_eq!(h.engine.position().unwrap(), before);
    }

    #[test]
    fn test_seek_and_rate() {
        let h = harness();
        h.engine.load_content("file:///movie.mp4").unwrap();
        h.runtime.decoder().unwrap().open();

        h.engine.set_position(Ticks::from_millis(120)).unwrap();
        assert_eq!(h.engine.position().unwrap(), Ticks::from_millis(120));
        assert_eq!(h.engine.duration().unwrap(), Ticks::from_millis(200));
        assert!(h.engine.set_position(Ticks(-1)).is_err());

        h.engine.set_playback_rate(2.0).unwrap();
        assert_eq!(h.engine.playback_rate().unwrap(), 2.0);
        assert!(h.engine.set_playback_rate(f64::NAN).is_err());
    }

    #[test]
    fn test_initial_playback_rate_applied() {
        let h = harness_with(PlaybackConfig {
            initial_playback_rate: 0.5,
            ..PlaybackConfig::default()
        });
        assert_eq!(h.engine.playback_rate().unwrap(), 0.5);
    }

    #[test]
    fn test_stop_then_transport_is_harmless() {
        let h = harness();
        h.engine.load_content("file:///movie.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        decoder.open();

        h.engine.stop().unwrap();
        h.engine.play().unwrap();
        h.engine.pause().unwrap();
        assert_eq!(h.engine.position().unwrap(), Ticks::ZERO);
        assert_eq!(h.engine.duration().unwrap(), Ticks::ZERO);
        assert_eq!(h.engine.playback_state().unwrap(), PlaybackState::None);
        assert!(!decoder.open());
        assert_eq!(decoder.run(10), 0);
    }

    #[test]
    fn test_shutdown_order_and_idempotence() {
        let h = harness();
        h.engine.create_playback_texture(320, 240).unwrap();
        h.engine.load_content("file:///movie.mp4").unwrap();
        let player = h.runtime.player().unwrap();

        h.engine.shutdown();
        h.engine.shutdown();
        assert!(h.engine.is_shut_down());

        let mut expected = EventSource::REGISTRATION_ORDER.to_vec();
        expected.reverse();
        assert_eq!(player.unsubscribe_log(), expected);
        assert_eq!(player.subscription_count(), 0);
        assert_eq!(player.bound_location(), None);

        let stats = h.runtime.stats();
        assert!(!stats.locked);
        assert_eq!(stats.unlocks, 1);
        assert_eq!(h.gpu.live_handles(), 0);
        assert_eq!(h.gpu.stats().live_decode_devices, 0);

        assert!(h.engine.texture_description().is_zeroed());
        assert_eq!(
            h.engine.create_playback_texture(16, 16).unwrap_err(),
            PlaybackError::NotInitialized
        );
        assert_eq!(
            h.engine.load_content("file:///movie.mp4"),
            Err(PlaybackError::NotInitialized)
        );
        h.engine.play().unwrap();
    }

    #[test]
    fn test_shutdown_without_load() {
        let h = harness();
        h.engine.shutdown();
        assert_eq!(h.runtime.stats().unlocks, 1);
        assert_eq!(h.gpu.stats().live_decode_devices, 0);
    }

    #[test]
    fn test_drop_releases_like_shutdown() {
        let h = harness();
        h.engine.create_playback_texture(64, 64).unwrap();
        let Harness {
            gpu,
            runtime,
            engine,
            ..
        } = h;
        drop(engine);
        assert!(!runtime.stats().locked);
        assert_eq!(gpu.live_handles(), 0);
        assert_eq!(runtime.player().unwrap().subscription_count(), 0);
    }

    #[test]
    fn test_no_events_after_shutdown() {
        let h = harness();
        h.engine.load_content("file:///movie.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        h.engine.shutdown();
        decoder.open();
        assert_eq!(h.events.try_iter().count(), 0);
    }

    #[test]
    fn test_resize_during_playback() {
        let h = harness_with(PlaybackConfig {
            looping: true,
            ..PlaybackConfig::default()
        });
        h.engine.create_playback_texture(320, 240).unwrap();
        h.engine.load_content("file:///movie.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        decoder.open();
        h.engine.play().unwrap();
        decoder.run(3);

        let view = h.engine.create_playback_texture(1280, 720).unwrap();
        assert_eq!(h.gpu.live_handles(), 1);
        assert_eq!(decoder.run(4), 4);
        assert_eq!(view.frames_written(), 4);
        assert_eq!(h.engine.texture_description().width, 1280);
    }

    #[test]
    fn test_frame_callbacks_from_threads() {
        let h = harness_with(PlaybackConfig {
            looping: true,
            ..PlaybackConfig::default()
        });
        let view = h.engine.create_playback_texture(640, 360).unwrap();
        h.engine.load_content("file:///movie.mp4").unwrap();
        let decoder = h.runtime.decoder().unwrap();
        decoder.open();
        h.engine.play().unwrap();
        decoder.pump();

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let decoder = decoder.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        decoder.render_frame();
                    }
                })
            })
            .collect();
        for _ in 0..20 {
            h.engine.position().unwrap();
        }
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(view.frames_written(), 200);
    }
}
