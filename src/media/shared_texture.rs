//! Shared playback texture
//!
//! Owns the single texture the decode engine copies frames into and the
//! renderer samples from. The renderer reads on its own thread with no extra
//! signal; whichever frame was copied last is the one it sees.
//!
//! Resizing is destructive: the previous texture, including its exported
//! handle, is released before the replacement is allocated. Resize while
//! frames are still arriving for the old size by stopping playback first.

use log::{debug, error, info, trace};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use super::gpu::{
    DevicePair, ExportedHandle, GpuInterop, SharedTexture, SurfaceOf, TextureDescription, ViewOf,
};
use super::player::MediaPlayer;
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

pub struct SharedTextureManager<G: GpuInterop> {
    gpu: Arc<G>,
    devices: RwLock<Option<DevicePair<G>>>,
    handle_name: Option<String>,
    max_dimension: u32,
    current: Mutex<Option<G::Texture>>,
}

impl<G: GpuInterop> SharedTextureManager<G> {
    pub fn new(gpu: Arc<G>, devices: DevicePair<G>, config: &PlaybackConfig) -> Self {
        Self {
            gpu,
            devices: RwLock::new(Some(devices)),
            handle_name: config.shared_handle_name.clone(),
            max_dimension: config.max_texture_dimension,
            current: Mutex::new(None),
        }
    }

    /// Allocate a BGRA8 texture of the given size, replacing any existing one
    ///
    /// Returns the renderer-side shader view.
    pub fn create_or_resize(&self, width: u32, height: u32) -> Result<ViewOf<G>> {
        if width < 1 || height < 1 {
            error!("Rejecting playback texture {}x{}", width, height);
            return Err(PlaybackError::InvalidArgument(format!(
                "playback texture must be at least 1x1, got {}x{}",
                width, height
            )));
        }
        if width > self.max_dimension || height > self.max_dimension {
            error!(
                "Rejecting playback texture {}x{} (limit {})",
                width, height, self.max_dimension
            );
            return Err(PlaybackError::InvalidArgument(format!(
                "playback texture {}x{} exceeds the {} limit",
                width, height, self.max_dimension
            )));
        }

        let devices = self.devices.read();
        let devices = devices.as_ref().ok_or(PlaybackError::NotInitialized)?;

        let mut current = self.current.lock();
        if let Some(previous) = current.take() {
            let desc = previous.description();
            info!(
                "Releasing {}x{} playback texture before resize",
                desc.width, desc.height
            );
            drop(previous);
        }

        let desc = TextureDescription::shared_bgra(width, height);
        let texture = self
            .gpu
            .create_shared_texture(devices, &desc, self.handle_name.as_deref())
            .map_err(|e| {
                error!("Failed to create {}x{} playback texture: {}", width, height, e);
                e
            })?;

        info!(
            "Created {}x{} shared playback texture (handle 0x{:x})",
            width,
            height,
            texture.exported_handle().0
        );

        let view = texture.view();
        *current = Some(texture);
        Ok(view)
    }

    /// Copy the player's current frame into the decoder-side surface
    ///
    /// Returns `Ok(false)` when no texture exists yet, or any more.
    pub fn copy_frame_to_surface<P>(&self, player: &P) -> Result<bool>
    where
        P: MediaPlayer<Surface = SurfaceOf<G>>,
    {
        let current = self.current.lock();
        match current.as_ref() {
            Some(texture) => {
                player.copy_frame_to_surface(texture.surface())?;
                trace!("Copied frame into shared texture");
                Ok(true)
            }
            None => {
                trace!("Frame available with no playback texture");
                Ok(false)
            }
        }
    }

    /// Release the current texture; safe to call when nothing is allocated
    pub fn release(&self) {
        if let Some(texture) = self.current.lock().take() {
            let desc = *texture.description();
            drop(texture);
            info!("Released {}x{} playback texture", desc.width, desc.height);
        }
    }

    /// Release the texture and drop our references to both devices
    pub fn release_devices(&self) {
        self.release();
        if self.devices.write().take().is_some() {
            debug!("Released render and decode devices");
        }
    }

    /// Zeroed when no texture is allocated
    pub fn description(&self) -> TextureDescription {
        self.current
            .lock()
            .as_ref()
            .map(|texture| *texture.description())
            .unwrap_or_default()
    }

    pub fn current_view(&self) -> Option<ViewOf<G>> {
        self.current.lock().as_ref().map(|texture| texture.view())
    }

    pub fn exported_handle(&self) -> Option<ExportedHandle> {
        self.current
            .lock()
            .as_ref()
            .map(|texture| texture.exported_handle())
    }

    pub fn decode_device(&self) -> Option<G::DecodeDevice> {
        self.devices
            .read()
            .as_ref()
            .map(|devices| devices.decode.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::gpu::TextureFormat;
    use crate::media::simulated::{
        SimulatedGpu, SimulatedMedia, SimulatedMediaLibrary, SimulatedPlayer, TextureStep,
    };
    use crate::media::ticks::Ticks;

    fn manager(gpu: &Arc<SimulatedGpu>) -> SharedTextureManager<SimulatedGpu> {
        let devices = DevicePair::resolve(gpu.as_ref(), gpu.render_device(0)).unwrap();
        SharedTextureManager::new(gpu.clone(), devices, &PlaybackConfig::default())
    }

    #[test]
    fn test_create_matches_request() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        for (width, height) in [(1, 1), (1280, 720), (1920, 1080), (7, 3)] {
            let view = textures.create_or_resize(width, height).unwrap();
            assert_eq!((view.width(), view.height()), (width, height));
            let desc = textures.description();
            assert_eq!(desc.format, TextureFormat::Bgra8Unorm);
            assert!(desc.shared_nt_handle);
        }
    }

    #[test]
    fn test_zero_size_rejected_without_allocating() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        assert!(matches!(
            textures.create_or_resize(0, 720),
            Err(PlaybackError::InvalidArgument(_))
        ));
        assert!(matches!(
            textures.create_or_resize(1280, 0),
            Err(PlaybackError::InvalidArgument(_))
        ));
        assert_eq!(gpu.stats().textures_created, 0);
        assert_eq!(gpu.live_handles(), 0);
        assert!(textures.description().is_zeroed());
    }

    #[test]
    fn test_oversized_rejected() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        assert!(textures.create_or_resize(16385, 16).is_err());
        assert_eq!(gpu.live_handles(), 0);
    }

    #[test]
    fn test_resize_keeps_one_live_handle() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        let mut handles = Vec::new();
        for n in 1..=10 {
            textures.create_or_resize(64 * n, 32 * n).unwrap();
            assert_eq!(gpu.live_handles(), 1);
            handles.push(textures.exported_handle().unwrap());
        }
        handles.dedup();
        assert_eq!(handles.len(), 10);

        let stats = gpu.stats();
        assert_eq!(stats.handles_exported, 10);
        assert_eq!(stats.handles_closed, 9);
        assert_eq!(stats.textures_released, 9);
    }

    #[test]
    fn test_failed_import_closes_handle() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        for step in [
            TextureStep::CreateTexture,
            TextureStep::CreateView,
            TextureStep::ExportHandle,
            TextureStep::ImportHandle,
            TextureStep::WrapSurface,
        ] {
            gpu.fail_next(step);
            assert!(matches!(
                textures.create_or_resize(320, 240),
                Err(PlaybackError::ResourceCreationFailed { .. })
            ));
            assert_eq!(gpu.live_handles(), 0, "handle leaked after {:?}", step);
            assert!(textures.current_view().is_none());
        }
    }

    #[test]
    fn test_failed_resize_releases_previous() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        textures.create_or_resize(320, 240).unwrap();
        gpu.fail_next(TextureStep::ImportHandle);
        assert!(textures.create_or_resize(640, 480).is_err());
        assert_eq!(gpu.live_handles(), 0);
        assert!(textures.description().is_zeroed());
    }

    #[test]
    fn test_release_is_idempotent() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        textures.release();
        textures.create_or_resize(16, 16).unwrap();
        textures.release();
        textures.release();
        assert_eq!(gpu.live_handles(), 0);
        assert_eq!(gpu.stats().textures_released, 1);
        assert!(textures.description().is_zeroed());
    }

    #[test]
    fn test_copy_without_texture_is_noop() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        let player = SimulatedPlayer::new(SimulatedMediaLibrary::new());
        assert!(!textures.copy_frame_to_surface(&player).unwrap());
    }

    #[test]
    fn test_copied_frame_visible_through_view() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        let view = textures.create_or_resize(640, 360).unwrap();

        let library = SimulatedMediaLibrary::new();
        library.insert(
            "file:///clip.mp4",
            SimulatedMedia::new(640, 360, Ticks::from_secs(1)),
        );
        let player = SimulatedPlayer::new(library);
        player.set_source("file:///clip.mp4").unwrap();
        let decoder = player.decoder();
        decoder.open();
        player.play().unwrap();
        decoder.pump();
        assert!(decoder.render_frame());

        assert!(textures.copy_frame_to_surface(&player).unwrap());
        assert_eq!(view.frames_written(), 1);
        assert!(view.last_frame_position().is_some());
    }

    #[test]
    fn test_release_devices_blocks_create() {
        let gpu = Arc::new(SimulatedGpu::new());
        let textures = manager(&gpu);
        textures.create_or_resize(16, 16).unwrap();
        textures.release_devices();
        assert_eq!(gpu.stats().live_decode_devices, 0);
        assert_eq!(
            textures.create_or_resize(16, 16).unwrap_err(),
            PlaybackError::NotInitialized
        );
    }
}
