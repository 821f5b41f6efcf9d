//! Decode engine device-manager lock
//!
//! The decode engine keeps one process-wide device manager. We lock it before
//! the player exists, point it at our decode device and hold it until the
//! player and every resource derived from the decode device are gone.

use log::{debug, error, info};
use std::sync::Arc;

use super::player::MediaPlayer;
use crate::config::PlaybackConfig;
use crate::error::{PlaybackError, Result};

/// Token handed out by the lock and required to reset the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetToken(pub u32);

/// Decode engine runtime: device-manager access and player activation
pub trait DecodeRuntime: Send + Sync + 'static {
    type DecodeDevice;
    type DeviceManager: Send + Sync + 'static;
    type Player: MediaPlayer;

    /// Fails if the manager is already locked
    fn lock_device_manager(&self) -> Result<(ResetToken, Self::DeviceManager)>;
    fn reset_device(
        &self,
        manager: &Self::DeviceManager,
        device: &Self::DecodeDevice,
        token: ResetToken,
    ) -> Result<()>;
    fn unlock_device_manager(&self);

    fn create_player(&self, config: &PlaybackConfig) -> Result<Self::Player>;
}

/// Exclusively held device-manager association
///
/// Released exactly once, either explicitly or on drop.
pub struct DeviceManagerLock<R: DecodeRuntime> {
    runtime: Arc<R>,
    held: Option<(ResetToken, R::DeviceManager)>,
}

impl<R: DecodeRuntime> DeviceManagerLock<R> {
    pub fn acquire(runtime: Arc<R>) -> Result<Self> {
        let (token, manager) = runtime.lock_device_manager().map_err(|e| {
            error!("Failed to lock device manager: {}", e);
            into_device_error(e)
        })?;
        info!("Device manager locked (reset token {})", token.0);
        Ok(Self {
            runtime,
            held: Some((token, manager)),
        })
    }

    /// Associate the decode device with the locked manager
    pub fn bind(&self, device: &R::DecodeDevice) -> Result<()> {
        let (token, manager) = self.held.as_ref().ok_or_else(|| {
            PlaybackError::DeviceCreationFailed("device manager lock already released".into())
        })?;
        self.runtime
            .reset_device(manager, device, *token)
            .map_err(|e| {
                error!("Failed to bind decode device to device manager: {}", e);
                into_device_error(e)
            })?;
        debug!("Decode device bound to device manager");
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    pub fn release(&mut self) {
        if self.held.take().is_some() {
            self.runtime.unlock_device_manager();
            info!("Device manager unlocked");
        }
    }
}

impl<R: DecodeRuntime> Drop for DeviceManagerLock<R> {
    fn drop(&mut self) {
        self.release();
    }
}

fn into_device_error(e: PlaybackError) -> PlaybackError {
    match e {
        PlaybackError::DeviceCreationFailed(_) => e,
        other => PlaybackError::DeviceCreationFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::gpu::{DevicePair, GpuInterop};
    use crate::media::simulated::{SimulatedGpu, SimulatedMediaLibrary, SimulatedRuntime};

    fn decode_device(gpu: &SimulatedGpu) -> <SimulatedGpu as GpuInterop>::DecodeDevice {
        DevicePair::resolve(gpu, gpu.render_device(0)).unwrap().decode
    }

    #[test]
    fn test_acquire_bind_release() {
        let gpu = SimulatedGpu::new();
        let runtime = Arc::new(SimulatedRuntime::new(SimulatedMediaLibrary::new()));
        let mut lock = DeviceManagerLock::acquire(runtime.clone()).unwrap();
        lock.bind(&decode_device(&gpu)).unwrap();

        let stats = runtime.stats();
        assert!(stats.locked);
        assert_eq!(stats.resets, 1);
        assert_eq!(stats.bound_adapter, Some(0));

        lock.release();
        lock.release();
        assert!(!lock.is_held());
        let stats = runtime.stats();
        assert!(!stats.locked);
        assert_eq!(stats.unlocks, 1);
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let runtime = Arc::new(SimulatedRuntime::new(SimulatedMediaLibrary::new()));
        let _lock = DeviceManagerLock::acquire(runtime.clone()).unwrap();
        assert!(matches!(
            DeviceManagerLock::acquire(runtime.clone()),
            Err(PlaybackError::DeviceCreationFailed(_))
        ));
    }

    #[test]
    fn test_drop_releases() {
        let runtime = Arc::new(SimulatedRuntime::new(SimulatedMediaLibrary::new()));
        {
            let _lock = DeviceManagerLock::acquire(runtime.clone()).unwrap();
        }
        assert_eq!(runtime.stats().unlocks, 1);
        assert!(DeviceManagerLock::acquire(runtime).is_ok());
    }

    #[test]
    fn test_bind_after_release_fails() {
        let gpu = SimulatedGpu::new();
        let runtime = Arc::new(SimulatedRuntime::new(SimulatedMediaLibrary::new()));
        let mut lock = DeviceManagerLock::acquire(runtime).unwrap();
        lock.release();
        assert!(lock.bind(&decode_device(&gpu)).is_err());
    }
}
