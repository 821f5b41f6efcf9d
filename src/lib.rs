//! GPU Video Playback
//!
//! Plays video through the platform decode engine straight into a GPU texture
//! shared with the host renderer. Decoded frames never touch system memory:
//! the engine copies each frame into a texture created on the renderer's
//! adapter and exported through an NT handle, and the renderer samples it
//! through a shader view.
//!
//! The engine core is platform independent. Windows builds add the D3D11 and
//! `Windows.Media.Playback` backends plus a C ABI for native hosts; every
//! platform gets a simulated backend for tests and headless use.

pub mod config;
pub mod error;
pub mod media;

#[cfg(windows)]
pub mod ffi;

pub use config::PlaybackConfig;
pub use error::{PlaybackError, Result};
pub use media::{NotificationEvent, PlaybackEngine, PlaybackState, Ticks};

/// Install `env_logger` with `default_filter` unless `RUST_LOG` is set
///
/// Safe to call more than once; only the first call installs a logger.
pub fn init_logging(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_ok()
    {
        log::debug!("Logging initialized ({})", default_filter);
    }
}
