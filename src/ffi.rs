//! C ABI for native hosts
//!
//! One playback engine per process, held in a global slot. Every export
//! returns an HRESULT; notifications reach the host as a packed
//! [`PlaybackStateMessage`] on decode engine threads.

use log::{error, info, warn};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::Arc;
use windows::core::{Interface, PCWSTR};
use windows::Win32::Graphics::Direct3D11::ID3D11Device;

use crate::config::PlaybackConfig;
use crate::error::{hresult, PlaybackError, Result};
use crate::media::d3d11::{D3D11Device, D3D11Interop};
use crate::media::message::PlaybackStateMessage;
use crate::media::notification::{NotificationEvent, StateCallback};
use crate::media::ticks::Ticks;
use crate::media::winrt_player::MediaFoundationRuntime;
use crate::media::WindowsPlaybackEngine;

/// Host notification callback
pub type NativeStateCallback = extern "system" fn(PlaybackStateMessage);

static ENGINE: Mutex<Option<Arc<WindowsPlaybackEngine>>> = Mutex::new(None);

fn current_engine() -> Result<Arc<WindowsPlaybackEngine>> {
    ENGINE.lock().clone().ok_or(PlaybackError::NotInitialized)
}

fn to_hresult(operation: &str, result: Result<()>) -> i32 {
    match result {
        Ok(()) => hresult::S_OK,
        Err(e) => {
            error!("{} failed: {}", operation, e);
            e.hresult()
        }
    }
}

fn with_engine(operation: &str, call: impl FnOnce(&WindowsPlaybackEngine) -> Result<()>) -> i32 {
    to_hresult(operation, current_engine().and_then(|engine| call(&engine)))
}

/// Write `value` through `out`, or fail with `E_POINTER` for a null pointer
///
/// # Safety
/// `out` must be null or valid for one write.
unsafe fn write_out<T>(out: *mut T, value: Result<T>) -> i32 {
    if out.is_null() {
        return hresult::E_POINTER;
    }
    match value {
        Ok(value) => {
            out.write(value);
            hresult::S_OK
        }
        Err(e) => e.hresult(),
    }
}

/// Create the process-wide engine on the host's D3D11 device
///
/// # Safety
/// `device` must be a valid `ID3D11Device` pointer or null.
#[no_mangle]
pub unsafe extern "system" fn CreateMediaPlayback(
    device: *mut c_void,
    callback: Option<NativeStateCallback>,
) -> i32 {
    let config = PlaybackConfig::default();
    crate::init_logging(&config.log_filter);

    let Some(device) = ID3D11Device::from_raw_borrowed(&device) else {
        error!("CreateMediaPlayback called without a device");
        return hresult::E_INVALIDARG;
    };
    let Some(callback) = callback else {
        error!("CreateMediaPlayback called without a callback");
        return hresult::E_INVALIDARG;
    };

    let mut slot = ENGINE.lock();
    if let Some(previous) = slot.take() {
        warn!("CreateMediaPlayback replacing an existing engine");
        previous.shutdown();
    }

    let notify: StateCallback = Arc::new(move |event: NotificationEvent| {
        callback(PlaybackStateMessage::from(&event));
    });

    match WindowsPlaybackEngine::initialize(
        Arc::new(D3D11Interop::new()),
        Arc::new(MediaFoundationRuntime::new()),
        D3D11Device(device.clone()),
        notify,
        config,
    ) {
        Ok(engine) => {
            *slot = Some(Arc::new(engine));
            info!("CreateMediaPlayback succeeded");
            hresult::S_OK
        }
        Err(e) => {
            error!("CreateMediaPlayback failed: {}", e);
            e.hresult()
        }
    }
}

#[no_mangle]
pub extern "system" fn ReleaseMediaPlayback() {
    let engine = ENGINE.lock().take();
    match engine {
        Some(engine) => engine.shutdown(),
        None => info!("ReleaseMediaPlayback with no engine"),
    }
}

/// Create or resize the playback texture
///
/// On success `*texture` receives an owned `ID3D11ShaderResourceView`.
///
/// # Safety
/// `texture` must be null or valid for one pointer-sized write.
#[no_mangle]
pub unsafe extern "system" fn CreatePlaybackTexture(
    width: u32,
    height: u32,
    texture: *mut *mut c_void,
) -> i32 {
    let view = current_engine().and_then(|engine| engine.create_playback_texture(width, height));
    if let Err(e) = &view {
        error!("CreatePlaybackTexture failed: {}", e);
    }
    write_out(texture, view.map(|view| view.0.into_raw()))
}

/// # Safety
/// `location` must be null or a NUL-terminated UTF-16 string.
#[no_mangle]
pub unsafe extern "system" fn LoadContent(location: *const u16) -> i32 {
    if location.is_null() {
        return hresult::E_INVALIDARG;
    }
    let location = match PCWSTR(location).to_string() {
        Ok(location) => location,
        Err(e) => {
            error!("LoadContent received invalid UTF-16: {}", e);
            return hresult::E_INVALIDARG;
        }
    };
    with_engine("LoadContent", |engine| engine.load_content(&location))
}

#[no_mangle]
pub extern "system" fn Play() -> i32 {
    with_engine("Play", |engine| engine.play())
}

#[no_mangle]
pub extern "system" fn Pause() -> i32 {
    with_engine("Pause", |engine| engine.pause())
}

#[no_mangle]
pub extern "system" fn Stop() -> i32 {
    with_engine("Stop", |engine| engine.stop())
}

/// # Safety
/// `position` must be null or valid for one write.
#[no_mangle]
pub unsafe extern "system" fn GetPosition(position: *mut i64) -> i32 {
    let value = current_engine().and_then(|engine| engine.position());
    write_out(position, value.map(|ticks| ticks.0))
}

/// # Safety
/// `duration` must be null or valid for one write.
#[no_mangle]
pub unsafe extern "system" fn GetDuration(duration: *mut i64) -> i32 {
    let value = current_engine().and_then(|engine| engine.duration());
    write_out(duration, value.map(|ticks| ticks.0))
}

/// # Safety
/// `rate` must be null or valid for one write.
#[no_mangle]
pub unsafe extern "system" fn GetPlaybackRate(rate: *mut f64) -> i32 {
    let value = current_engine().and_then(|engine| engine.playback_rate());
    write_out(rate, value)
}

#[no_mangle]
pub extern "system" fn SetPosition(position: i64) -> i32 {
    with_engine("SetPosition", |engine| engine.set_position(Ticks(position)))
}

#[no_mangle]
pub extern "system" fn SetPlaybackRate(rate: f64) -> i32 {
    with_engine("SetPlaybackRate", |engine| engine.set_playback_rate(rate))
}
