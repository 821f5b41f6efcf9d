//! Playback error types
//!
//! Every fallible operation in the crate returns [`PlaybackError`]. Errors that
//! cross the C boundary are converted to HRESULT codes with
//! [`PlaybackError::hresult`].

use thiserror::Error;

/// HRESULT codes returned through the C ABI
pub mod hresult {
    pub const S_OK: i32 = 0;
    pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;
    pub const E_POINTER: i32 = 0x8000_4003_u32 as i32;
    pub const E_INVALIDARG: i32 = 0x8007_0057_u32 as i32;
    pub const DXGI_ERROR_UNSUPPORTED: i32 = 0x887A_0004_u32 as i32;
    pub const MF_E_INVALIDREQUEST: i32 = 0xC00D_36B2_u32 as i32;
    pub const MF_E_UNSUPPORTED_SCHEME: i32 = 0xC00D_36C3_u32 as i32;
}

/// Errors produced by device setup, texture management and playback control
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlaybackError {
    /// Null, zero-sized or otherwise out-of-range input
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Adapter lookup, decode device creation or device-manager setup failed
    #[error("device creation failed: {0}")]
    DeviceCreationFailed(String),

    /// One step of shared texture allocation failed
    #[error("shared texture {step} failed: {message}")]
    ResourceCreationFailed { step: &'static str, message: String },

    /// No media source could be created for the location
    #[error("source resolution failed: {0}")]
    SourceResolutionFailed(String),

    /// The playback item could not be attached to the player
    #[error("binding source to player failed: {0}")]
    BindingFailed(String),

    /// Seek requested on a session that reports it cannot seek
    #[error("current media session does not support seeking")]
    SeekNotSupported,

    /// Asynchronous failure reported by the decode engine
    #[error("decoder failed (0x{code:08X}): {message}")]
    DecoderFailed { code: i32, message: String },

    /// A passthrough call was rejected by the decode engine
    #[error("{operation} rejected by decode engine: {message}")]
    EngineCall {
        operation: &'static str,
        message: String,
    },

    /// No playback engine exists for the call
    #[error("playback engine is not initialized")]
    NotInitialized,
}

impl PlaybackError {
    /// Shorthand for [`PlaybackError::ResourceCreationFailed`]
    pub fn resource(step: &'static str, message: impl Into<String>) -> Self {
        Self::ResourceCreationFailed {
            step,
            message: message.into(),
        }
    }

    /// Shorthand for [`PlaybackError::EngineCall`]
    pub fn engine(operation: &'static str, message: impl Into<String>) -> Self {
        Self::EngineCall {
            operation,
            message: message.into(),
        }
    }

    /// HRESULT reported to native hosts for this error
    pub fn hresult(&self) -> i32 {
        match self {
            PlaybackError::InvalidArgument(_) => hresult::E_INVALIDARG,
            PlaybackError::DeviceCreationFailed(_) => hresult::DXGI_ERROR_UNSUPPORTED,
            PlaybackError::ResourceCreationFailed { .. } => hresult::E_FAIL,
            PlaybackError::SourceResolutionFailed(_) => hresult::MF_E_UNSUPPORTED_SCHEME,
            PlaybackError::BindingFailed(_) => hresult::E_FAIL,
            PlaybackError::SeekNotSupported => hresult::MF_E_INVALIDREQUEST,
            PlaybackError::DecoderFailed { code, .. } => *code,
            PlaybackError::EngineCall { .. } => hresult::E_FAIL,
            PlaybackError::NotInitialized => hresult::E_POINTER,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybackError>;
