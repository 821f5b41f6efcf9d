//! GPU interop capability
//!
//! The render device belongs to the host; the decode device is created by us
//! on the same physical adapter so a texture exported from one can be opened
//! on the other through an OS handle. Everything platform specific about that
//! pair lives behind [`GpuInterop`].

use log::{error, info};

use crate::error::{PlaybackError, Result};

/// Pixel layout of the shared texture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TextureFormat {
    /// Zeroed description, nothing allocated
    #[default]
    Unknown,
    /// 8-bit BGRA, the only layout the frame server copies into
    Bgra8Unorm,
}

/// Cached description of the current shared texture
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextureDescription {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    /// Exported with an NT handle rather than a legacy KMT handle
    pub shared_nt_handle: bool,
    pub shader_resource: bool,
    pub render_target: bool,
}

impl TextureDescription {
    /// Description used for every playback texture
    pub fn shared_bgra(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            shared_nt_handle: true,
            shader_resource: true,
            render_target: true,
        }
    }

    pub fn is_zeroed(&self) -> bool {
        *self == Self::default()
    }
}

/// Raw value of an exported OS handle, for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportedHandle(pub usize);

/// One exported texture, aliased on both devices
///
/// Dropping the value closes the exported handle and releases the decoder
/// surface, the decoder-side texture, the shader view and the renderer-side
/// texture.
pub trait SharedTexture: Send + Sync + 'static {
    /// Shader-readable view handed to the renderer
    type View: Clone + Send + Sync + 'static;
    /// Decode-engine copy target
    type Surface: Send + Sync + 'static;

    fn description(&self) -> &TextureDescription;
    fn view(&self) -> Self::View;
    fn surface(&self) -> &Self::Surface;
    fn exported_handle(&self) -> ExportedHandle;
}

/// Render/decode device pair and shared-handle texture allocation
pub trait GpuInterop: Send + Sync + 'static {
    type RenderDevice: Clone + Send + Sync + 'static;
    type DecodeDevice: Clone + Send + Sync + 'static;
    type Texture: SharedTexture;

    /// Create a new device on the adapter backing `render`
    ///
    /// Must never fall back to a default adapter: on multi-GPU machines that
    /// could pick a different GPU and handle sharing would fail.
    fn resolve_decode_device(&self, render: &Self::RenderDevice) -> Result<Self::DecodeDevice>;

    /// Allocate on the render device, export, import on the decode device and
    /// wrap for the decode engine
    ///
    /// On failure no handle may remain open.
    fn create_shared_texture(
        &self,
        devices: &DevicePair<Self>,
        desc: &TextureDescription,
        handle_name: Option<&str>,
    ) -> Result<Self::Texture>;
}

pub type ViewOf<G> = <<G as GpuInterop>::Texture as SharedTexture>::View;
pub type SurfaceOf<G> = <<G as GpuInterop>::Texture as SharedTexture>::Surface;

/// Host render device plus the decode device created for it
pub struct DevicePair<G: GpuInterop + ?Sized> {
    pub render: G::RenderDevice,
    pub decode: G::DecodeDevice,
}

impl<G: GpuInterop + ?Sized> Clone for DevicePair<G> {
    fn clone(&self) -> Self {
        Self {
            render: self.render.clone(),
            decode: self.decode.clone(),
        }
    }
}

impl<G: GpuInterop> DevicePair<G> {
    /// Resolve an adapter-affine decode device for `render`
    ///
    /// Failure is fatal to initialization; a missing adapter match cannot
    /// recover on retry.
    pub fn resolve(gpu: &G, render: G::RenderDevice) -> Result<Self> {
        let decode = gpu.resolve_decode_device(&render).map_err(|e| {
            error!("Decode device resolution failed: {}", e);
            match e {
                PlaybackError::InvalidArgument(_) | PlaybackError::DeviceCreationFailed(_) => e,
                other => PlaybackError::DeviceCreationFailed(other.to_string()),
            }
        })?;
        info!("Decode device created on the render adapter");
        Ok(Self { render, decode })
    }
}
