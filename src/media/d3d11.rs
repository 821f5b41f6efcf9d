//! D3D11 GPU interop
//!
//! The decode device is created on the adapter behind the host's render
//! device and the playback texture is allocated on the render device, exported
//! as an NT handle and reopened on the decode device. Both sides then alias
//! the same video memory.

use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use windows::core::{Interface, HSTRING, PCWSTR};
use windows::Graphics::DirectX::Direct3D11::IDirect3DSurface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    IDXGIAdapter, IDXGIDevice, IDXGIResource1, IDXGISurface, DXGI_SHARED_RESOURCE_READ,
    DXGI_SHARED_RESOURCE_WRITE,
};
use windows::Win32::System::WinRT::Direct3D11::CreateDirect3D11SurfaceFromDXGISurface;

use super::gpu::{DevicePair, ExportedHandle, GpuInterop, SharedTexture, TextureDescription};
use crate::error::{PlaybackError, Result};

/// D3D11 device handle shared between threads
#[derive(Debug, Clone)]
pub struct D3D11Device(pub ID3D11Device);

// Render devices come from the host and decode devices are multithread
// protected; both are used from engine threads.
unsafe impl Send for D3D11Device {}
unsafe impl Sync for D3D11Device {}

/// Renderer-side shader view of the playback texture
#[derive(Debug, Clone)]
pub struct D3D11ShaderView(pub ID3D11ShaderResourceView);

unsafe impl Send for D3D11ShaderView {}
unsafe impl Sync for D3D11ShaderView {}

/// WinRT surface the player copies frames into
#[derive(Debug, Clone)]
pub struct MediaSurface(pub IDirect3DSurface);

unsafe impl Send for MediaSurface {}
unsafe impl Sync for MediaSurface {}

/// Exported NT handle, closed on drop
struct SharedHandle(HANDLE);

unsafe impl Send for SharedHandle {}
unsafe impl Sync for SharedHandle {}

impl Drop for SharedHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                if let Err(e) = CloseHandle(self.0) {
                    warn!("Failed to close shared texture handle: {:?}", e);
                }
            }
        }
    }
}

/// Shared BGRA8 texture aliased on the render and decode devices
pub struct D3D11SharedTexture {
    // Drop order: handle, surface, decoder-side texture, view, render texture
    handle: SharedHandle,
    surface: MediaSurface,
    _media_texture: ID3D11Texture2D,
    view: D3D11ShaderView,
    _texture: ID3D11Texture2D,
    description: TextureDescription,
}

unsafe impl Send for D3D11SharedTexture {}
unsafe impl Sync for D3D11SharedTexture {}

impl SharedTexture for D3D11SharedTexture {
    type View = D3D11ShaderView;
    type Surface = MediaSurface;

    fn description(&self) -> &TextureDescription {
        &self.description
    }

    fn view(&self) -> D3D11ShaderView {
        self.view.clone()
    }

    fn surface(&self) -> &MediaSurface {
        &self.surface
    }

    fn exported_handle(&self) -> ExportedHandle {
        ExportedHandle(self.handle.0 .0 as usize)
    }
}

/// D3D11/DXGI implementation of [`GpuInterop`]
#[derive(Debug, Default)]
pub struct D3D11Interop;

impl D3D11Interop {
    pub fn new() -> Self {
        Self
    }

    fn adapter_of(device: &ID3D11Device) -> anyhow::Result<IDXGIAdapter> {
        unsafe {
            let dxgi_device: IDXGIDevice = device
                .cast()
                .map_err(|e| anyhow!("Failed to get IDXGIDevice: {:?}", e))?;
            dxgi_device
                .GetAdapter()
                .map_err(|e| anyhow!("Failed to get adapter of render device: {:?}", e))
        }
    }

    fn adapter_name(adapter: &IDXGIAdapter) -> String {
        unsafe {
            adapter
                .GetDesc()
                .map(|desc| {
                    String::from_utf16_lossy(
                        &desc
                            .Description
                            .iter()
                            .take_while(|&&c| c != 0)
                            .copied()
                            .collect::<Vec<_>>(),
                    )
                })
                .unwrap_or_else(|_| "unknown adapter".to_string())
        }
    }

    /// Create a video-capable device on `adapter`
    fn create_device_on(adapter: &IDXGIAdapter) -> anyhow::Result<ID3D11Device> {
        unsafe {
            let mut device: Option<ID3D11Device> = None;
            let mut feature_level = D3D_FEATURE_LEVEL_11_0;

            // Video support for the decode engine, BGRA for the copy target
            let flags = D3D11_CREATE_DEVICE_VIDEO_SUPPORT | D3D11_CREATE_DEVICE_BGRA_SUPPORT;

            let feature_levels = [
                D3D_FEATURE_LEVEL_12_1,
                D3D_FEATURE_LEVEL_12_0,
                D3D_FEATURE_LEVEL_11_1,
                D3D_FEATURE_LEVEL_11_0,
            ];

            // An explicit adapter requires the unknown driver type
            D3D11CreateDevice(
                adapter,
                D3D_DRIVER_TYPE_UNKNOWN,
                HMODULE::default(),
                flags,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                Some(&mut feature_level),
                None,
            )
            .map_err(|e| anyhow!("Failed to create D3D11 device: {:?}", e))?;

            let device = device.ok_or_else(|| anyhow!("D3D11 device is null"))?;
            info!(
                "Created decode device with feature level {:?} (0x{:x})",
                feature_level, feature_level.0
            );

            // The decode engine drives this device from its own threads
            let multithread: ID3D11Multithread = device
                .cast()
                .context("Decode device has no ID3D11Multithread")?;
            let _ = multithread.SetMultithreadProtected(true);
            debug!("D3D11 multithread protection enabled");

            Ok(device)
        }
    }
}

impl GpuInterop for D3D11Interop {
    type RenderDevice = D3D11Device;
    type DecodeDevice = D3D11Device;
    type Texture = D3D11SharedTexture;

    fn resolve_decode_device(&self, render: &D3D11Device) -> Result<D3D11Device> {
        let adapter = Self::adapter_of(&render.0)
            .map_err(|e| PlaybackError::DeviceCreationFailed(format!("{:#}", e)))?;
        info!("Render device adapter: {}", Self::adapter_name(&adapter));

        let device = Self::create_device_on(&adapter)
            .map_err(|e| PlaybackError::DeviceCreationFailed(format!("{:#}", e)))?;
        Ok(D3D11Device(device))
    }

    fn create_shared_texture(
        &self,
        devices: &DevicePair<Self>,
        desc: &TextureDescription,
        handle_name: Option<&str>,
    ) -> Result<D3D11SharedTexture> {
        let texture_desc = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: (D3D11_RESOURCE_MISC_SHARED.0 | D3D11_RESOURCE_MISC_SHARED_NTHANDLE.0)
                as u32,
        };

        unsafe {
            let render = &devices.render.0;

            let mut texture: Option<ID3D11Texture2D> = None;
            render
                .CreateTexture2D(&texture_desc, None, Some(&mut texture))
                .map_err(|e| PlaybackError::resource("texture creation", format!("{:?}", e)))?;
            let texture = texture
                .ok_or_else(|| PlaybackError::resource("texture creation", "texture is null"))?;

            let srv_desc = D3D11_SHADER_RESOURCE_VIEW_DESC {
                Format: texture_desc.Format,
                ViewDimension: D3D_SRV_DIMENSION_TEXTURE2D,
                Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                    Texture2D: D3D11_TEX2D_SRV {
                        MostDetailedMip: 0,
                        MipLevels: 1,
                    },
                },
            };
            let mut view: Option<ID3D11ShaderResourceView> = None;
            render
                .CreateShaderResourceView(&texture, Some(&srv_desc), Some(&mut view))
                .map_err(|e| {
                    PlaybackError::resource("shader view creation", format!("{:?}", e))
                })?;
            let view = view.ok_or_else(|| {
                PlaybackError::resource("shader view creation", "shader view is null")
            })?;

            let resource: IDXGIResource1 = texture
                .cast()
                .map_err(|e| PlaybackError::resource("handle export", format!("{:?}", e)))?;
            let name = handle_name.map(HSTRING::from);
            let name_ptr = name
                .as_ref()
                .map(|name| PCWSTR(name.as_ptr()))
                .unwrap_or(PCWSTR::null());
            let handle = SharedHandle(
                resource
                    .CreateSharedHandle(
                        None,
                        DXGI_SHARED_RESOURCE_READ.0 | DXGI_SHARED_RESOURCE_WRITE.0,
                        name_ptr,
                    )
                    .map_err(|e| PlaybackError::resource("handle export", format!("{:?}", e)))?,
            );
            debug!("Exported shared handle {:?}", handle.0);

            // From here on a failure drops `handle`, which closes it
            let decode: ID3D11Device1 = devices
                .decode
                .0
                .cast()
                .map_err(|e| PlaybackError::resource("handle import", format!("{:?}", e)))?;
            let media_texture: ID3D11Texture2D = decode
                .OpenSharedResource1(handle.0)
                .map_err(|e| PlaybackError::resource("handle import", format!("{:?}", e)))?;

            let dxgi_surface: IDXGISurface = media_texture
                .cast()
                .map_err(|e| PlaybackError::resource("surface wrapping", format!("{:?}", e)))?;
            let surface: IDirect3DSurface = CreateDirect3D11SurfaceFromDXGISurface(&dxgi_surface)
                .and_then(|inspectable| inspectable.cast())
                .map_err(|e| PlaybackError::resource("surface wrapping", format!("{:?}", e)))?;

            Ok(D3D11SharedTexture {
                handle,
                surface: MediaSurface(surface),
                _media_texture: media_texture,
                view: D3D11ShaderView(view),
                _texture: texture,
                description: *desc,
            })
        }
    }
}
