use tracing::{info, warn};
use windows::core::*;
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_12_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::*;

use super::adapter_utils::get_hardware_adapter;
use crate::error::{RenderError, RenderResult};

/// Creates the DXGI factory and device, enabling the debug layer in debug builds.
///
/// The info queue is only present when the debug layer could be enabled.
pub fn create_device(
    use_warp_device: bool,
) -> RenderResult<(IDXGIFactory4, ID3D12Device, Option<IDXGIInfoQueue>)> {
    let mut debug_flags = DXGI_CREATE_FACTORY_FLAGS(0);
    let mut info_queue: Option<IDXGIInfoQueue> = None;

    if cfg!(debug_assertions) {
        let mut debug: Option<ID3D12Debug> = None;
        if let Some(debug) = unsafe { D3D12GetDebugInterface(&mut debug) }.ok().and(debug) {
            unsafe { debug.EnableDebugLayer() };
            debug_flags |= DXGI_CREATE_FACTORY_DEBUG;
            info!("D3D12 debug layer enabled");

            match unsafe { DXGIGetDebugInterface1::<IDXGIInfoQueue>(0) } {
                Ok(queue) => info_queue = Some(queue),
                Err(e) => warn!("Failed to get DXGI info queue: {e}"),
            }
        } else {
            warn!("D3D12 debug layer unavailable");
        }
    }

    let dxgi_factory: IDXGIFactory4 = unsafe { CreateDXGIFactory2(debug_flags) }?;

    let adapter = if use_warp_device {
        info!("Using WARP adapter");
        unsafe { dxgi_factory.EnumWarpAdapter()? }
    } else {
        get_hardware_adapter(&dxgi_factory)?
    };

    let mut device: Option<ID3D12Device> = None;
    unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_12_0, &mut device) }?;
    let device = device.ok_or_else(|| {
        RenderError::device("D3D12CreateDevice", "no device was returned")
    })?;

    check_bindless_support(&device)?;

    Ok((dxgi_factory, device, info_queue))
}

/// `ResourceDescriptorHeap` indexing needs shader model 6.6 and resource binding tier 3.
fn check_bindless_support(device: &ID3D12Device) -> RenderResult<()> {
    let mut shader_model = D3D12_FEATURE_DATA_SHADER_MODEL {
        HighestShaderModel: D3D_SHADER_MODEL_6_6,
    };
    unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_SHADER_MODEL,
            &mut shader_model as *mut _ as *mut _,
            std::mem::size_of::<D3D12_FEATURE_DATA_SHADER_MODEL>() as u32,
        )
    }
    .map_err(|e| RenderError::device("CheckFeatureSupport", e.message().to_string()))?;
    if shader_model.HighestShaderModel.0 < D3D_SHADER_MODEL_6_6.0 {
        return Err(RenderError::device(
            "CheckFeatureSupport",
            format!(
                "shader model 6.6 is required, the device supports {:#x}",
                shader_model.HighestShaderModel.0
            ),
        ));
    }

    let mut options = D3D12_FEATURE_DATA_D3D12_OPTIONS::default();
    unsafe {
        device.CheckFeatureSupport(
            D3D12_FEATURE_D3D12_OPTIONS,
            &mut options as *mut _ as *mut _,
            std::mem::size_of::<D3D12_FEATURE_DATA_D3D12_OPTIONS>() as u32,
        )
    }?;
    if options.ResourceBindingTier.0 < D3D12_RESOURCE_BINDING_TIER_3.0 {
        return Err(RenderError::device(
            "CheckFeatureSupport",
            format!(
                "resource binding tier 3 is required, the device supports tier {}",
                options.ResourceBindingTier.0
            ),
        ));
    }

    Ok(())
}
