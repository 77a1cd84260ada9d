use tracing::{error, info};

use super::backend::D3d12Device;
use super::bindless_scene::BindlessScene;
use super::compile_shader::DxcShaderCompiler;
use super::presenter::D3d12Presenter;
use super::print_debug_messages::print_debug_messages;
use crate::config::RendererConfig;
use crate::descriptor_heap::DescriptorHeap;
use crate::error::{RenderError, RenderResult};
use crate::frame_loop::{FrameLoop, FrameStats};
use crate::frame_pipeline::FramePipeline;
use crate::gpu::DescriptorHeapKind;
use crate::win32::Win32Window;

/// Opens a window and renders the bindless triangle until it is closed.
///
/// On failure the debug layer's queued messages are logged before returning.
pub fn run_windowed(config: &RendererConfig) -> RenderResult<FrameStats> {
    let device = D3d12Device::create(config.use_warp_device)?;

    let result = render(&device, config);
    if let Err(e) = &result {
        if e.is_device_lost() {
            if let Some(reason) = device.removed_reason() {
                error!(%reason, "device removed");
            }
        }
        print_debug_messages(device.info_queue());
    }
    result
}

fn render(device: &D3d12Device, config: &RendererConfig) -> RenderResult<FrameStats> {
    let title = if config.use_warp_device {
        "Bindless Triangle (WARP)"
    } else {
        "Bindless Triangle"
    };
    let mut window = Win32Window::create(title, config.window_size)?;

    let compiler = DxcShaderCompiler::new()?;
    let mut bindless_heap = DescriptorHeap::create(
        device,
        DescriptorHeapKind::CbvSrvUav,
        config.descriptor_capacity,
        "bindless",
    )?;

    let queue = device.create_queue()?;
    let presenter = D3d12Presenter::create(
        device,
        &queue,
        window.hwnd(),
        config.frames_in_flight,
        config.window_size,
    )?;
    let pipeline =
        FramePipeline::new(device, queue, config.frames_in_flight, config.fence_timeout)?;

    let initial_allocator = pipeline.allocator(0).ok_or(RenderError::NoFramesInFlight)?;
    let scene = BindlessScene::new(
        device,
        initial_allocator,
        &presenter,
        &mut bindless_heap,
        &compiler,
    )?;
    info!(
        descriptors_used = bindless_heap.allocated(),
        capacity = bindless_heap.capacity(),
        "scene uploaded"
    );

    window.show();

    let mut frame_loop = FrameLoop::new(pipeline, presenter, scene, config.sync_interval)?
        .with_max_frames(config.frame_limit());
    frame_loop.run(&mut window)
}
