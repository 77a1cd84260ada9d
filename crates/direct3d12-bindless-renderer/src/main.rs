use std::time::Duration;

use direct3d12_bindless_renderer::config::build_config;
use direct3d12_bindless_renderer::headless::{
    CompletionMode, HeadlessDevice, HeadlessPresenter, HeadlessWindow,
};
use direct3d12_bindless_renderer::logging::init_logging;
use direct3d12_bindless_renderer::scene::SceneBuffers;
use direct3d12_bindless_renderer::{
    DescriptorHeap, DescriptorHeapKind, Frame, FrameLoop, FramePipeline, FrameStats,
    RenderResult, RendererConfig,
};
use eyre::WrapErr;
use tracing::{error, info, trace, warn};

/// Simulated GPU latency per submission in headless runs.
const HEADLESS_FRAME_LATENCY: Duration = Duration::from_millis(2);

pub fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    init_logging();

    let mut config = build_config();
    if !cfg!(windows) && !config.headless {
        warn!("Direct3D 12 is only available on Windows, running headless");
        config.headless = true;
    }
    info!(?config, "starting");

    let result = if config.headless {
        run_headless(&config)
    } else {
        run_windowed(&config)
    };

    match &result {
        Ok(stats) => info!(
            frames = stats.frames_rendered,
            blocking_waits = stats.blocking_waits,
            last_fence_value = stats.last_fence_value,
            "done"
        ),
        Err(e) => error!(device_lost = e.is_device_lost(), "{e}"),
    }
    result.wrap_err("renderer failed")?;
    Ok(())
}

fn run_headless(config: &RendererConfig) -> RenderResult<FrameStats> {
    let device = HeadlessDevice::with_completion(CompletionMode::Delayed(HEADLESS_FRAME_LATENCY));
    let mut bindless_heap = DescriptorHeap::create(
        &device,
        DescriptorHeapKind::CbvSrvUav,
        config.descriptor_capacity,
        "bindless",
    )?;

    let (width, height) = config.window_size;
    let mut scene = SceneBuffers::create(
        &device,
        &mut bindless_heap,
        config.frames_in_flight,
        width as f32 / height.max(1) as f32,
    )?;
    info!(
        descriptors_used = bindless_heap.allocated(),
        capacity = bindless_heap.capacity(),
        "scene uploaded"
    );

    let pipeline = FramePipeline::new(
        &device,
        device.create_queue(),
        config.frames_in_flight,
        config.fence_timeout,
    )?;
    let presenter = HeadlessPresenter::round_robin(config.frames_in_flight);
    let recorder = |frame: &Frame<'_, HeadlessDevice>| -> RenderResult<()> {
        let resources = scene.update(frame.context.slot_index, frame.frame_number)?;
        trace!(frame = frame.frame_number, ?resources, "recorded");
        Ok(())
    };

    let mut frame_loop = FrameLoop::new(pipeline, presenter, recorder, config.sync_interval)?
        .with_max_frames(config.frame_limit());
    let mut window = HeadlessWindow::unbounded(width, height);
    let stats = frame_loop.run(&mut window)?;
    Ok(stats)
}

#[cfg(windows)]
fn run_windowed(config: &RendererConfig) -> RenderResult<FrameStats> {
    direct3d12_bindless_renderer::d3d12::run_windowed(config)
}

#[cfg(not(windows))]
fn run_windowed(_config: &RendererConfig) -> RenderResult<FrameStats> {
    Err(direct3d12_bindless_renderer::RenderError::device(
        "run_windowed",
        "Direct3D 12 is only available on Windows",
    ))
}
