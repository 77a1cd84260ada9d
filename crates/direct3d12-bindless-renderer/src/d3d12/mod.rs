//! The Direct3D 12 backend: device, queue, fence, descriptor heaps and upload
//! buffers behind the [`crate::gpu`] traits, plus the swap chain, shader compiler
//! and the bindless triangle recorder.

pub mod adapter_utils;
pub mod backend;
pub mod bindless_scene;
pub mod compile_shader;
pub mod create_device;
pub mod create_pipeline_state;
pub mod create_root_signature;
pub mod presenter;
pub mod print_debug_messages;
pub mod run_windowed;
pub mod transition_barrier;

pub use backend::{
    D3d12Buffer, D3d12CommandAllocator, D3d12DescriptorHeap, D3d12Device, D3d12Fence, D3d12Queue,
};
pub use bindless_scene::BindlessScene;
pub use compile_shader::DxcShaderCompiler;
pub use presenter::D3d12Presenter;
pub use run_windowed::run_windowed;

use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_FORMAT_R8G8B8A8_UNORM};

/// Back buffer and render target format.
pub const RENDER_TARGET_FORMAT: DXGI_FORMAT = DXGI_FORMAT_R8G8B8A8_UNORM;
