//! Bindless descriptor allocation and frame pipelining on top of Direct3D 12.
//!
//! The allocation and synchronization core ([`descriptor_heap`], [`upload`],
//! [`frame_pipeline`], [`frame_loop`]) is written against the traits in [`gpu`].
//! [`d3d12`] implements them on Windows; [`headless`] simulates a single queue
//! everywhere and backs the tests.

pub mod config;
pub mod descriptor_heap;
pub mod error;
pub mod frame_loop;
pub mod frame_pipeline;
pub mod gpu;
pub mod headless;
pub mod logging;
pub mod scene;
pub mod shader;
pub mod upload;

#[cfg(windows)]
pub mod d3d12;
#[cfg(windows)]
pub mod win32;

pub use config::RendererConfig;
pub use descriptor_heap::{DescriptorHandle, DescriptorHeap};
pub use error::{RenderError, RenderResult};
pub use frame_loop::{
    Frame, FrameLoop, FrameRecorder, FrameStats, Presenter, WindowEvents, WindowState,
};
pub use frame_pipeline::{FrameContext, FramePipeline, SlotState};
pub use gpu::DescriptorHeapKind;
pub use shader::{ShaderBytecode, ShaderCompiler, ShaderSource};
pub use upload::{upload, upload_constants, BufferView, UploadBuffer};
