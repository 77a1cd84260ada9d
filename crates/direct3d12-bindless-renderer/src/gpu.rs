//! The seam between the allocation/synchronization core and a concrete GPU API.
//!
//! The core only needs a handful of device operations: create a descriptor heap,
//! create CPU-writable buffers and views over them, create command allocators, and
//! signal/observe a fence on the single graphics queue. [`crate::d3d12`] implements
//! these over Direct3D 12, [`crate::headless`] over a simulated timeline.

use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

use crate::descriptor_heap::DescriptorHandle;
use crate::error::RenderResult;

/// The kind of descriptor a heap holds. One heap holds exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    RenderTarget,
    DepthStencil,
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    Sampler,
}

impl DescriptorHeapKind {
    /// Shaders can only index heaps of these kinds, render target and depth
    /// stencil heaps are CPU-only.
    pub fn is_shader_visible(self) -> bool {
        matches!(
            self,
            DescriptorHeapKind::CbvSrvUav | DescriptorHeapKind::Sampler
        )
    }
}

impl fmt::Display for DescriptorHeapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DescriptorHeapKind::RenderTarget => "RTV",
            DescriptorHeapKind::DepthStencil => "DSV",
            DescriptorHeapKind::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapKind::Sampler => "sampler",
        };
        f.write_str(name)
    }
}

/// Address of a descriptor as seen by the CPU when writing views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuDescriptorAddress(pub usize);

/// Address of a descriptor as seen by the GPU. Zero for heaps that are not shader visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GpuDescriptorAddress(pub u64);

impl GpuDescriptorAddress {
    pub const NULL: GpuDescriptorAddress = GpuDescriptorAddress(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A native descriptor heap, only asked for where it starts.
pub trait NativeDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorAddress;

    /// Only called for shader visible heaps.
    fn gpu_start(&self) -> GpuDescriptorAddress;
}

/// A buffer living in CPU-writable, GPU-readable memory.
pub trait MappableBuffer {
    fn size_in_bytes(&self) -> u64;

    /// Maps the whole buffer for writing. The mapping is never closed while the
    /// buffer is alive.
    fn map(&self) -> RenderResult<NonNull<u8>>;
}

/// Backing memory for recorded command lists.
pub trait CommandAllocator {
    /// Must only be called once the GPU has finished every command list recorded from it.
    fn reset(&self) -> RenderResult<()>;
}

pub trait Fence {
    /// Highest value the GPU has reported complete.
    fn completed_value(&self) -> RenderResult<u64>;

    /// Blocks the calling thread (no spinning) until [`Fence::completed_value`] is at
    /// least `value`. With a timeout, giving up is reported as
    /// [`crate::RenderError::FenceTimeout`].
    fn wait(&self, value: u64, timeout: Option<Duration>) -> RenderResult<()>;
}

/// The single graphics queue.
pub trait CommandQueue {
    type Fence: Fence;

    /// Enqueues a fence signal behind all previously submitted work.
    fn signal(&self, fence: &Self::Fence, value: u64) -> RenderResult<()>;
}

pub trait Device {
    type DescriptorHeap: NativeDescriptorHeap;
    type Buffer: MappableBuffer;
    type CommandAllocator: CommandAllocator;
    type Fence: Fence;
    type Queue: CommandQueue<Fence = Self::Fence>;

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        label: &str,
    ) -> RenderResult<Self::DescriptorHeap>;

    /// Byte distance between two consecutive descriptors of `kind`.
    fn descriptor_stride(&self, kind: DescriptorHeapKind) -> u32;

    fn create_upload_buffer(&self, size_in_bytes: u64, label: &str) -> RenderResult<Self::Buffer>;

    /// Writes a structured buffer SRV over all of `buffer` into `destination`.
    fn create_structured_buffer_view(
        &self,
        buffer: &Self::Buffer,
        element_count: u32,
        element_stride: u32,
        heap: &Self::DescriptorHeap,
        destination: DescriptorHandle,
    ) -> RenderResult<()>;

    /// Writes a CBV over the first `size_in_bytes` of `buffer` into `destination`.
    fn create_constant_buffer_view(
        &self,
        buffer: &Self::Buffer,
        size_in_bytes: u32,
        heap: &Self::DescriptorHeap,
        destination: DescriptorHandle,
    ) -> RenderResult<()>;

    fn create_command_allocator(&self, label: &str) -> RenderResult<Self::CommandAllocator>;

    fn create_fence(&self, initial_value: u64) -> RenderResult<Self::Fence>;
}
