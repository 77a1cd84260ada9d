//! A CPU-only backend that simulates one GPU queue.
//!
//! Descriptor heaps get synthetic, non-overlapping address ranges, upload buffers
//! are plain 256-byte aligned allocations, and every fence owns a [`Timeline`]
//! whose completion is driven by the device's [`CompletionMode`]. Every test and
//! the `-headless` run of the binary use it.

mod presenter;
mod timeline;

pub use presenter::HeadlessPresenter;
pub use presenter::HeadlessWindow;
pub use timeline::CompletionMode;
pub use timeline::Timeline;

use std::alloc::Layout;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::descriptor_heap::DescriptorHandle;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    CommandAllocator, CommandQueue, CpuDescriptorAddress, DescriptorHeapKind, Device, Fence,
    GpuDescriptorAddress, MappableBuffer, NativeDescriptorHeap,
};

const BUFFER_ALIGNMENT: usize = 256;
const HEAP_ADDRESS_ALIGNMENT: usize = 0x1_0000;
const FIRST_HEAP_ADDRESS: usize = 0x10_0000;
const GPU_ADDRESS_OFFSET: u64 = 0x1_0000_0000;

pub struct HeadlessDevice {
    mode: CompletionMode,
    /// Timeline of the most recently created fence.
    latest_timeline: Mutex<Option<Arc<Timeline>>>,
    memory_budget: Option<u64>,
    memory_in_use: Arc<AtomicU64>,
    next_heap_address: AtomicUsize,
    next_buffer_id: AtomicU64,
    reject_views: AtomicBool,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Work completes as soon as it is signaled.
    pub fn new() -> Self {
        Self::with_completion(CompletionMode::Immediate)
    }

    /// Work completes only when the test advances the fence's [`Timeline`].
    pub fn manual() -> Self {
        Self::with_completion(CompletionMode::Manual)
    }

    pub fn with_completion(mode: CompletionMode) -> Self {
        Self {
            mode,
            latest_timeline: Mutex::new(None),
            memory_budget: None,
            memory_in_use: Arc::new(AtomicU64::new(0)),
            next_heap_address: AtomicUsize::new(FIRST_HEAP_ADDRESS),
            next_buffer_id: AtomicU64::new(1),
            reject_views: AtomicBool::new(false),
        }
    }

    /// Buffer creation fails once live upload memory would exceed `bytes`.
    pub fn with_memory_budget(bytes: u64) -> Self {
        Self {
            memory_budget: Some(bytes),
            ..Self::new()
        }
    }

    /// Completion mode given to each new fence's timeline.
    pub fn completion_mode(&self) -> CompletionMode {
        self.mode
    }

    /// While set, every view creation fails as a driver would on bad arguments.
    pub fn reject_views(&self, reject: bool) {
        self.reject_views.store(reject, Ordering::Release);
    }

    fn check_views_accepted(&self, operation: &'static str) -> RenderResult<()> {
        if self.reject_views.load(Ordering::Acquire) {
            return Err(RenderError::device(operation, "view creation rejected"));
        }
        Ok(())
    }

    pub fn memory_in_use(&self) -> u64 {
        self.memory_in_use.load(Ordering::Acquire)
    }

    pub fn create_queue(&self) -> HeadlessQueue {
        HeadlessQueue {
            signals: AtomicU64::new(0),
        }
    }
}

/// What was written into a descriptor slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessView {
    StructuredBuffer {
        buffer_id: u64,
        element_count: u32,
        element_stride: u32,
    },
    ConstantBuffer {
        buffer_id: u64,
        size_in_bytes: u32,
    },
}

pub struct HeadlessDescriptorHeap {
    kind: DescriptorHeapKind,
    cpu_start: CpuDescriptorAddress,
    gpu_start: GpuDescriptorAddress,
    stride: u32,
    views: Mutex<Vec<Option<HeadlessView>>>,
}

impl HeadlessDescriptorHeap {
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn view(&self, index: u32) -> Option<HeadlessView> {
        let views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        views.get(index as usize).cloned().flatten()
    }

    fn write_view(
        &self,
        destination: DescriptorHandle,
        view: HeadlessView,
        operation: &'static str,
    ) -> RenderResult<()> {
        let expected =
            self.cpu_start.0 + destination.index as usize * self.stride as usize;
        let mut views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        match views.get_mut(destination.index as usize) {
            Some(slot) if destination.cpu.0 == expected => {
                *slot = Some(view);
                Ok(())
            }
            _ => Err(RenderError::device(
                operation,
                format!(
                    "descriptor {} at {:#x} is not part of this heap",
                    destination.index, destination.cpu.0
                ),
            )),
        }
    }
}

impl NativeDescriptorHeap for HeadlessDescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorAddress {
        self.cpu_start
    }

    fn gpu_start(&self) -> GpuDescriptorAddress {
        self.gpu_start
    }
}

pub struct HeadlessBuffer {
    id: u64,
    memory: NonNull<u8>,
    layout: Layout,
    memory_in_use: Arc<AtomicU64>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl MappableBuffer for HeadlessBuffer {
    fn size_in_bytes(&self) -> u64 {
        self.layout.size() as u64
    }

    fn map(&self) -> RenderResult<NonNull<u8>> {
        Ok(self.memory)
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        // SAFETY: allocated in `create_upload_buffer` with exactly this layout.
        unsafe { std::alloc::dealloc(self.memory.as_ptr(), self.layout) };
        self.memory_in_use
            .fetch_sub(self.layout.size() as u64, Ordering::AcqRel);
    }
}

/// Records the fence value that was complete each time it was reset.
///
/// The value is read from the timeline of the last fence created on the device
/// before the allocator, which is the pipeline's own fence.
pub struct HeadlessCommandAllocator {
    label: String,
    timeline: Option<Arc<Timeline>>,
    resets: Mutex<Vec<u64>>,
}

impl HeadlessCommandAllocator {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Completed fence value observed at every reset, in order.
    pub fn reset_log(&self) -> Vec<u64> {
        self.resets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandAllocator for HeadlessCommandAllocator {
    fn reset(&self) -> RenderResult<()> {
        let completed = self.timeline.as_ref().map_or(0, |timeline| timeline.completed());
        trace!(label = %self.label, completed, "command allocator reset");
        self.resets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(completed);
        Ok(())
    }
}

pub struct HeadlessFence {
    timeline: Arc<Timeline>,
}

impl HeadlessFence {
    /// The simulated GPU progress behind this fence, for driving completion.
    pub fn timeline(&self) -> Arc<Timeline> {
        Arc::clone(&self.timeline)
    }
}

impl Fence for HeadlessFence {
    fn completed_value(&self) -> RenderResult<u64> {
        Ok(self.timeline.completed())
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> RenderResult<()> {
        self.timeline.wait(value, timeout)
    }
}

pub struct HeadlessQueue {
    signals: AtomicU64,
}

impl HeadlessQueue {
    /// How many fence signals were enqueued.
    pub fn signal_count(&self) -> u64 {
        self.signals.load(Ordering::Acquire)
    }
}

impl CommandQueue for HeadlessQueue {
    type Fence = HeadlessFence;

    fn signal(&self, fence: &HeadlessFence, value: u64) -> RenderResult<()> {
        self.signals.fetch_add(1, Ordering::AcqRel);
        fence.timeline.signal(value);
        Ok(())
    }
}

impl Device for HeadlessDevice {
    type DescriptorHeap = HeadlessDescriptorHeap;
    type Buffer = HeadlessBuffer;
    type CommandAllocator = HeadlessCommandAllocator;
    type Fence = HeadlessFence;
    type Queue = HeadlessQueue;

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        label: &str,
    ) -> RenderResult<HeadlessDescriptorHeap> {
        let stride = self.descriptor_stride(kind);
        let span = (capacity as usize * stride as usize).next_multiple_of(HEAP_ADDRESS_ALIGNMENT);
        let cpu_start = self.next_heap_address.fetch_add(span, Ordering::AcqRel);
        let gpu_start = if shader_visible {
            GpuDescriptorAddress(cpu_start as u64 + GPU_ADDRESS_OFFSET)
        } else {
            GpuDescriptorAddress::NULL
        };
        trace!(label, %kind, cpu_start, "headless descriptor heap");

        Ok(HeadlessDescriptorHeap {
            kind,
            cpu_start: CpuDescriptorAddress(cpu_start),
            gpu_start,
            stride,
            views: Mutex::new(vec![None; capacity as usize]),
        })
    }

    fn descriptor_stride(&self, kind: DescriptorHeapKind) -> u32 {
        match kind {
            DescriptorHeapKind::DepthStencil => 8,
            DescriptorHeapKind::RenderTarget
            | DescriptorHeapKind::CbvSrvUav
            | DescriptorHeapKind::Sampler => 32,
        }
    }

    fn create_upload_buffer(&self, size_in_bytes: u64, label: &str) -> RenderResult<HeadlessBuffer> {
        let invalid = || RenderError::InvalidBufferSize {
            label: label.to_owned(),
            size_in_bytes,
        };
        let size = usize::try_from(size_in_bytes).map_err(|_| invalid())?;
        if size == 0 {
            return Err(invalid());
        }
        let layout = Layout::from_size_align(size, BUFFER_ALIGNMENT).map_err(|_| invalid())?;

        let in_use = self.memory_in_use.fetch_add(size_in_bytes, Ordering::AcqRel);
        if self
            .memory_budget
            .is_some_and(|budget| in_use + size_in_bytes > budget)
        {
            self.memory_in_use.fetch_sub(size_in_bytes, Ordering::AcqRel);
            return Err(RenderError::OutOfDeviceMemory {
                label: label.to_owned(),
                requested: size_in_bytes,
            });
        }

        // SAFETY: `layout` has a non-zero size.
        let memory = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) }).ok_or_else(|| {
            self.memory_in_use.fetch_sub(size_in_bytes, Ordering::AcqRel);
            RenderError::OutOfDeviceMemory {
                label: label.to_owned(),
                requested: size_in_bytes,
            }
        })?;

        Ok(HeadlessBuffer {
            id: self.next_buffer_id.fetch_add(1, Ordering::AcqRel),
            memory,
            layout,
            memory_in_use: Arc::clone(&self.memory_in_use),
        })
    }

    fn create_structured_buffer_view(
        &self,
        buffer: &HeadlessBuffer,
        element_count: u32,
        element_stride: u32,
        heap: &HeadlessDescriptorHeap,
        destination: DescriptorHandle,
    ) -> RenderResult<()> {
        self.check_views_accepted("CreateShaderResourceView")?;
        let covered = u64::from(element_count) * u64::from(element_stride);
        if heap.kind != DescriptorHeapKind::CbvSrvUav || covered > buffer.size_in_bytes() {
            return Err(RenderError::device(
                "CreateShaderResourceView",
                format!(
                    "{element_count} x {element_stride} bytes does not fit buffer {} in a {} heap",
                    buffer.id, heap.kind
                ),
            ));
        }
        heap.write_view(
            destination,
            HeadlessView::StructuredBuffer {
                buffer_id: buffer.id,
                element_count,
                element_stride,
            },
            "CreateShaderResourceView",
        )
    }

    fn create_constant_buffer_view(
        &self,
        buffer: &HeadlessBuffer,
        size_in_bytes: u32,
        heap: &HeadlessDescriptorHeap,
        destination: DescriptorHandle,
    ) -> RenderResult<()> {
        self.check_views_accepted("CreateConstantBufferView")?;
        if heap.kind != DescriptorHeapKind::CbvSrvUav
            || size_in_bytes % 256 != 0
            || u64::from(size_in_bytes) > buffer.size_in_bytes()
        {
            return Err(RenderError::device(
                "CreateConstantBufferView",
                format!("{size_in_bytes} bytes is not a valid view of buffer {}", buffer.id),
            ));
        }
        heap.write_view(
            destination,
            HeadlessView::ConstantBuffer {
                buffer_id: buffer.id,
                size_in_bytes,
            },
            "CreateConstantBufferView",
        )
    }

    fn create_command_allocator(&self, label: &str) -> RenderResult<HeadlessCommandAllocator> {
        Ok(HeadlessCommandAllocator {
            label: label.to_owned(),
            timeline: self
                .latest_timeline
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            resets: Mutex::new(Vec::new()),
        })
    }

    fn create_fence(&self, initial_value: u64) -> RenderResult<HeadlessFence> {
        let timeline = Timeline::new(self.mode);
        timeline.initialize(initial_value);
        *self
            .latest_timeline
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&timeline));
        Ok(HeadlessFence { timeline })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heaps_do_not_overlap() {
        let device = HeadlessDevice::new();
        let first = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 4096, true, "a")
            .unwrap();
        let second = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 16, true, "b")
            .unwrap();
        assert!(second.cpu_start().0 >= first.cpu_start().0 + 4096 * 32);
        assert!(!first.gpu_start().is_null());
    }

    #[test]
    fn buffers_are_zeroed_aligned_and_accounted() {
        let device = HeadlessDevice::new();
        let buffer = device.create_upload_buffer(300, "scratch").unwrap();
        let mapped = buffer.map().unwrap();
        assert_eq!(mapped.as_ptr() as usize % BUFFER_ALIGNMENT, 0);
        // SAFETY: the buffer is 300 bytes long.
        let bytes = unsafe { std::slice::from_raw_parts(mapped.as_ptr(), 300) };
        assert!(bytes.iter().all(|byte| *byte == 0));
        assert_eq!(device.memory_in_use(), 300);

        drop(buffer);
        assert_eq!(device.memory_in_use(), 0);
    }

    #[test]
    fn zero_sized_buffers_are_rejected() {
        let device = HeadlessDevice::new();
        assert!(matches!(
            device.create_upload_buffer(0, "nothing"),
            Err(RenderError::InvalidBufferSize { .. })
        ));
    }

    #[test]
    fn queue_signals_reach_the_fence() {
        let device = HeadlessDevice::manual();
        let queue = device.create_queue();
        let fence = device.create_fence(0).unwrap();

        queue.signal(&fence, 1).unwrap();
        assert_eq!(fence.completed_value().unwrap(), 0);
        assert_eq!(queue.signal_count(), 1);

        fence.timeline().complete_all();
        assert_eq!(fence.completed_value().unwrap(), 1);
    }

    #[test]
    fn fences_progress_independently() {
        let device = HeadlessDevice::manual();
        let queue = device.create_queue();
        let first = device.create_fence(0).unwrap();
        let second = device.create_fence(0).unwrap();

        queue.signal(&first, 3).unwrap();
        first.timeline().complete_all();
        assert_eq!(first.completed_value().unwrap(), 3);
        assert_eq!(second.completed_value().unwrap(), 0);

        queue.signal(&second, 1).unwrap();
        assert!(second
            .wait(1, Some(Duration::from_millis(10)))
            .is_err());
        second.timeline().complete_all();
    }

    #[test]
    fn allocators_follow_the_fence_created_before_them() {
        let device = HeadlessDevice::manual();
        let queue = device.create_queue();
        let first = device.create_fence(0).unwrap();
        let first_allocator = device.create_command_allocator("first").unwrap();
        let _second = device.create_fence(0).unwrap();
        let second_allocator = device.create_command_allocator("second").unwrap();

        queue.signal(&first, 2).unwrap();
        first.timeline().complete_all();
        first_allocator.reset().unwrap();
        second_allocator.reset().unwrap();

        assert_eq!(first_allocator.reset_log(), vec![2]);
        assert_eq!(second_allocator.reset_log(), vec![0]);
    }

    #[test]
    fn views_outside_the_heap_are_rejected() {
        let device = HeadlessDevice::new();
        let heap = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 2, true, "bindless")
            .unwrap();
        let other = device
            .create_descriptor_heap(DescriptorHeapKind::CbvSrvUav, 2, true, "other")
            .unwrap();
        let buffer = device.create_upload_buffer(256, "scratch").unwrap();
        let foreign = DescriptorHandle {
            cpu: other.cpu_start(),
            gpu: other.gpu_start(),
            index: 0,
        };

        assert!(device
            .create_constant_buffer_view(&buffer, 256, &heap, foreign)
            .is_err());
        assert_eq!(heap.view(0), None);
    }
}
