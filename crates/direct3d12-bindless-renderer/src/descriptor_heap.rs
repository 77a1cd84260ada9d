use tracing::debug;

use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    CpuDescriptorAddress, DescriptorHeapKind, Device, GpuDescriptorAddress, NativeDescriptorHeap,
};

/// One slot in a descriptor heap.
///
/// A handle is a view of `(heap start, index, stride)` and owns no storage; the
/// `index` is what bindless shaders receive to look the resource up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHandle {
    pub cpu: CpuDescriptorAddress,
    /// [`GpuDescriptorAddress::NULL`] when the heap is not shader visible.
    pub gpu: GpuDescriptorAddress,
    pub index: u32,
}

/// Append-only allocator over one fixed-capacity descriptor heap.
///
/// Slots are handed out in call order starting at 0 and never reused; running out
/// is a configuration error ([`RenderError::HeapExhausted`]), the heap never grows.
/// There is no internal locking, `allocate_next` needs `&mut self`.
pub struct DescriptorHeap<D: Device> {
    heap: D::DescriptorHeap,
    kind: DescriptorHeapKind,
    label: String,
    capacity: u32,
    stride: u32,
    cpu_start: CpuDescriptorAddress,
    gpu_start: GpuDescriptorAddress,
    next_index: u32,
}

impl<D: Device> DescriptorHeap<D> {
    pub fn create(
        device: &D,
        kind: DescriptorHeapKind,
        capacity: u32,
        label: &str,
    ) -> RenderResult<Self> {
        if capacity == 0 {
            return Err(RenderError::ZeroCapacity {
                label: label.to_owned(),
            });
        }

        let shader_visible = kind.is_shader_visible();
        let heap = device.create_descriptor_heap(kind, capacity, shader_visible, label)?;
        let stride = device.descriptor_stride(kind);

        let cpu_start = heap.cpu_start();
        let gpu_start = if shader_visible {
            heap.gpu_start()
        } else {
            GpuDescriptorAddress::NULL
        };

        debug!(
            label,
            %kind,
            capacity,
            stride,
            shader_visible,
            "created descriptor heap"
        );

        Ok(Self {
            heap,
            kind,
            label: label.to_owned(),
            capacity,
            stride,
            cpu_start,
            gpu_start,
            next_index: 0,
        })
    }

    /// Hands out the next unused slot and advances the cursor.
    ///
    /// On failure the cursor is left where it was.
    pub fn allocate_next(&mut self) -> RenderResult<DescriptorHandle> {
        let handle = self.next_handle()?;
        self.next_index += 1;
        Ok(handle)
    }

    /// The slot [`DescriptorHeap::allocate_next`] would return, without claiming it.
    pub fn next_handle(&self) -> RenderResult<DescriptorHandle> {
        if self.next_index >= self.capacity {
            return Err(RenderError::HeapExhausted {
                label: self.label.clone(),
                kind: self.kind,
                capacity: self.capacity,
            });
        }
        Ok(self.handle_unchecked(self.next_index))
    }

    /// Recomputes the handle for `index` without touching the cursor.
    pub fn handle_at(&self, index: u32) -> RenderResult<DescriptorHandle> {
        if index >= self.capacity {
            return Err(RenderError::IndexOutOfRange {
                label: self.label.clone(),
                index,
                capacity: self.capacity,
            });
        }
        Ok(self.handle_unchecked(index))
    }

    fn handle_unchecked(&self, index: u32) -> DescriptorHandle {
        let cpu = CpuDescriptorAddress(self.cpu_start.0 + index as usize * self.stride as usize);
        let gpu = if self.gpu_start.is_null() {
            GpuDescriptorAddress::NULL
        } else {
            GpuDescriptorAddress(self.gpu_start.0 + u64::from(index) * u64::from(self.stride))
        };
        DescriptorHandle { cpu, gpu, index }
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Number of slots handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next_index
    }

    pub fn remaining(&self) -> u32 {
        self.capacity - self.next_index
    }

    pub fn is_shader_visible(&self) -> bool {
        self.kind.is_shader_visible()
    }

    pub fn cpu_start(&self) -> CpuDescriptorAddress {
        self.cpu_start
    }

    pub fn gpu_start(&self) -> GpuDescriptorAddress {
        self.gpu_start
    }

    /// The native heap, for binding it on a command list.
    pub fn raw(&self) -> &D::DescriptorHeap {
        &self.heap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessDevice;

    #[test]
    fn allocates_in_call_order_until_full() {
        let device = HeadlessDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 4, "bindless").unwrap();

        for expected in 0..4 {
            let peeked = heap.next_handle().unwrap();
            assert_eq!(heap.allocated(), expected);
            assert_eq!(heap.allocate_next().unwrap(), peeked);
            assert_eq!(peeked.index, expected);
        }
        assert!(heap.next_handle().is_err());

        let error = heap.allocate_next().unwrap_err();
        assert!(matches!(
            error,
            RenderError::HeapExhausted { capacity: 4, .. }
        ));
        assert_eq!(heap.allocated(), 4);
        assert_eq!(heap.remaining(), 0);
    }

    #[test]
    fn handle_at_is_base_plus_index_times_stride() {
        let device = HeadlessDevice::new();
        let heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 16, "bindless").unwrap();

        for index in 0..16 {
            let handle = heap.handle_at(index).unwrap();
            assert_eq!(
                handle.cpu.0,
                heap.cpu_start().0 + index as usize * heap.stride() as usize
            );
            assert_eq!(
                handle.gpu.0,
                heap.gpu_start().0 + u64::from(index) * u64::from(heap.stride())
            );
        }
        assert!(matches!(
            heap.handle_at(16),
            Err(RenderError::IndexOutOfRange { index: 16, .. })
        ));
    }

    #[test]
    fn handle_at_matches_allocated_handle() {
        let device = HeadlessDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::Sampler, 8, "samplers").unwrap();

        heap.allocate_next().unwrap();
        let second = heap.allocate_next().unwrap();

        assert_eq!(heap.handle_at(1).unwrap(), second);
        assert_eq!(heap.allocated(), 2);
    }

    #[test]
    fn render_target_heap_has_no_gpu_addresses() {
        let device = HeadlessDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::RenderTarget, 3, "back buffers")
                .unwrap();

        assert!(!heap.is_shader_visible());
        for _ in 0..3 {
            assert!(heap.allocate_next().unwrap().gpu.is_null());
        }
        assert!(heap.handle_at(2).unwrap().gpu.is_null());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let device = HeadlessDevice::new();
        let result = DescriptorHeap::create(&device, DescriptorHeapKind::DepthStencil, 0, "depth");
        assert!(matches!(result, Err(RenderError::ZeroCapacity { .. })));
    }
}
