use std::ptr::NonNull;
use std::time::Duration;

use tracing::{debug, warn};
use windows::core::*;
use windows::Win32::Foundation::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::*;

use super::create_device::create_device;
use crate::descriptor_heap::DescriptorHandle;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    CommandAllocator, CommandQueue, CpuDescriptorAddress, DescriptorHeapKind, Device, Fence,
    GpuDescriptorAddress, MappableBuffer, NativeDescriptorHeap,
};

pub struct D3d12Device {
    device: ID3D12Device,
    dxgi_factory: IDXGIFactory4,
    info_queue: Option<IDXGIInfoQueue>,
}

impl D3d12Device {
    pub fn create(use_warp_device: bool) -> RenderResult<Self> {
        let (dxgi_factory, device, info_queue) = create_device(use_warp_device)?;
        Ok(Self {
            device,
            dxgi_factory,
            info_queue,
        })
    }

    pub fn raw(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn dxgi_factory(&self) -> &IDXGIFactory4 {
        &self.dxgi_factory
    }

    pub fn info_queue(&self) -> Option<&IDXGIInfoQueue> {
        self.info_queue.as_ref()
    }

    /// The single direct queue every frame is submitted to.
    pub fn create_queue(&self) -> RenderResult<D3d12Queue> {
        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })?
        };
        set_name(&queue, "graphics queue");
        Ok(D3d12Queue { queue })
    }

    /// Why the device went away, if it did.
    pub fn removed_reason(&self) -> Option<String> {
        removed_reason(&self.device)
    }
}

fn removed_reason(device: &ID3D12Device) -> Option<String> {
    unsafe { device.GetDeviceRemovedReason() }
        .err()
        .map(|e| format!("{} ({:?})", e.message(), e.code()))
}

fn set_name<T: Interface>(object: &T, label: &str) {
    if !cfg!(debug_assertions) {
        return;
    }
    if let Ok(object) = object.cast::<ID3D12Object>() {
        if let Err(e) = unsafe { object.SetName(&HSTRING::from(label)) } {
            warn!(label, "SetName failed: {e}");
        }
    }
}

fn heap_type(kind: DescriptorHeapKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorHeapKind::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapKind::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorHeapKind::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapKind::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
    }
}

fn cpu_handle(handle: DescriptorHandle) -> D3D12_CPU_DESCRIPTOR_HANDLE {
    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.cpu.0 }
}

pub struct D3d12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    kind: DescriptorHeapKind,
    capacity: u32,
    stride: u32,
}

impl D3d12DescriptorHeap {
    pub fn raw(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    /// Rejects views aimed at a slot this heap does not own, or at a heap that
    /// cannot hold buffer views.
    fn check_destination(
        &self,
        destination: DescriptorHandle,
        operation: &'static str,
    ) -> RenderResult<()> {
        let expected = self.cpu_start().0 + destination.index as usize * self.stride as usize;
        if self.kind != DescriptorHeapKind::CbvSrvUav
            || destination.index >= self.capacity
            || destination.cpu.0 != expected
        {
            return Err(RenderError::device(
                operation,
                format!(
                    "descriptor {} at {:#x} is not part of this {} heap",
                    destination.index, destination.cpu.0, self.kind
                ),
            ));
        }
        Ok(())
    }
}

impl NativeDescriptorHeap for D3d12DescriptorHeap {
    fn cpu_start(&self) -> CpuDescriptorAddress {
        CpuDescriptorAddress(unsafe { self.heap.GetCPUDescriptorHandleForHeapStart() }.ptr)
    }

    fn gpu_start(&self) -> GpuDescriptorAddress {
        GpuDescriptorAddress(unsafe { self.heap.GetGPUDescriptorHandleForHeapStart() }.ptr)
    }
}

/// A committed buffer in the upload heap.
pub struct D3d12Buffer {
    resource: ID3D12Resource,
    size_in_bytes: u64,
}

impl D3d12Buffer {
    pub fn raw(&self) -> &ID3D12Resource {
        &self.resource
    }
}

impl MappableBuffer for D3d12Buffer {
    fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    fn map(&self) -> RenderResult<NonNull<u8>> {
        let mut data = std::ptr::null_mut();
        // The CPU never reads upload memory back.
        let read_range = D3D12_RANGE { Begin: 0, End: 0 };
        unsafe { self.resource.Map(0, Some(&read_range), Some(&mut data))? };
        NonNull::new(data.cast::<u8>())
            .ok_or_else(|| RenderError::device("Map", "returned a null pointer"))
    }
}

pub struct D3d12CommandAllocator {
    allocator: ID3D12CommandAllocator,
}

impl D3d12CommandAllocator {
    pub fn raw(&self) -> &ID3D12CommandAllocator {
        &self.allocator
    }
}

impl CommandAllocator for D3d12CommandAllocator {
    fn reset(&self) -> RenderResult<()> {
        unsafe { self.allocator.Reset()? };
        Ok(())
    }
}

pub struct D3d12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
    device: ID3D12Device,
}

impl D3d12Fence {
    pub fn raw(&self) -> &ID3D12Fence {
        &self.fence
    }
}

impl Fence for D3d12Fence {
    fn completed_value(&self) -> RenderResult<u64> {
        let completed = unsafe { self.fence.GetCompletedValue() };
        // A removed device reports every fence as complete with all bits set.
        if completed == u64::MAX {
            return Err(RenderError::DeviceRemoved {
                reason: removed_reason(&self.device)
                    .unwrap_or_else(|| String::from("fence reported u64::MAX")),
            });
        }
        Ok(completed)
    }

    fn wait(&self, value: u64, timeout: Option<Duration>) -> RenderResult<()> {
        if self.completed_value()? >= value {
            return Ok(());
        }

        unsafe { self.fence.SetEventOnCompletion(value, self.event)? };
        let milliseconds = match timeout {
            Some(timeout) => u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1),
            None => INFINITE,
        };
        let result = unsafe { WaitForSingleObject(self.event, milliseconds) };

        if result == WAIT_OBJECT_0 {
            Ok(())
        } else if result == WAIT_TIMEOUT {
            Err(RenderError::FenceTimeout {
                value,
                completed: self.completed_value()?,
                timeout: timeout.unwrap_or_default(),
            })
        } else {
            Err(Error::from_win32().into())
        }
    }
}

impl Drop for D3d12Fence {
    fn drop(&mut self) {
        if !self.event.is_invalid() {
            if let Err(e) = unsafe { CloseHandle(self.event) } {
                warn!("Failed to close fence event: {e}");
            }
        }
    }
}

pub struct D3d12Queue {
    queue: ID3D12CommandQueue,
}

impl D3d12Queue {
    pub fn raw(&self) -> &ID3D12CommandQueue {
        &self.queue
    }
}

impl CommandQueue for D3d12Queue {
    type Fence = D3d12Fence;

    fn signal(&self, fence: &D3d12Fence, value: u64) -> RenderResult<()> {
        unsafe { self.queue.Signal(&fence.fence, value)? };
        Ok(())
    }
}

impl Device for D3d12Device {
    type DescriptorHeap = D3d12DescriptorHeap;
    type Buffer = D3d12Buffer;
    type CommandAllocator = D3d12CommandAllocator;
    type Fence = D3d12Fence;
    type Queue = D3d12Queue;

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
        label: &str,
    ) -> RenderResult<D3d12DescriptorHeap> {
        let heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: heap_type(kind),
                NumDescriptors: capacity,
                Flags: if shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            })
        }?;
        set_name(&heap, label);
        Ok(D3d12DescriptorHeap {
            heap,
            kind,
            capacity,
            stride: self.descriptor_stride(kind),
        })
    }

    fn descriptor_stride(&self, kind: DescriptorHeapKind) -> u32 {
        unsafe { self.device.GetDescriptorHandleIncrementSize(heap_type(kind)) }
    }

    fn create_upload_buffer(&self, size_in_bytes: u64, label: &str) -> RenderResult<D3d12Buffer> {
        if size_in_bytes == 0 {
            return Err(RenderError::InvalidBufferSize {
                label: label.to_owned(),
                size_in_bytes,
            });
        }

        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_UPLOAD,
            ..Default::default()
        };
        let resource_desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: size_in_bytes,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        };

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &resource_desc,
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                &mut resource,
            )
        }
        .map_err(|e| {
            if e.code() == E_OUTOFMEMORY {
                RenderError::OutOfDeviceMemory {
                    label: label.to_owned(),
                    requested: size_in_bytes,
                }
            } else {
                e.into()
            }
        })?;
        let resource = resource.ok_or_else(|| {
            RenderError::device("CreateCommittedResource", "no resource was returned")
        })?;
        set_name(&resource, label);

        debug!(label, size_in_bytes, "created upload buffer");
        Ok(D3d12Buffer {
            resource,
            size_in_bytes,
        })
    }

    fn create_structured_buffer_view(
        &self,
        buffer: &D3d12Buffer,
        element_count: u32,
        element_stride: u32,
        heap: &D3d12DescriptorHeap,
        destination: DescriptorHandle,
    ) -> RenderResult<()> {
        heap.check_destination(destination, "CreateShaderResourceView")?;
        let desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_UNKNOWN,
            ViewDimension: D3D12_SRV_DIMENSION_BUFFER,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Buffer: D3D12_BUFFER_SRV {
                    FirstElement: 0,
                    NumElements: element_count,
                    StructureByteStride: element_stride,
                    Flags: D3D12_BUFFER_SRV_FLAG_NONE,
                },
            },
        };
        unsafe {
            self.device.CreateShaderResourceView(
                &buffer.resource,
                Some(&desc as *const _),
                cpu_handle(destination),
            )
        };
        Ok(())
    }

    fn create_constant_buffer_view(
        &self,
        buffer: &D3d12Buffer,
        size_in_bytes: u32,
        heap: &D3d12DescriptorHeap,
        destination: DescriptorHandle,
    ) -> RenderResult<()> {
        heap.check_destination(destination, "CreateConstantBufferView")?;
        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: unsafe { buffer.resource.GetGPUVirtualAddress() },
            SizeInBytes: size_in_bytes,
        };
        unsafe {
            self.device
                .CreateConstantBufferView(Some(&desc as *const _), cpu_handle(destination))
        };
        Ok(())
    }

    fn create_command_allocator(&self, label: &str) -> RenderResult<D3d12CommandAllocator> {
        let allocator: ID3D12CommandAllocator = unsafe {
            self.device
                .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)?
        };
        set_name(&allocator, label);
        Ok(D3d12CommandAllocator { allocator })
    }

    fn create_fence(&self, initial_value: u64) -> RenderResult<D3d12Fence> {
        let fence: ID3D12Fence =
            unsafe { self.device.CreateFence(initial_value, D3D12_FENCE_FLAG_NONE)? };
        let event = unsafe { CreateEventA(None, false, false, None)? };
        if event.is_invalid() {
            return Err(Error::from_win32().into());
        }
        Ok(D3d12Fence {
            fence,
            event,
            device: self.device.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor_heap::DescriptorHeap;

    #[test]
    fn views_must_target_their_own_heap() {
        let device = match D3d12Device::create(true) {
            Ok(device) => device,
            Err(e) => {
                eprintln!("skipping, no WARP device: {e}");
                return;
            }
        };
        let mut bindless =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 4, "bindless").unwrap();
        let mut other =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 4, "other").unwrap();
        let mut render_targets =
            DescriptorHeap::create(&device, DescriptorHeapKind::RenderTarget, 2, "rtv").unwrap();
        let buffer = device.create_upload_buffer(256, "scratch").unwrap();

        let own = bindless.allocate_next().unwrap();
        device
            .create_constant_buffer_view(&buffer, 256, bindless.raw(), own)
            .unwrap();

        let foreign = other.allocate_next().unwrap();
        assert!(device
            .create_constant_buffer_view(&buffer, 256, bindless.raw(), foreign)
            .is_err());
        assert!(device
            .create_structured_buffer_view(&buffer, 4, 64, bindless.raw(), foreign)
            .is_err());

        let rtv = render_targets.allocate_next().unwrap();
        assert!(device
            .create_constant_buffer_view(&buffer, 256, render_targets.raw(), rtv)
            .is_err());
    }
}
