use std::marker::PhantomData;
use std::ptr::NonNull;

use bytemuck::Pod;
use tracing::debug;

use crate::descriptor_heap::{DescriptorHandle, DescriptorHeap};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{DescriptorHeapKind, Device, MappableBuffer};

/// Constant buffer views must cover a multiple of this many bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// How the uploaded buffer is exposed to shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferView {
    Structured { element_count: u32, element_stride: u32 },
    Constant { size_in_bytes: u32 },
}

/// A persistently mapped buffer in upload memory plus its shader-visible view.
///
/// The mapping stays open until the buffer is dropped, so new contents can be
/// copied in every frame. What the GPU sees is whatever was written before the
/// submission that reads it; the caller must not overwrite data a frame still in
/// flight is reading.
pub struct UploadBuffer<D: Device, T> {
    buffer: D::Buffer,
    mapped: NonNull<u8>,
    size_in_bytes: u64,
    element_count: usize,
    descriptor: DescriptorHandle,
    view: BufferView,
    _element: PhantomData<T>,
}

/// Copies `data` into a new upload buffer and registers a structured buffer view
/// over it in `heap`.
///
/// The descriptor slot is only claimed once the view has been written, so a
/// failure leaves the heap's cursor unchanged. Static geometry and per-frame data take the same path.
pub fn upload<D: Device, T: Pod>(
    device: &D,
    data: &[T],
    heap: &mut DescriptorHeap<D>,
    label: &str,
) -> RenderResult<UploadBuffer<D, T>> {
    expect_bindless_heap(heap)?;

    let bytes: &[u8] = bytemuck::cast_slice(data);
    let element_stride = std::mem::size_of::<T>();
    let (element_count, stride) = match (u32::try_from(data.len()), u32::try_from(element_stride)) {
        (Ok(count), Ok(stride)) if !bytes.is_empty() => (count, stride),
        _ => {
            return Err(RenderError::InvalidBufferSize {
                label: label.to_owned(),
                size_in_bytes: bytes.len() as u64,
            })
        }
    };

    let (buffer, mapped) = create_mapped(device, bytes, bytes.len() as u64, label)?;

    let descriptor = heap.next_handle()?;
    device.create_structured_buffer_view(&buffer, element_count, stride, heap.raw(), descriptor)?;
    heap.allocate_next()?;

    debug!(
        label,
        index = descriptor.index,
        element_count,
        element_stride = stride,
        "uploaded structured buffer"
    );

    Ok(UploadBuffer {
        buffer,
        mapped,
        size_in_bytes: bytes.len() as u64,
        element_count: data.len(),
        descriptor,
        view: BufferView::Structured {
            element_count,
            element_stride: stride,
        },
        _element: PhantomData,
    })
}

/// Like [`upload`] for a single value, registering a constant buffer view instead.
/// The buffer is padded to [`CONSTANT_BUFFER_ALIGNMENT`].
pub fn upload_constants<D: Device, T: Pod>(
    device: &D,
    value: &T,
    heap: &mut DescriptorHeap<D>,
    label: &str,
) -> RenderResult<UploadBuffer<D, T>> {
    expect_bindless_heap(heap)?;

    let bytes = bytemuck::bytes_of(value);
    if bytes.is_empty() {
        return Err(RenderError::InvalidBufferSize {
            label: label.to_owned(),
            size_in_bytes: 0,
        });
    }
    let padded = (bytes.len() as u64).next_multiple_of(CONSTANT_BUFFER_ALIGNMENT);
    let view_size = u32::try_from(padded).map_err(|_| RenderError::InvalidBufferSize {
        label: label.to_owned(),
        size_in_bytes: padded,
    })?;

    let (buffer, mapped) = create_mapped(device, bytes, padded, label)?;

    let descriptor = heap.next_handle()?;
    device.create_constant_buffer_view(&buffer, view_size, heap.raw(), descriptor)?;
    heap.allocate_next()?;

    debug!(
        label,
        index = descriptor.index,
        size_in_bytes = view_size,
        "uploaded constant buffer"
    );

    Ok(UploadBuffer {
        buffer,
        mapped,
        size_in_bytes: padded,
        element_count: 1,
        descriptor,
        view: BufferView::Constant {
            size_in_bytes: view_size,
        },
        _element: PhantomData,
    })
}

fn expect_bindless_heap<D: Device>(heap: &DescriptorHeap<D>) -> RenderResult<()> {
    if heap.kind() != DescriptorHeapKind::CbvSrvUav {
        return Err(RenderError::WrongHeapKind {
            label: heap.label().to_owned(),
            expected: DescriptorHeapKind::CbvSrvUav,
            found: heap.kind(),
        });
    }
    Ok(())
}

fn create_mapped<D: Device>(
    device: &D,
    bytes: &[u8],
    size_in_bytes: u64,
    label: &str,
) -> RenderResult<(D::Buffer, NonNull<u8>)> {
    let buffer = device.create_upload_buffer(size_in_bytes, label)?;
    let mapped = buffer.map()?;
    debug_assert!(buffer.size_in_bytes() >= bytes.len() as u64);

    // SAFETY: the mapping covers at least `size_in_bytes >= bytes.len()` bytes and
    // cannot overlap memory owned by a Rust slice.
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.as_ptr(), bytes.len()) };

    Ok((buffer, mapped))
}

impl<D: Device, T: Pod> UploadBuffer<D, T> {
    /// Overwrites the buffer from the start.
    pub fn write(&mut self, data: &[T]) -> RenderResult<()> {
        self.write_at(0, data)
    }

    /// Overwrites `data.len()` elements starting at element `offset`.
    pub fn write_at(&mut self, offset: usize, data: &[T]) -> RenderResult<()> {
        let end = offset.checked_add(data.len());
        if end.is_none_or(|end| end > self.element_count) {
            return Err(RenderError::UploadOverflow {
                offset,
                requested: data.len(),
                capacity: self.element_count,
            });
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        let byte_offset = offset * std::mem::size_of::<T>();
        // SAFETY: bounds checked above against the element count the mapping was
        // sized for; `&mut self` keeps other writers out.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mapped.as_ptr().add(byte_offset),
                bytes.len(),
            )
        };
        Ok(())
    }

    /// The mapped contents, including constant buffer padding.
    pub fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is `size_in_bytes` long and lives as long as `self.buffer`.
        unsafe { std::slice::from_raw_parts(self.mapped.as_ptr(), self.size_in_bytes as usize) }
    }

    /// Reads the elements back through the mapping.
    pub fn read(&self) -> Vec<T> {
        let stride = std::mem::size_of::<T>();
        self.bytes()[..self.element_count * stride]
            .chunks_exact(stride)
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }
}

impl<D: Device, T> UploadBuffer<D, T> {
    pub fn descriptor(&self) -> DescriptorHandle {
        self.descriptor
    }

    /// The index shaders use to find this buffer in the bindless heap.
    pub fn descriptor_index(&self) -> u32 {
        self.descriptor.index
    }

    pub fn mapped_ptr(&self) -> NonNull<u8> {
        self.mapped
    }

    pub fn resource(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn size_in_bytes(&self) -> u64 {
        self.size_in_bytes
    }

    pub fn len(&self) -> usize {
        self.element_count
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }

    pub fn view(&self) -> BufferView {
        self.view
    }
}
