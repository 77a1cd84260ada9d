use direct3d12_bindless_renderer::headless::{HeadlessDevice, HeadlessView};
use direct3d12_bindless_renderer::{
    upload, upload_constants, DescriptorHeap, DescriptorHeapKind, RenderError,
};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct Transform {
    offset: [f32; 4],
}

#[test]
fn uploads_share_one_heap_in_call_order() {
    let device = HeadlessDevice::new();
    let mut heap =
        DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 10, "bindless").unwrap();

    let vertices = upload(
        &device,
        &[Vertex {
            position: [0.0; 3],
            color: [1.0; 4],
        }; 3],
        &mut heap,
        "vertices",
    )
    .unwrap();
    let indices = upload(&device, &[0u32, 1, 2], &mut heap, "indices").unwrap();
    let colors = upload(&device, &[[0.5f32; 4]; 2], &mut heap, "colors").unwrap();
    let transform = upload_constants(
        &device,
        &Transform {
            offset: [0.1, 0.2, 0.0, 0.0],
        },
        &mut heap,
        "transform",
    )
    .unwrap();

    assert_eq!(vertices.descriptor_index(), 0);
    assert_eq!(indices.descriptor_index(), 1);
    assert_eq!(colors.descriptor_index(), 2);
    assert_eq!(transform.descriptor_index(), 3);
    assert_eq!(heap.allocated(), 4);
    assert_eq!(heap.remaining(), 6);

    assert!(matches!(
        heap.raw().view(3),
        Some(HeadlessView::ConstantBuffer {
            size_in_bytes: 256,
            ..
        })
    ));
    assert_eq!(heap.handle_at(3).unwrap(), transform.descriptor());
}

#[test]
fn running_out_of_descriptors_is_reported_and_recoverable_state_is_kept() {
    let device = HeadlessDevice::new();
    let mut heap =
        DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 2, "small").unwrap();

    upload(&device, &[1u32], &mut heap, "a").unwrap();
    upload(&device, &[2u32], &mut heap, "b").unwrap();
    let error = upload(&device, &[3u32], &mut heap, "c").err().unwrap();

    assert!(matches!(
        error,
        RenderError::HeapExhausted {
            kind: DescriptorHeapKind::CbvSrvUav,
            capacity: 2,
            ..
        }
    ));
    assert!(!error.is_device_lost());
    assert_eq!(heap.allocated(), 2);
}

#[test]
fn heaps_of_different_kinds_are_independent() {
    let device = HeadlessDevice::new();
    let mut rtvs =
        DescriptorHeap::create(&device, DescriptorHeapKind::RenderTarget, 3, "rtv").unwrap();
    let mut dsvs =
        DescriptorHeap::create(&device, DescriptorHeapKind::DepthStencil, 1, "dsv").unwrap();

    assert_eq!(rtvs.allocate_next().unwrap().index, 0);
    assert_eq!(dsvs.allocate_next().unwrap().index, 0);
    assert_eq!(rtvs.allocate_next().unwrap().index, 1);
    assert!(dsvs.allocate_next().is_err());
    assert_ne!(rtvs.cpu_start(), dsvs.cpu_start());
    assert!(rtvs.gpu_start().is_null());
}
