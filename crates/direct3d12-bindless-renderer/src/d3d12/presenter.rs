use tracing::{debug, info};
use windows::core::*;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use super::backend::{D3d12Device, D3d12Queue};
use super::RENDER_TARGET_FORMAT;
use crate::descriptor_heap::{DescriptorHandle, DescriptorHeap};
use crate::error::RenderResult;
use crate::frame_loop::Presenter;
use crate::gpu::DescriptorHeapKind;

/// A flip-model swap chain and the render target views of its back buffers.
///
/// The back buffer size is fixed at creation; window resizes are not followed.
pub struct D3d12Presenter {
    swap_chain: IDXGISwapChain3,
    render_targets: Vec<ID3D12Resource>,
    rtv_handles: Vec<DescriptorHandle>,
    _rtv_heap: DescriptorHeap<D3d12Device>,
    size: (u32, u32),
}

impl D3d12Presenter {
    pub fn create(
        device: &D3d12Device,
        queue: &D3d12Queue,
        hwnd: HWND,
        image_count: usize,
        size: (u32, u32),
    ) -> RenderResult<Self> {
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            BufferCount: image_count as u32,
            Width: size.0,
            Height: size.1,
            Format: RENDER_TARGET_FORMAT,
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            ..Default::default()
        };

        let factory = device.dxgi_factory();
        let swap_chain_base: IDXGISwapChain1 = unsafe {
            factory.CreateSwapChainForHwnd(queue.raw(), hwnd, &swap_chain_desc, None, None)?
        };
        let swap_chain: IDXGISwapChain3 = swap_chain_base.cast()?;

        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)? };

        let mut rtv_heap = DescriptorHeap::create(
            device,
            DescriptorHeapKind::RenderTarget,
            image_count as u32,
            "back buffer RTVs",
        )?;

        let mut render_targets = Vec::with_capacity(image_count);
        let mut rtv_handles = Vec::with_capacity(image_count);
        for i in 0..image_count as u32 {
            let resource: ID3D12Resource = unsafe { swap_chain.GetBuffer(i)? };
            let handle = rtv_heap.allocate_next()?;
            unsafe {
                device.raw().CreateRenderTargetView(
                    &resource,
                    None,
                    D3D12_CPU_DESCRIPTOR_HANDLE { ptr: handle.cpu.0 },
                )
            };
            debug!(index = i, rtv = handle.index, "created back buffer view");
            render_targets.push(resource);
            rtv_handles.push(handle);
        }

        info!(image_count, width = size.0, height = size.1, "swap chain created");
        Ok(Self {
            swap_chain,
            render_targets,
            rtv_handles,
            _rtv_heap: rtv_heap,
            size,
        })
    }

    pub fn render_targets(&self) -> &[ID3D12Resource] {
        &self.render_targets
    }

    pub fn rtv_handles(&self) -> &[DescriptorHandle] {
        &self.rtv_handles
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }
}

impl Presenter for D3d12Presenter {
    fn image_count(&self) -> usize {
        self.render_targets.len()
    }

    fn next_image_index(&self) -> RenderResult<usize> {
        Ok(unsafe { self.swap_chain.GetCurrentBackBufferIndex() } as usize)
    }

    fn present(&mut self, sync_interval: u32) -> RenderResult<()> {
        unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) }.ok()?;
        Ok(())
    }
}
