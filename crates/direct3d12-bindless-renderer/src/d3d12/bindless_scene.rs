use windows::core::*;
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D12::*;

use super::backend::{D3d12CommandAllocator, D3d12Device};
use super::create_pipeline_state::create_pipeline_state;
use super::create_root_signature::create_root_signature;
use super::presenter::D3d12Presenter;
use super::transition_barrier::transition_barrier;
use crate::descriptor_heap::{DescriptorHandle, DescriptorHeap};
use crate::error::{RenderError, RenderResult};
use crate::frame_loop::{Frame, FrameRecorder};
use crate::scene::{RenderResources, SceneBuffers};
use crate::shader::ShaderCompiler;

/// Records and executes one draw of the triangle per frame, binding nothing but
/// the bindless heap and two root constants.
pub struct BindlessScene {
    command_list: ID3D12GraphicsCommandList,
    root_signature: ID3D12RootSignature,
    pipeline_state: ID3D12PipelineState,
    bindless_heap: ID3D12DescriptorHeap,
    buffers: SceneBuffers<D3d12Device>,
    render_targets: Vec<ID3D12Resource>,
    rtv_handles: Vec<DescriptorHandle>,
    viewport: D3D12_VIEWPORT,
    scissor_rect: RECT,
}

impl BindlessScene {
    pub fn new(
        device: &D3d12Device,
        initial_allocator: &D3d12CommandAllocator,
        presenter: &D3d12Presenter,
        bindless_heap: &mut DescriptorHeap<D3d12Device>,
        compiler: &impl ShaderCompiler,
    ) -> RenderResult<Self> {
        let root_signature = create_root_signature(device.raw())?;
        let pipeline_state = create_pipeline_state(device.raw(), &root_signature, compiler)?;

        let command_list: ID3D12GraphicsCommandList = unsafe {
            device.raw().CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                initial_allocator.raw(),
                &pipeline_state,
            )
        }?;
        unsafe { command_list.Close()? };

        let (width, height) = presenter.size();
        let aspect_ratio = width as f32 / height.max(1) as f32;
        let buffers = SceneBuffers::create(
            device,
            bindless_heap,
            presenter.render_targets().len(),
            aspect_ratio,
        )?;

        Ok(Self {
            command_list,
            root_signature,
            pipeline_state,
            bindless_heap: bindless_heap.raw().raw().clone(),
            buffers,
            render_targets: presenter.render_targets().to_vec(),
            rtv_handles: presenter.rtv_handles().to_vec(),
            viewport: D3D12_VIEWPORT {
                TopLeftX: 0.0,
                TopLeftY: 0.0,
                Width: width as f32,
                Height: height as f32,
                MinDepth: D3D12_MIN_DEPTH,
                MaxDepth: D3D12_MAX_DEPTH,
            },
            scissor_rect: RECT {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            },
        })
    }
}

impl FrameRecorder<D3d12Device> for BindlessScene {
    fn record(&mut self, frame: &Frame<'_, D3d12Device>) -> RenderResult<()> {
        let slot_index = frame.context.slot_index;
        let (render_target, rtv) = match (
            self.render_targets.get(slot_index),
            self.rtv_handles.get(slot_index),
        ) {
            (Some(render_target), Some(rtv)) => (render_target, rtv),
            _ => {
                return Err(RenderError::InvalidFrameSlot {
                    index: slot_index,
                    frame_count: self.render_targets.len(),
                })
            }
        };
        let render_resources = self.buffers.update(slot_index, frame.frame_number)?;

        let command_list = &self.command_list;
        unsafe { command_list.Reset(frame.context.allocator.raw(), &self.pipeline_state)? };

        let rtv_handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.cpu.0 };
        let clear_color = [0.0_f32, 0.2_f32, 0.4_f32, 1.0_f32];

        unsafe {
            command_list.SetDescriptorHeaps(&[Some(self.bindless_heap.clone())]);
            command_list.SetGraphicsRootSignature(&self.root_signature);
            command_list.SetGraphicsRoot32BitConstants(
                0,
                RenderResources::NUM_32BIT_VALUES,
                &render_resources as *const RenderResources as *const _,
                0,
            );
            command_list.RSSetViewports(&[self.viewport]);
            command_list.RSSetScissorRects(&[self.scissor_rect]);

            command_list.ResourceBarrier(&[transition_barrier(
                render_target,
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )]);

            command_list.OMSetRenderTargets(1, Some(&rtv_handle), false, None);
            command_list.ClearRenderTargetView(rtv_handle, &clear_color, None);
            command_list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            command_list.DrawInstanced(3, 1, 0, 0);

            command_list.ResourceBarrier(&[transition_barrier(
                render_target,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PRESENT,
            )]);

            command_list.Close()?;
        }

        let command_lists = [Some(command_list.cast::<ID3D12CommandList>()?)];
        unsafe { frame.context.queue.raw().ExecuteCommandLists(&command_lists) };
        Ok(())
    }
}
