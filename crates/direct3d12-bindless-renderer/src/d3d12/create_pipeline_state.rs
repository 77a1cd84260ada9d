use windows::Win32::Foundation::FALSE;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use super::RENDER_TARGET_FORMAT;
use crate::error::{RenderError, RenderResult};
use crate::shader::{locate_shader, ShaderBytecode, ShaderCompiler, ShaderSource};

pub const SHADER_FILE: &str = "bindless_triangle.hlsl";

/// Compiles the bindless triangle shaders and builds its pipeline.
///
/// There is no input layout: the vertex shader pulls vertices out of a structured
/// buffer by `SV_VertexID`.
pub fn create_pipeline_state(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    compiler: &impl ShaderCompiler,
) -> RenderResult<ID3D12PipelineState> {
    let shader_path = locate_shader(SHADER_FILE).ok_or_else(|| RenderError::ShaderCompile {
        path: SHADER_FILE.to_owned(),
        entry_point: String::from("VSMain"),
        profile: String::from("vs_6_6"),
        message: String::from("not found next to the executable or in shaders/"),
    })?;

    let vertex_shader = compiler.compile(&ShaderSource::new(&shader_path, "VSMain", "vs_6_6"))?;
    let pixel_shader = compiler.compile(&ShaderSource::new(&shader_path, "PSMain", "ps_6_6"))?;

    let mut rtv_formats = [DXGI_FORMAT_UNKNOWN; 8];
    rtv_formats[0] = RENDER_TARGET_FORMAT;

    let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: unsafe { std::mem::transmute_copy(root_signature) },
        VS: bytecode(&vertex_shader),
        PS: bytecode(&pixel_shader),
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: D3D12_CULL_MODE_NONE,
            ..Default::default()
        },
        BlendState: D3D12_BLEND_DESC {
            AlphaToCoverageEnable: FALSE,
            IndependentBlendEnable: FALSE,
            RenderTarget: [D3D12_RENDER_TARGET_BLEND_DESC {
                BlendEnable: FALSE,
                LogicOpEnable: FALSE,
                SrcBlend: D3D12_BLEND_ONE,
                DestBlend: D3D12_BLEND_ZERO,
                BlendOp: D3D12_BLEND_OP_ADD,
                SrcBlendAlpha: D3D12_BLEND_ONE,
                DestBlendAlpha: D3D12_BLEND_ZERO,
                BlendOpAlpha: D3D12_BLEND_OP_ADD,
                LogicOp: D3D12_LOGIC_OP_NOOP,
                RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
            }; 8],
        },
        DepthStencilState: D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: FALSE,
            StencilEnable: FALSE,
            ..Default::default()
        },
        SampleMask: u32::MAX,
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        NumRenderTargets: 1,
        RTVFormats: rtv_formats,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        ..Default::default()
    };

    Ok(unsafe { device.CreateGraphicsPipelineState(&pso_desc) }?)
}

fn bytecode(shader: &ShaderBytecode) -> D3D12_SHADER_BYTECODE {
    D3D12_SHADER_BYTECODE {
        pShaderBytecode: shader.as_bytes().as_ptr().cast(),
        BytecodeLength: shader.len(),
    }
}
