use tracing::error;
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;

use crate::error::{RenderError, RenderResult};
use crate::scene::RenderResources;

/// One block of root constants carrying the descriptor indices, and direct
/// indexing of the CBV/SRV/UAV heap. Nothing else is bound.
pub fn create_root_signature(device: &ID3D12Device) -> RenderResult<ID3D12RootSignature> {
    let parameters = [D3D12_ROOT_PARAMETER1 {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
        Anonymous: D3D12_ROOT_PARAMETER1_0 {
            Constants: D3D12_ROOT_CONSTANTS {
                ShaderRegister: 0,
                RegisterSpace: 0,
                Num32BitValues: RenderResources::NUM_32BIT_VALUES,
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    }];

    let desc = D3D12_VERSIONED_ROOT_SIGNATURE_DESC {
        Version: D3D_ROOT_SIGNATURE_VERSION_1_1,
        Anonymous: D3D12_VERSIONED_ROOT_SIGNATURE_DESC_0 {
            Desc_1_1: D3D12_ROOT_SIGNATURE_DESC1 {
                NumParameters: parameters.len() as u32,
                pParameters: parameters.as_ptr(),
                NumStaticSamplers: 0,
                pStaticSamplers: std::ptr::null(),
                Flags: D3D12_ROOT_SIGNATURE_FLAG_CBV_SRV_UAV_HEAP_DIRECTLY_INDEXED,
            },
        },
    };

    let mut signature_blob: Option<ID3DBlob> = None;
    let mut error_blob: Option<ID3DBlob> = None;

    let serialize_result = unsafe {
        D3D12SerializeVersionedRootSignature(&desc, &mut signature_blob, Some(&mut error_blob))
    };

    if let Err(e) = serialize_result {
        let message = match error_blob {
            Some(error) => {
                let error_msg = unsafe {
                    String::from_utf8_lossy(std::slice::from_raw_parts(
                        error.GetBufferPointer() as *const u8,
                        error.GetBufferSize(),
                    ))
                    .into_owned()
                };
                error!("Root signature serialization error: {error_msg}");
                error_msg
            }
            None => e.message().to_string(),
        };
        return Err(RenderError::device("D3D12SerializeVersionedRootSignature", message));
    }

    let signature_blob = signature_blob.ok_or_else(|| {
        RenderError::device("D3D12SerializeVersionedRootSignature", "no blob was returned")
    })?;
    let signature_data: &[u8] = unsafe {
        std::slice::from_raw_parts(
            signature_blob.GetBufferPointer() as *const u8,
            signature_blob.GetBufferSize(),
        )
    };

    Ok(unsafe { device.CreateRootSignature(0, signature_data) }?)
}
