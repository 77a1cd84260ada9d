use tracing::{debug, error};
use widestring::U16CString;
use windows::core::*;
use windows::Win32::Graphics::Direct3D::Dxc::*;

use crate::error::{RenderError, RenderResult};
use crate::shader::{ShaderBytecode, ShaderCompiler, ShaderSource};

/// DXC, created once at startup and passed to whatever builds pipelines.
pub struct DxcShaderCompiler {
    utils: IDxcUtils,
    compiler: IDxcCompiler3,
    include_handler: IDxcIncludeHandler,
}

impl DxcShaderCompiler {
    pub fn new() -> RenderResult<Self> {
        let utils: IDxcUtils = unsafe { DxcCreateInstance(&CLSID_DxcUtils)? };
        let compiler: IDxcCompiler3 = unsafe { DxcCreateInstance(&CLSID_DxcCompiler)? };
        let include_handler = unsafe { utils.CreateDefaultIncludeHandler()? };
        Ok(Self {
            utils,
            compiler,
            include_handler,
        })
    }
}

/// Arguments for one compilation, before conversion to wide strings.
pub fn compile_arguments(source: &ShaderSource) -> Vec<String> {
    let mut arguments = vec![
        String::from("-HV"),
        String::from("2021"),
        String::from("-E"),
        source.entry_point.clone(),
        String::from("-T"),
        source.profile.clone(),
        // row-major matrices
        String::from("-Zpr"),
        // warnings are errors
        String::from("-WX"),
        String::from("-all_resources_bound"),
    ];
    if cfg!(debug_assertions) {
        arguments.extend(["-Zi", "-Qembed_debug", "-Od"].map(String::from));
    } else {
        arguments.push(String::from("-O3"));
    }
    arguments
}

impl ShaderCompiler for DxcShaderCompiler {
    fn compile(&self, source: &ShaderSource) -> RenderResult<ShaderBytecode> {
        let failure = |message: String| RenderError::ShaderCompile {
            path: source.path.display().to_string(),
            entry_point: source.entry_point.clone(),
            profile: source.profile.clone(),
            message,
        };

        let arguments = compile_arguments(source)
            .iter()
            .map(|argument| U16CString::from_str(argument))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| failure(format!("invalid argument: {e}")))?;
        let argument_ptrs: Vec<PCWSTR> = arguments
            .iter()
            .map(|argument| PCWSTR(argument.as_ptr()))
            .collect();

        let path = HSTRING::from(source.path.as_os_str());
        let source_blob: IDxcBlobEncoding = unsafe { self.utils.LoadFile(&path, None) }
            .map_err(|e| failure(format!("cannot load source: {}", e.message())))?;

        let source_buffer = DxcBuffer {
            Ptr: unsafe { source_blob.GetBufferPointer() },
            Size: unsafe { source_blob.GetBufferSize() },
            Encoding: 0,
        };

        let result: IDxcResult = unsafe {
            self.compiler
                .Compile(&source_buffer, Some(&argument_ptrs), &self.include_handler)
        }?;

        let status = unsafe { result.GetStatus()? };
        if status.is_err() {
            let message = unsafe { result.GetErrorBuffer() }
                .map(|errors| blob_to_string(&errors))
                .unwrap_or_else(|_| format!("{status:?}"));
            error!(
                path = %source.path.display(),
                entry_point = %source.entry_point,
                "shader compilation failed"
            );
            return Err(failure(message));
        }

        let blob = unsafe { result.GetResult()? };
        let bytes = unsafe {
            std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
        };

        debug!(
            path = %source.path.display(),
            entry_point = %source.entry_point,
            profile = %source.profile,
            size = bytes.len(),
            "compiled shader"
        );
        Ok(ShaderBytecode::new(bytes.to_vec()))
    }
}

fn blob_to_string(blob: &IDxcBlobEncoding) -> String {
    let bytes = unsafe {
        std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize())
    };
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\0')
        .trim()
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_name_entry_point_and_profile() {
        let source = ShaderSource::new("triangle.hlsl", "VSMain", "vs_6_6");
        let arguments = compile_arguments(&source);

        let entry = arguments.iter().position(|a| a == "-E").unwrap();
        assert_eq!(arguments[entry + 1], "VSMain");
        let profile = arguments.iter().position(|a| a == "-T").unwrap();
        assert_eq!(arguments[profile + 1], "vs_6_6");
        assert!(arguments.iter().any(|a| a == "-WX"));
        assert!(arguments.iter().any(|a| a == "-Zpr"));
    }
}
