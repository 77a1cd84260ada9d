use std::time::Duration;

use crate::gpu::DescriptorHeapKind;

pub type RenderResult<T, E = RenderError> = core::result::Result<T, E>;

/// Every failure the allocation and synchronization layer can report.
///
/// None of these are retried locally. Callers either give up on the frame loop
/// (the binary logs and exits non-zero) or, for [`RenderError::is_device_lost`],
/// could rebuild the device and every resource created from it.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("descriptor heap '{label}' ({kind}) is full, capacity {capacity}")]
    HeapExhausted {
        label: String,
        kind: DescriptorHeapKind,
        capacity: u32,
    },

    #[error("descriptor index {index} is outside heap '{label}' with capacity {capacity}")]
    IndexOutOfRange {
        label: String,
        index: u32,
        capacity: u32,
    },

    #[error("descriptor heap '{label}' was requested with a capacity of zero")]
    ZeroCapacity { label: String },

    #[error("expected a {expected} descriptor heap, got '{label}' ({found})")]
    WrongHeapKind {
        label: String,
        expected: DescriptorHeapKind,
        found: DescriptorHeapKind,
    },

    #[error("buffer '{label}' cannot be created with {size_in_bytes} bytes")]
    InvalidBufferSize { label: String, size_in_bytes: u64 },

    #[error("out of device memory creating '{label}' ({requested} bytes)")]
    OutOfDeviceMemory { label: String, requested: u64 },

    #[error("write of {requested} elements at offset {offset} overflows buffer of {capacity} elements")]
    UploadOverflow {
        offset: usize,
        requested: usize,
        capacity: usize,
    },

    #[error("frame slot {index} does not exist, there are {frame_count} frames in flight")]
    InvalidFrameSlot { index: usize, frame_count: usize },

    #[error("no frame is being recorded")]
    NoFrameRecording,

    #[error("frame slot {recording} is still being recorded, cannot begin slot {requested}")]
    FrameAlreadyRecording { recording: usize, requested: usize },

    #[error("frame pipeline needs at least one frame in flight")]
    NoFramesInFlight,

    #[error("presenter has {image_count} images but the frame pipeline has {frame_count} slots")]
    ImageCountMismatch {
        image_count: usize,
        frame_count: usize,
    },

    #[error("fence did not reach {value} within {timeout:?} (completed {completed})")]
    FenceTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    #[error("device removed: {reason}")]
    DeviceRemoved { reason: String },

    #[error("failed to compile {path} ({entry_point}, {profile}): {message}")]
    ShaderCompile {
        path: String,
        entry_point: String,
        profile: String,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    Device {
        operation: &'static str,
        message: String,
    },
}

impl RenderError {
    /// True for failures after which no further call on the device can succeed.
    pub fn is_device_lost(&self) -> bool {
        matches!(
            self,
            RenderError::DeviceRemoved { .. } | RenderError::FenceTimeout { .. }
        )
    }

    pub fn device(operation: &'static str, message: impl Into<String>) -> Self {
        RenderError::Device {
            operation,
            message: message.into(),
        }
    }
}

#[cfg(windows)]
impl From<windows::core::Error> for RenderError {
    fn from(error: windows::core::Error) -> Self {
        use windows::Win32::Foundation::E_OUTOFMEMORY;
        use windows::Win32::Graphics::Dxgi::{
            DXGI_ERROR_DEVICE_HUNG, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET,
        };

        let code = error.code();
        if code == DXGI_ERROR_DEVICE_REMOVED
            || code == DXGI_ERROR_DEVICE_RESET
            || code == DXGI_ERROR_DEVICE_HUNG
        {
            RenderError::DeviceRemoved {
                reason: error.message().to_string(),
            }
        } else if code == E_OUTOFMEMORY {
            RenderError::OutOfDeviceMemory {
                label: String::from("<native call>"),
                requested: 0,
            }
        } else {
            RenderError::Device {
                operation: "Direct3D 12 call",
                message: format!("{} ({:?})", error.message(), code),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_classification() {
        assert!(RenderError::DeviceRemoved {
            reason: "hung".into()
        }
        .is_device_lost());
        assert!(RenderError::FenceTimeout {
            value: 3,
            completed: 1,
            timeout: Duration::from_millis(10),
        }
        .is_device_lost());
        assert!(!RenderError::NoFrameRecording.is_device_lost());
    }

    #[test]
    fn heap_exhausted_message_names_the_heap() {
        let error = RenderError::HeapExhausted {
            label: "bindless".into(),
            kind: DescriptorHeapKind::CbvSrvUav,
            capacity: 10,
        };
        let message = error.to_string();
        assert!(message.contains("bindless"));
        assert!(message.contains("10"));
    }
}
