//! The demo content: one triangle pulled from a structured buffer, nudged every
//! frame through a per-slot constant buffer.

use bytemuck::{Pod, Zeroable};

use crate::descriptor_heap::DescriptorHeap;
use crate::error::{RenderError, RenderResult};
use crate::gpu::Device;
use crate::upload::{upload, upload_constants, UploadBuffer};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneConstants {
    pub offset: [f32; 4],
    pub tint: [f32; 4],
}

/// Root constants: where the shaders find their inputs in the bindless heap.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RenderResources {
    pub vertex_buffer_index: u32,
    pub scene_constants_index: u32,
}

impl RenderResources {
    pub const NUM_32BIT_VALUES: u32 = (std::mem::size_of::<Self>() / 4) as u32;
}

pub fn triangle(aspect_ratio: f32) -> [Vertex; 3] {
    [
        Vertex {
            position: [0.0, 0.25 * aspect_ratio, 0.0],
            color: [1.0, 0.0, 0.0, 1.0],
        },
        Vertex {
            position: [0.25, -0.25 * aspect_ratio, 0.0],
            color: [0.0, 1.0, 0.0, 1.0],
        },
        Vertex {
            position: [-0.25, -0.25 * aspect_ratio, 0.0],
            color: [0.0, 0.0, 1.0, 1.0],
        },
    ]
}

pub fn scene_constants(frame_number: u64) -> SceneConstants {
    let phase = (frame_number % 3600) as f32 * 0.02;
    SceneConstants {
        offset: [0.5 * phase.sin(), 0.0, 0.0, 0.0],
        tint: [1.0, 1.0, 1.0, 1.0],
    }
}

/// Vertex data shared by every frame plus one constant buffer per frame slot, so
/// updating the constants never touches memory a frame in flight is reading.
pub struct SceneBuffers<D: Device> {
    vertices: UploadBuffer<D, Vertex>,
    constants: Vec<UploadBuffer<D, SceneConstants>>,
}

impl<D: Device> SceneBuffers<D> {
    pub fn create(
        device: &D,
        heap: &mut DescriptorHeap<D>,
        frame_count: usize,
        aspect_ratio: f32,
    ) -> RenderResult<Self> {
        let vertices = upload(device, &triangle(aspect_ratio), heap, "triangle vertices")?;
        let constants = (0..frame_count)
            .map(|slot| {
                upload_constants(
                    device,
                    &scene_constants(0),
                    heap,
                    &format!("scene constants {slot}"),
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;

        Ok(Self {
            vertices,
            constants,
        })
    }

    /// Writes this frame's constants into `slot_index`'s buffer and returns the
    /// indices to hand to the shaders.
    pub fn update(&mut self, slot_index: usize, frame_number: u64) -> RenderResult<RenderResources> {
        let frame_count = self.constants.len();
        let constants = self
            .constants
            .get_mut(slot_index)
            .ok_or(RenderError::InvalidFrameSlot {
                index: slot_index,
                frame_count,
            })?;
        constants.write(&[scene_constants(frame_number)])?;

        Ok(RenderResources {
            vertex_buffer_index: self.vertices.descriptor_index(),
            scene_constants_index: constants.descriptor_index(),
        })
    }

    pub fn vertices(&self) -> &UploadBuffer<D, Vertex> {
        &self.vertices
    }

    pub fn constants(&self, slot_index: usize) -> Option<&UploadBuffer<D, SceneConstants>> {
        self.constants.get(slot_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::DescriptorHeapKind;
    use crate::headless::HeadlessDevice;

    #[test]
    fn each_slot_gets_its_own_constants() {
        let device = HeadlessDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 8, "bindless").unwrap();
        let mut scene = SceneBuffers::create(&device, &mut heap, 2, 16.0 / 9.0).unwrap();

        let first = scene.update(0, 10).unwrap();
        let second = scene.update(1, 11).unwrap();

        assert_eq!(first.vertex_buffer_index, 0);
        assert_eq!(second.vertex_buffer_index, 0);
        assert_eq!(first.scene_constants_index, 1);
        assert_eq!(second.scene_constants_index, 2);
        assert_eq!(scene.constants(0).unwrap().read(), vec![scene_constants(10)]);
        assert_eq!(scene.constants(1).unwrap().read(), vec![scene_constants(11)]);
        assert!(matches!(
            scene.update(2, 12),
            Err(RenderError::InvalidFrameSlot { index: 2, .. })
        ));
    }

    #[test]
    fn root_constants_are_two_dwords() {
        assert_eq!(RenderResources::NUM_32BIT_VALUES, 2);
    }
}
