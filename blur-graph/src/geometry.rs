use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

/// One vertex of the image quad: clip-space position and texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ImageVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Triangle strip spanning clip space, with v growing downwards.
pub const QUAD_VERTICES: [ImageVertex; 4] = [
    ImageVertex {
        position: [-1.0, -1.0],
        uv: [0.0, 1.0],
    },
    ImageVertex {
        position: [1.0, -1.0],
        uv: [1.0, 1.0],
    },
    ImageVertex {
        position: [-1.0, 1.0],
        uv: [0.0, 0.0],
    },
    ImageVertex {
        position: [1.0, 1.0],
        uv: [1.0, 0.0],
    },
];

const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

impl ImageVertex {
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<ImageVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &ATTRIBUTES,
        }
    }
}

/// Uploads the quad once; every render pass binds the same buffer.
pub fn create_quad_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Image Quad Vertex Buffer"),
        contents: bytemuck::cast_slice(&QUAD_VERTICES),
        usage: wgpu::BufferUsages::VERTEX,
    })
}
