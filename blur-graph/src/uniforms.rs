//! Fixed-layout kernel block read by the blur passes.
//!
//! Wire layout, little endian:
//!
//! | offset | field                    |
//! |--------|--------------------------|
//! | 0      | `f32 tap_count`          |
//! | 4      | `f32 weights[MAX_TAPS]`  |
//!
//! The block is padded to the next [`BUFFER_ALIGNMENT`] boundary. Unused weight
//! slots are zero.

use crate::{context::GpuContext, error::ConfigError, kernel::GaussianKernel};

/// Capacity of the weight array. Must match `MAX_TAPS` in `shaders/blur.wgsl`.
pub const MAX_TAPS: usize = 15;

/// Minimum buffer alignment the block is padded to.
pub const BUFFER_ALIGNMENT: usize = 256;

const TAP_COUNT_OFFSET: usize = 0;
const WEIGHTS_OFFSET: usize = 4;

/// Bytes actually used by the block before padding.
pub const KERNEL_BLOCK_USED: usize = WEIGHTS_OFFSET + MAX_TAPS * 4;

/// Size of the encoded block including padding.
pub const KERNEL_BLOCK_SIZE: usize = padded_size(KERNEL_BLOCK_USED);

/// Rounds `size` up to the next multiple of [`BUFFER_ALIGNMENT`].
pub const fn padded_size(size: usize) -> usize {
    size.div_ceil(BUFFER_ALIGNMENT) * BUFFER_ALIGNMENT
}

/// Serializes `weights` into the kernel block layout.
pub fn encode_kernel_block(weights: &[f32]) -> Result<[u8; KERNEL_BLOCK_SIZE], ConfigError> {
    if weights.is_empty() || weights.len() > MAX_TAPS {
        return Err(ConfigError::InvalidParameter {
            name: "weights",
            reason: format!("expected 1..={MAX_TAPS} weights, got {}", weights.len()),
        });
    }

    let mut block = [0u8; KERNEL_BLOCK_SIZE];
    let tap_count = weights.len() as f32;
    block[TAP_COUNT_OFFSET..TAP_COUNT_OFFSET + 4].copy_from_slice(&tap_count.to_le_bytes());
    for (index, weight) in weights.iter().enumerate() {
        let offset = WEIGHTS_OFFSET + index * 4;
        block[offset..offset + 4].copy_from_slice(&weight.to_le_bytes());
    }
    Ok(block)
}

/// GPU buffer holding the encoded kernel, plus the bind group every blur pass
/// shares.
pub struct KernelBuffer {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    kernel: GaussianKernel,
}

impl KernelBuffer {
    /// Layout of bind group 1 in the blur kernels.
    pub fn bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Blur Kernel Bind Group Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: wgpu::BufferSize::new(KERNEL_BLOCK_USED as u64),
                },
                count: None,
            }],
        })
    }

    pub fn new(
        ctx: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        kernel: GaussianKernel,
    ) -> Result<Self, ConfigError> {
        let block = encode_kernel_block(kernel.weights())?;
        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Blur Kernel Buffer"),
            size: KERNEL_BLOCK_SIZE as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        ctx.queue.write_buffer(&buffer, 0, &block);
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Blur Kernel Bind Group"),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        Ok(Self {
            buffer,
            bind_group,
            kernel,
        })
    }

    /// Rewrites the block in place. Only called on explicit reconfiguration.
    pub fn write(&mut self, ctx: &GpuContext, kernel: GaussianKernel) -> Result<(), ConfigError> {
        let block = encode_kernel_block(kernel.weights())?;
        ctx.queue.write_buffer(&self.buffer, 0, &block);
        self.kernel = kernel;
        Ok(())
    }

    pub fn kernel(&self) -> &GaussianKernel {
        &self.kernel
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}
