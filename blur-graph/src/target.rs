//! Presentable outputs of the composite pass.

use std::sync::mpsc;

use tracing::warn;

use crate::{context::GpuContext, error::RenderError};

/// View the composite pass renders into for one frame.
pub struct TargetFrame {
    view: wgpu::TextureView,
    surface_texture: Option<wgpu::SurfaceTexture>,
}

impl TargetFrame {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    /// Hands the frame to the compositor. A no-op for offscreen frames.
    pub fn present(self) {
        if let Some(surface_texture) = self.surface_texture {
            surface_texture.present();
        }
    }
}

/// Something the composite pass can draw into.
pub trait PresentTarget {
    /// Format the composite pipeline must render.
    fn format(&self) -> wgpu::TextureFormat;

    /// Acquires the view for the next frame.
    fn acquire(&mut self, ctx: &GpuContext) -> Result<TargetFrame, RenderError>;
}

/// A window surface.
pub struct SurfaceTarget {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
}

impl SurfaceTarget {
    /// Configures `surface` with `config` and takes ownership of both.
    pub fn new(
        ctx: &GpuContext,
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    ) -> Self {
        surface.configure(&ctx.device, &config);
        Self { surface, config }
    }

    pub fn resize(&mut self, ctx: &GpuContext, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&ctx.device, &self.config);
    }

    pub fn config(&self) -> &wgpu::SurfaceConfiguration {
        &self.config
    }
}

impl PresentTarget for SurfaceTarget {
    fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn acquire(&mut self, ctx: &GpuContext) -> Result<TargetFrame, RenderError> {
        let surface_texture = match self.surface.get_current_texture() {
            Ok(texture) => texture,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                warn!("Surface {err:?}, reconfiguring");
                self.surface.configure(&ctx.device, &self.config);
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(TargetFrame {
            view,
            surface_texture: Some(surface_texture),
        })
    }
}

/// A texture that can be read back after rendering.
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

impl OffscreenTarget {
    /// An `Rgba8Unorm` target of `width` x `height`.
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            format,
        }
    }

    pub fn width(&self) -> u32 {
        self.texture.width()
    }

    pub fn height(&self) -> u32 {
        self.texture.height()
    }

    /// Tightly packed RGBA8 rows of the last rendered frame.
    pub fn read_pixels(&self, ctx: &GpuContext) -> Result<Vec<u8>, RenderError> {
        read_texture_rgba8(ctx, &self.texture)
    }
}

impl PresentTarget for OffscreenTarget {
    fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    fn acquire(&mut self, _ctx: &GpuContext) -> Result<TargetFrame, RenderError> {
        Ok(TargetFrame {
            view: self.view.clone(),
            surface_texture: None,
        })
    }
}

/// Copies a 4-byte-per-texel texture into host memory, blocking until the GPU
/// has finished.
pub fn read_texture_rgba8(ctx: &GpuContext, texture: &wgpu::Texture) -> Result<Vec<u8>, RenderError> {
    let width = texture.width();
    let height = texture.height();
    if texture.format().block_copy_size(None) != Some(4) {
        return Err(RenderError::Readback(format!(
            "{:?} is not a 4 byte per texel format",
            texture.format()
        )));
    }
    let unpadded = width * 4;
    let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size: u64::from(padded) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    ctx.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    ctx.device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| RenderError::Readback(e.to_string()))?;
    receiver
        .recv()
        .map_err(|e| RenderError::Readback(e.to_string()))?
        .map_err(|e| RenderError::Readback(e.to_string()))?;

    let mut pixels = Vec::with_capacity((unpadded * height) as usize);
    {
        let mapped = slice.get_mapped_range();
        for row in mapped.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
    }
    buffer.unmap();
    Ok(pixels)
}
