//! Texture descriptors and compute dispatch sizing.

use crate::error::ConfigError;

/// Edge length of the square compute threadgroup. Must match
/// `@workgroup_size` in `shaders/blur.wgsl`.
pub const THREADGROUP_EXTENT: u32 = 16;

/// Format of every working texture. Storage binding needs a non-sRGB RGBA
/// format.
pub const WORKING_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Where a texture's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    /// Only the GPU touches it.
    Private,
    /// The CPU writes into it before the GPU samples it.
    Shared,
}

/// Immutable description of a texture owned by the pool or the frame cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub storage: StorageClass,
    pub usage: wgpu::TextureUsages,
}

impl TextureDesc {
    /// Descriptor of a blur working texture: sampled, storage-written and
    /// copyable for readback.
    pub fn working(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: WORKING_FORMAT,
            storage: StorageClass::Private,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
        }
    }

    /// Descriptor of the resize target.
    pub fn render_target(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: WORKING_FORMAT,
            storage: StorageClass::Private,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC,
        }
    }

    /// Descriptor of a CPU-uploaded source texture.
    pub fn uploaded(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            storage: StorageClass::Shared,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        }
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// Checks that the descriptor can back a compute pass output.
    pub fn validate_working(&self) -> Result<(), ConfigError> {
        DispatchSize::for_extent(self.width, self.height)?;
        if self.format != WORKING_FORMAT {
            return Err(ConfigError::UnsupportedWorkingFormat(self.format));
        }
        Ok(())
    }

    pub fn create_texture(&self, device: &wgpu::Device, label: &str) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: self.extent(),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: self.usage,
            view_formats: &[],
        })
    }
}

/// Workgroup counts for one compute dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSize {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl DispatchSize {
    /// Derives the dispatch covering a `width` x `height` output exactly.
    ///
    /// Dimensions that leave a remainder against the threadgroup extent are a
    /// configuration error.
    pub fn for_extent(width: u32, height: u32) -> Result<Self, ConfigError> {
        if width == 0
            || height == 0
            || width % THREADGROUP_EXTENT != 0
            || height % THREADGROUP_EXTENT != 0
        {
            return Err(ConfigError::Dimensions {
                width,
                height,
                extent: THREADGROUP_EXTENT,
            });
        }
        Ok(Self {
            x: width / THREADGROUP_EXTENT,
            y: height / THREADGROUP_EXTENT,
            z: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn working_size_dispatches_sixteen_by_sixteen() {
        let dispatch = DispatchSize::for_extent(256, 256).expect("divisible");
        assert_eq!(dispatch, DispatchSize { x: 16, y: 16, z: 1 });
        assert_eq!(dispatch.x * THREADGROUP_EXTENT, 256);
        assert_eq!(dispatch.y * THREADGROUP_EXTENT, 256);
    }

    #[test]
    fn non_square_extent_covers_output_exactly() {
        let dispatch = DispatchSize::for_extent(512, 128).expect("divisible");
        assert_eq!((dispatch.x, dispatch.y), (32, 8));
    }

    #[test]
    fn remainder_is_a_configuration_error() {
        for (width, height) in [(255, 256), (256, 250), (0, 256), (8, 8)] {
            assert!(matches!(
                DispatchSize::for_extent(width, height),
                Err(ConfigError::Dimensions { .. })
            ));
        }
    }

    #[test]
    fn working_descriptor_rejects_srgb_storage() {
        let mut desc = TextureDesc::working(256, 256);
        assert!(desc.validate_working().is_ok());
        desc.format = wgpu::TextureFormat::Bgra8UnormSrgb;
        assert_eq!(
            desc.validate_working(),
            Err(ConfigError::UnsupportedWorkingFormat(
                wgpu::TextureFormat::Bgra8UnormSrgb
            ))
        );
    }
}
