use crate::{
    error::ConfigError,
    kernel::GaussianKernel,
    texture::{DispatchSize, TextureDesc},
};

/// Configuration for a [`BlurRenderer`](crate::BlurRenderer).
///
/// Every field is fixed for the renderer's lifetime except the kernel, which
/// can be rewritten explicitly with
/// [`BlurRenderer::reconfigure_kernel`](crate::BlurRenderer::reconfigure_kernel).
///
/// # Examples
///
/// ```
/// use blur_graph::BlurGraphConfig;
///
/// // Softer blur with more iterations
/// let config = BlurGraphConfig {
///     sigma: 6.0,
///     iterations: 6,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BlurGraphConfig {
    /// Width of the resize target and the blur working textures.
    ///
    /// Must be a non-zero multiple of the 16 texel threadgroup extent.
    pub working_width: u32,
    /// Height of the resize target and the blur working textures.
    pub working_height: u32,
    /// Standard deviation of the Gaussian, in working texels.
    pub sigma: f32,
    /// Number of kernel taps. Odd, at most [`MAX_TAPS`](crate::MAX_TAPS).
    pub tap_count: u32,
    /// Number of horizontal and vertical blur pass pairs per frame.
    ///
    /// `0` passes the resized frame straight to the composite pass.
    pub iterations: u32,
    /// Capacity of the frame texture cache used by ingestion.
    ///
    /// With the single-slot mailbox only one frame is leased at a time, so the
    /// extra slots only avoid reallocation when frame sizes alternate.
    pub cache_slots: usize,
    /// Clear color of the resize pass, visible where the source has alpha.
    pub clear_color: wgpu::Color,
    /// Format of the presentable target the composite pipeline renders to.
    pub output_format: wgpu::TextureFormat,
}

impl Default for BlurGraphConfig {
    /// 256x256 working textures, a 7 tap kernel with sigma 4 and 5 iterations.
    fn default() -> Self {
        Self {
            working_width: 256,
            working_height: 256,
            sigma: 4.0,
            tap_count: 7,
            iterations: 5,
            cache_slots: 3,
            clear_color: wgpu::Color {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                a: 1.0,
            },
            output_format: wgpu::TextureFormat::Rgba8Unorm,
        }
    }
}

impl BlurGraphConfig {
    /// Checks every field without touching the GPU.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.kernel()?;
        self.working_desc().validate_working()?;
        DispatchSize::for_extent(self.working_width, self.working_height)?;
        if self.cache_slots == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "cache_slots",
                reason: "at least one frame cache slot is required".to_string(),
            });
        }
        if self.output_format.is_depth_stencil_format() {
            return Err(ConfigError::InvalidParameter {
                name: "output_format",
                reason: format!("{:?} is not a color format", self.output_format),
            });
        }
        Ok(())
    }

    pub fn kernel(&self) -> Result<GaussianKernel, ConfigError> {
        GaussianKernel::new(self.sigma, self.tap_count)
    }

    /// Descriptor shared by the resize target and the ping-pong textures.
    pub fn working_desc(&self) -> TextureDesc {
        TextureDesc::working(self.working_width, self.working_height)
    }
}
