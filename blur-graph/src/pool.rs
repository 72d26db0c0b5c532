//! Working textures between passes and the ping-pong selection rule.

use tracing::debug;

use crate::{
    context::GpuContext,
    error::{ConfigError, InitError},
    graph::ResourceId,
    texture::{DispatchSize, TextureDesc},
};

/// The two alternating blur targets.
///
/// Iteration 0 reads the external first input and writes `A`. Iteration `k`
/// reads whatever iteration `k - 1` wrote and writes the other texture, so a
/// pass never samples the texture it is writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    a: ResourceId,
    b: ResourceId,
}

impl PingPong {
    pub const WORKING: PingPong = PingPong {
        a: ResourceId::PingA,
        b: ResourceId::PingB,
    };

    pub fn pair(&self) -> (ResourceId, ResourceId) {
        (self.a, self.b)
    }

    /// Returns `(read, write)` for blur iteration `iteration`.
    pub fn select_read_write(
        &self,
        iteration: u32,
        external_first_input: ResourceId,
    ) -> Result<(ResourceId, ResourceId), ConfigError> {
        if external_first_input == self.a || external_first_input == self.b {
            return Err(ConfigError::AliasedInput(external_first_input));
        }
        Ok(match iteration {
            0 => (external_first_input, self.a),
            k if k % 2 == 1 => (self.a, self.b),
            _ => (self.b, self.a),
        })
    }

    /// Texture holding the result after `iterations` iterations.
    pub fn final_output(&self, iterations: u32, external_first_input: ResourceId) -> ResourceId {
        match iterations {
            0 => external_first_input,
            n if n % 2 == 1 => self.a,
            _ => self.b,
        }
    }
}

struct PoolTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl PoolTexture {
    fn new(device: &wgpu::Device, desc: &TextureDesc, label: &str) -> Self {
        let texture = desc.create_texture(device, label);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

/// Fixed set of textures owned for the renderer's lifetime: the resize
/// target, the horizontal-pass scratch texture, and the ping-pong pair.
///
/// The pool never grows. All four share the working extent and format.
pub struct TexturePool {
    desc: TextureDesc,
    dispatch: DispatchSize,
    clear_color: wgpu::Color,
    ping_pong: PingPong,
    resize: PoolTexture,
    scratch: PoolTexture,
    ping_a: PoolTexture,
    ping_b: PoolTexture,
}

impl TexturePool {
    pub fn new(
        ctx: &GpuContext,
        desc: TextureDesc,
        clear_color: wgpu::Color,
    ) -> Result<Self, InitError> {
        desc.validate_working()?;
        let dispatch = DispatchSize::for_extent(desc.width, desc.height)?;
        let limit = ctx.max_texture_dimension();
        if desc.width > limit || desc.height > limit {
            return Err(InitError::TextureAllocation {
                label: "Working Texture",
                width: desc.width,
                height: desc.height,
                limit,
            });
        }

        let resize_desc = TextureDesc::render_target(desc.width, desc.height);
        let pool = ctx
            .capture_errors(|device| Self {
                desc,
                dispatch,
                clear_color,
                ping_pong: PingPong::WORKING,
                resize: PoolTexture::new(device, &resize_desc, "Resize Target"),
                scratch: PoolTexture::new(device, &desc, "Blur Scratch"),
                ping_a: PoolTexture::new(device, &desc, "Blur Ping A"),
                ping_b: PoolTexture::new(device, &desc, "Blur Ping B"),
            })
            .map_err(|err| InitError::ResourceCreation {
                label: "working textures",
                message: err.to_string(),
            })?;
        debug!(
            "Allocated texture pool {}x{} ({:?})",
            desc.width, desc.height, desc.format
        );
        Ok(pool)
    }

    /// Returns the ping-pong pair if `desc` is the configured working
    /// descriptor.
    pub fn acquire_working_pair(
        &self,
        desc: &TextureDesc,
    ) -> Result<(ResourceId, ResourceId), ConfigError> {
        if *desc != self.desc {
            return Err(ConfigError::DescriptorMismatch);
        }
        Ok(self.ping_pong.pair())
    }

    pub fn select_read_write(
        &self,
        iteration: u32,
        external_first_input: ResourceId,
    ) -> Result<(ResourceId, ResourceId), ConfigError> {
        self.ping_pong
            .select_read_write(iteration, external_first_input)
    }

    pub fn ping_pong(&self) -> PingPong {
        self.ping_pong
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    pub fn dispatch(&self) -> DispatchSize {
        self.dispatch
    }

    /// Clear color of single-use render targets, which are cleared and then
    /// stored.
    pub fn clear_color(&self) -> wgpu::Color {
        self.clear_color
    }

    pub fn view(&self, id: ResourceId) -> Option<&wgpu::TextureView> {
        self.slot(id).map(|slot| &slot.view)
    }

    pub fn texture(&self, id: ResourceId) -> Option<&wgpu::Texture> {
        self.slot(id).map(|slot| &slot.texture)
    }

    fn slot(&self, id: ResourceId) -> Option<&PoolTexture> {
        match id {
            ResourceId::Resize => Some(&self.resize),
            ResourceId::BlurScratch => Some(&self.scratch),
            ResourceId::PingA => Some(&self.ping_a),
            ResourceId::PingB => Some(&self.ping_b),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_iteration_reads_external_input() {
        let pair = PingPong::WORKING;
        assert_eq!(
            pair.select_read_write(0, ResourceId::Resize),
            Ok((ResourceId::Resize, ResourceId::PingA))
        );
    }

    #[test]
    fn iterations_alternate_and_never_alias() {
        let pair = PingPong::WORKING;
        let mut previous_write = None;
        for iteration in 0..64 {
            let (read, write) = pair
                .select_read_write(iteration, ResourceId::Resize)
                .expect("external input is not aliased");
            assert_ne!(read, write, "iteration {iteration}");
            if let Some(previous) = previous_write {
                assert_eq!(read, previous, "iteration {iteration} must read the last write");
            }
            previous_write = Some(write);
        }
    }

    #[test]
    fn final_output_is_last_write() {
        let pair = PingPong::WORKING;
        for iterations in 1..10 {
            let (_, write) = pair
                .select_read_write(iterations - 1, ResourceId::Resize)
                .expect("valid");
            assert_eq!(pair.final_output(iterations, ResourceId::Resize), write);
        }
        assert_eq!(
            pair.final_output(0, ResourceId::Resize),
            ResourceId::Resize
        );
    }

    #[test]
    fn rejects_pool_texture_as_external_input() {
        let pair = PingPong::WORKING;
        assert_eq!(
            pair.select_read_write(0, ResourceId::PingA),
            Err(ConfigError::AliasedInput(ResourceId::PingA))
        );
        assert!(pair.select_read_write(3, ResourceId::PingB).is_err());
    }

    #[test]
    fn pool_allocates_distinct_textures_and_checks_descriptor() {
        let Some(ctx) = crate::test::context() else {
            return;
        };
        let desc = TextureDesc::working(64, 32);
        let pool = TexturePool::new(&ctx, desc, wgpu::Color::BLACK).expect("valid pool");

        let (a, b) = pool.acquire_working_pair(&desc).expect("matching descriptor");
        assert_ne!(a, b);
        assert_ne!(pool.texture(a), pool.texture(b));
        assert_eq!(pool.dispatch(), DispatchSize { x: 4, y: 2, z: 1 });

        let other = TextureDesc::working(128, 32);
        assert_eq!(
            pool.acquire_working_pair(&other),
            Err(ConfigError::DescriptorMismatch)
        );
        assert!(pool.view(ResourceId::Source).is_none());
    }

    #[test]
    fn pool_rejects_unaligned_extent() {
        let Some(ctx) = crate::test::context() else {
            return;
        };
        let result = TexturePool::new(&ctx, TextureDesc::working(100, 64), wgpu::Color::BLACK);
        assert!(matches!(
            result,
            Err(InitError::Config(ConfigError::Dimensions { .. }))
        ));
    }
}
