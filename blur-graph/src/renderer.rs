//! Frame-graph orchestrator.
//!
//! [`BlurRenderer`] owns everything created at init (pipelines, working
//! textures, the kernel buffer) and drives one frame at a time through the
//! pass list built by [`FrameGraph`].
//!
//! ## State machine
//!
//! ```text
//! Uninitialized --initialize--> Ready <--> RenderingFrame
//!       |
//!       +--init failure--> Failed (terminal)
//! ```
//!
//! Per-frame failures never leave `Ready`; they skip the frame. Only a failed
//! [`BlurRenderer::initialize`] enters `Failed`, and it is not retried.
//!
//! ## Frame flow
//!
//! - [`BlurRenderer::ingest`] uploads a live frame and runs the transform
//!   stage, blocking until the GPU is done.
//! - [`BlurRenderer::present`] runs the blur and composite stages against the
//!   last ingested frame (or the static source) and presents the target. The
//!   live frame is released afterwards.

use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tracing::{debug, error, info, warn};

use crate::{
    config::BlurGraphConfig,
    context::GpuContext,
    error::{InitError, RenderError},
    graph::{FrameGraph, GraphLayout, PassDescriptor, PassKind, ResourceId, Stage},
    ingest::{
        FrameBuffer, FrameTextureCache, IngestedFrame, UploadedTexture, validate_for_device,
    },
    kernel::GaussianKernel,
    pool::TexturePool,
    registry::{KernelLibrary, PipelineRegistry},
    target::{PresentTarget, read_texture_rgba8},
    uniforms::KernelBuffer,
};

/// Lifecycle state of a [`BlurRenderer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    RenderingFrame,
    /// Initialization failed. Terminal.
    Failed,
}

/// Result of a present that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Nothing has been ingested and no static source is set.
    NoSource,
    /// The frame could not be ingested.
    IngestFailed,
    /// The presentable surface could not be acquired.
    TargetUnavailable,
}

/// Timing breakdown of the last presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTiming {
    pub encode: Duration,
    pub submit_and_wait: Duration,
    pub total: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Live,
    Static,
}

/// Resources created once at init.
struct GraphResources {
    registry: PipelineRegistry,
    pool: TexturePool,
    kernel: KernelBuffer,
    layout: GraphLayout,
    default_mask: UploadedTexture,
}

impl GraphResources {
    fn new(
        ctx: &GpuContext,
        config: &BlurGraphConfig,
        library: &KernelLibrary,
    ) -> Result<Self, InitError> {
        config.validate()?;
        let kernel = config.kernel()?;
        let registry = PipelineRegistry::new(ctx, library, config.output_format)?;

        let working = config.working_desc();
        let pool = TexturePool::new(ctx, working, config.clear_color)?;
        pool.acquire_working_pair(&working)?;

        let kernel = KernelBuffer::new(ctx, registry.kernel_layout(), kernel)?;
        let layout = GraphLayout {
            iterations: config.iterations,
            dispatch: pool.dispatch(),
            clear_color: pool.clear_color(),
            ping_pong: pool.ping_pong(),
        };
        // Topology is fixed, so a graph that builds once builds every frame.
        FrameGraph::build(&layout)?;

        Ok(Self {
            registry,
            pool,
            kernel,
            layout,
            default_mask: UploadedTexture::white(ctx, "Default Mask"),
        })
    }
}

/// Views bound to the logical resources of one frame.
struct FrameBindings<'a> {
    pool: &'a TexturePool,
    source: &'a wgpu::TextureView,
    mask: &'a wgpu::TextureView,
    target: Option<&'a wgpu::TextureView>,
}

impl<'a> FrameBindings<'a> {
    fn resolve(&self, id: ResourceId) -> Option<&'a wgpu::TextureView> {
        match id {
            ResourceId::Source => Some(self.source),
            ResourceId::Mask => Some(self.mask),
            ResourceId::Target => self.target,
            other => self.pool.view(other),
        }
    }
}

/// Resize, blur and composite pipeline for live or static frames.
pub struct BlurRenderer {
    ctx: GpuContext,
    config: BlurGraphConfig,
    library: KernelLibrary,
    state: PipelineState,
    resources: Option<GraphResources>,
    cache: FrameTextureCache,
    mask: Option<UploadedTexture>,
    live_source: Option<IngestedFrame>,
    static_source: Option<UploadedTexture>,
    /// Which source the resize target currently holds.
    resized: Option<SourceKind>,
    last_timing: Option<FrameTiming>,
    frame_index: u64,
}

impl BlurRenderer {
    /// Creates an uninitialized renderer using the bundled kernels.
    pub fn new(ctx: GpuContext, config: BlurGraphConfig) -> Self {
        let cache = FrameTextureCache::new(config.cache_slots);
        Self {
            ctx,
            config,
            library: KernelLibrary::default(),
            state: PipelineState::Uninitialized,
            resources: None,
            cache,
            mask: None,
            live_source: None,
            static_source: None,
            resized: None,
            last_timing: None,
            frame_index: 0,
        }
    }

    /// Creates and initializes a renderer.
    pub fn build(ctx: GpuContext, config: BlurGraphConfig) -> Result<Self, InitError> {
        let mut renderer = Self::new(ctx, config);
        renderer.initialize()?;
        Ok(renderer)
    }

    /// Replaces the kernel sources used by [`BlurRenderer::initialize`].
    pub fn with_kernel_library(mut self, library: KernelLibrary) -> Self {
        self.library = library;
        self
    }

    /// Validates the configuration and creates every pipeline and texture.
    ///
    /// On failure the renderer enters [`PipelineState::Failed`] and later
    /// calls return [`InitError::AlreadyFailed`].
    pub fn initialize(&mut self) -> Result<(), InitError> {
        match self.state {
            PipelineState::Ready | PipelineState::RenderingFrame => return Ok(()),
            PipelineState::Failed => return Err(InitError::AlreadyFailed),
            PipelineState::Uninitialized => {}
        }

        match GraphResources::new(&self.ctx, &self.config, &self.library) {
            Ok(resources) => {
                info!(
                    "Blur graph ready on {}: {}x{} working, {} taps (sigma {}), {} iterations",
                    self.ctx.adapter_name(),
                    self.config.working_width,
                    self.config.working_height,
                    self.config.tap_count,
                    self.config.sigma,
                    self.config.iterations
                );
                self.resources = Some(resources);
                self.state = PipelineState::Ready;
                Ok(())
            }
            Err(err) => {
                error!("Blur graph initialization failed: {err}");
                self.state = PipelineState::Failed;
                Err(err)
            }
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> &BlurGraphConfig {
        &self.config
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn frame_cache(&self) -> &FrameTextureCache {
        &self.cache
    }

    pub fn last_timing(&self) -> Option<FrameTiming> {
        self.last_timing
    }

    /// Number of frames presented so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// The kernel currently in the blur buffer.
    pub fn kernel(&self) -> Option<&GaussianKernel> {
        self.resources
            .as_ref()
            .map(|resources| resources.kernel.kernel())
    }

    /// Rewrites the blur kernel. The only runtime reconfiguration supported.
    pub fn reconfigure_kernel(&mut self, sigma: f32, tap_count: u32) -> Result<(), RenderError> {
        if self.state != PipelineState::Ready {
            return Err(RenderError::PipelineUnavailable(self.state));
        }
        let kernel = GaussianKernel::new(sigma, tap_count)?;
        let Some(resources) = self.resources.as_mut() else {
            return Err(RenderError::PipelineUnavailable(self.state));
        };
        resources.kernel.write(&self.ctx, kernel)?;
        self.config.sigma = sigma;
        self.config.tap_count = tap_count;
        info!("Blur kernel reconfigured: {tap_count} taps, sigma {sigma}");
        Ok(())
    }

    /// Uploads a mask. Its red channel selects the blurred image per texel.
    pub fn set_mask(&mut self, mask: &FrameBuffer<'_>) -> Result<(), RenderError> {
        self.mask = Some(UploadedTexture::new(&self.ctx, mask, "Composite Mask")?);
        Ok(())
    }

    /// Restores the default mask, which blurs everywhere.
    pub fn clear_mask(&mut self) {
        self.mask = None;
    }

    /// Uploads a still image presented whenever no live frame is held.
    pub fn set_static_source(&mut self, image: &FrameBuffer<'_>) -> Result<(), RenderError> {
        self.static_source = Some(UploadedTexture::new(&self.ctx, image, "Static Source")?);
        if self.resized == Some(SourceKind::Static) {
            self.resized = None;
        }
        Ok(())
    }

    pub fn clear_static_source(&mut self) {
        self.static_source = None;
        if self.resized == Some(SourceKind::Static) {
            self.resized = None;
        }
    }

    /// Ingests a live frame and runs the transform stage.
    ///
    /// Returns `true` when the frame was consumed. Failures are logged and the
    /// frame is skipped; the renderer stays `Ready`.
    pub fn ingest(&mut self, frame: &FrameBuffer<'_>) -> bool {
        if self.state != PipelineState::Ready {
            warn!("Dropping frame, renderer is {:?}", self.state);
            return false;
        }
        // A rejected frame leaves the held one in place.
        if let Err(err) = validate_for_device(&self.ctx, frame) {
            warn!("Skipping frame: {err}");
            return false;
        }
        // The previous live frame must not outlive the next ingest.
        self.live_source = None;
        if self.resized == Some(SourceKind::Live) {
            self.resized = None;
        }

        let Some(resources) = self.resources.as_ref() else {
            return false;
        };
        let mask = self.mask.as_ref().unwrap_or(&resources.default_mask);
        self.state = PipelineState::RenderingFrame;
        let result = transform_live(&self.ctx, &self.cache, resources, mask.view(), frame);
        self.state = PipelineState::Ready;

        match result {
            Ok(leased) => {
                self.live_source = Some(leased);
                self.resized = Some(SourceKind::Live);
                true
            }
            Err(err) => {
                warn!("Skipping frame: {err}");
                false
            }
        }
    }

    /// Blurs and composites the current source into `target` and presents it.
    pub fn present(&mut self, target: &mut dyn PresentTarget) -> Result<FrameOutcome, RenderError> {
        if self.state != PipelineState::Ready {
            return Err(RenderError::PipelineUnavailable(self.state));
        }
        let Some(resources) = self.resources.as_ref() else {
            return Err(RenderError::PipelineUnavailable(self.state));
        };
        let expected = resources.registry.output_format();
        if target.format() != expected {
            return Err(RenderError::TargetFormat {
                expected,
                actual: target.format(),
            });
        }

        let (source, kind) = match (&self.live_source, &self.static_source) {
            (Some(live), _) => (live.view(), SourceKind::Live),
            (None, Some(still)) => (still.view(), SourceKind::Static),
            (None, None) => {
                debug!("Nothing to present");
                return Ok(FrameOutcome::Skipped(SkipReason::NoSource));
            }
        };
        let mask = self.mask.as_ref().unwrap_or(&resources.default_mask);
        let needs_transform = self.resized != Some(kind);

        self.state = PipelineState::RenderingFrame;
        let result = render_to_target(
            &self.ctx,
            resources,
            FrameSources {
                source,
                mask: mask.view(),
                needs_transform,
            },
            target,
        );
        self.state = PipelineState::Ready;
        // Live frames are only valid for the frame they were ingested for.
        self.live_source = None;

        match result {
            Ok(timing) => {
                self.resized = Some(kind);
                self.frame_index = self.frame_index.wrapping_add(1);
                self.last_timing = Some(timing);
                debug!(
                    "Frame {} complete: {:.3}ms (encode {:.3}ms, submit {:.3}ms)",
                    self.frame_index,
                    timing.total.as_secs_f64() * 1000.0,
                    timing.encode.as_secs_f64() * 1000.0,
                    timing.submit_and_wait.as_secs_f64() * 1000.0
                );
                Ok(FrameOutcome::Presented)
            }
            Err(RenderError::Surface(err)) => {
                warn!("Skipping present: {err}");
                Ok(FrameOutcome::Skipped(SkipReason::TargetUnavailable))
            }
            Err(err) => Err(err),
        }
    }

    /// Ingests `frame` and, if that succeeded, presents it.
    pub fn render_frame(
        &mut self,
        frame: &FrameBuffer<'_>,
        target: &mut dyn PresentTarget,
    ) -> Result<FrameOutcome, RenderError> {
        if self.state != PipelineState::Ready {
            return Err(RenderError::PipelineUnavailable(self.state));
        }
        if !self.ingest(frame) {
            return Ok(FrameOutcome::Skipped(SkipReason::IngestFailed));
        }
        self.present(target)
    }

    /// Reads back a pool texture as RGBA8 rows, for debugging and tests.
    pub fn read_working_texture(&self, id: ResourceId) -> Result<Vec<u8>, RenderError> {
        let resources = self
            .resources
            .as_ref()
            .ok_or(RenderError::PipelineUnavailable(self.state))?;
        let texture = resources
            .pool
            .texture(id)
            .ok_or(RenderError::MissingResource(id))?;
        read_texture_rgba8(&self.ctx, texture)
    }

    /// Texture the composite pass samples as the blurred image.
    pub fn blurred_resource(&self) -> Option<ResourceId> {
        self.resources
            .as_ref()
            .and_then(|resources| FrameGraph::build(&resources.layout).ok())
            .map(|graph| graph.blurred())
    }
}

struct FrameSources<'a> {
    source: &'a wgpu::TextureView,
    mask: &'a wgpu::TextureView,
    needs_transform: bool,
}

fn transform_live(
    ctx: &GpuContext,
    cache: &FrameTextureCache,
    resources: &GraphResources,
    mask: &wgpu::TextureView,
    frame: &FrameBuffer<'_>,
) -> Result<IngestedFrame, RenderError> {
    let leased = cache.ingest(ctx, frame)?;
    let graph = FrameGraph::build(&resources.layout)?;
    let bindings = FrameBindings {
        pool: &resources.pool,
        source: leased.view(),
        mask,
        target: None,
    };
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Transform Encoder"),
        });
    encode_passes(
        ctx,
        resources,
        &mut encoder,
        graph.stages(&[Stage::Transform]),
        &bindings,
    )?;
    ctx.submit_and_wait(encoder.finish())?;
    Ok(leased)
}

fn render_to_target(
    ctx: &GpuContext,
    resources: &GraphResources,
    sources: FrameSources<'_>,
    target: &mut dyn PresentTarget,
) -> Result<FrameTiming, RenderError> {
    let render_start = Instant::now();
    let graph = FrameGraph::build(&resources.layout)?;
    let frame = target.acquire(ctx)?;

    let encode_start = Instant::now();
    let stages: &[Stage] = if sources.needs_transform {
        &[Stage::Transform, Stage::Blur, Stage::Composite]
    } else {
        &[Stage::Blur, Stage::Composite]
    };
    let bindings = FrameBindings {
        pool: &resources.pool,
        source: sources.source,
        mask: sources.mask,
        target: Some(frame.view()),
    };
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Blur Graph Encoder"),
        });
    encode_passes(ctx, resources, &mut encoder, graph.stages(stages), &bindings)?;
    let encode = encode_start.elapsed();

    let submit_start = Instant::now();
    ctx.submit_and_wait(encoder.finish())?;
    let submit_and_wait = submit_start.elapsed();

    frame.present();
    Ok(FrameTiming {
        encode,
        submit_and_wait,
        total: render_start.elapsed(),
    })
}

/// Encodes `passes` in order. Every binding is resolved before the first pass
/// is encoded, so a frame is either encoded whole or not at all.
fn encode_passes<'p>(
    ctx: &GpuContext,
    resources: &GraphResources,
    encoder: &mut wgpu::CommandEncoder,
    passes: impl Iterator<Item = &'p PassDescriptor>,
    bindings: &FrameBindings<'_>,
) -> Result<(), RenderError> {
    let passes: SmallVec<[&PassDescriptor; 16]> = passes.collect();
    for pass in &passes {
        for id in pass.inputs.iter().chain(std::iter::once(&pass.output)) {
            bindings
                .resolve(*id)
                .ok_or(RenderError::MissingResource(*id))?;
        }
    }

    let registry = &resources.registry;
    for pass in passes {
        let output = bindings
            .resolve(pass.output)
            .ok_or(RenderError::MissingResource(pass.output))?;
        let inputs: SmallVec<[&wgpu::TextureView; 3]> = pass
            .inputs
            .iter()
            .map(|id| bindings.resolve(*id).ok_or(RenderError::MissingResource(*id)))
            .collect::<Result<_, _>>()?;
        let layout = registry
            .texture_layout(pass.kernel)
            .ok_or(RenderError::UnknownPipeline(pass.kernel))?;

        match pass.kind {
            PassKind::Render { clear } => {
                let pipeline = registry
                    .render_pipeline(pass.kernel)
                    .ok_or(RenderError::UnknownPipeline(pass.kernel))?;
                let mut entries: SmallVec<[wgpu::BindGroupEntry<'_>; 4]> = inputs
                    .iter()
                    .enumerate()
                    .map(|(binding, view)| wgpu::BindGroupEntry {
                        binding: binding as u32,
                        resource: wgpu::BindingResource::TextureView(*view),
                    })
                    .collect();
                entries.push(wgpu::BindGroupEntry {
                    binding: inputs.len() as u32,
                    resource: wgpu::BindingResource::Sampler(registry.sampler()),
                });
                let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(pass.label),
                    layout,
                    entries: &entries,
                });

                let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some(pass.label),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: output,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(clear),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    ..Default::default()
                });
                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, &bind_group, &[]);
                rpass.set_vertex_buffer(0, registry.quad().slice(..));
                rpass.draw(0..4, 0..1);
            }
            PassKind::Compute { dispatch } => {
                let pipeline = registry
                    .compute_pipeline(pass.kernel)
                    .ok_or(RenderError::UnknownPipeline(pass.kernel))?;
                let input = *inputs
                    .first()
                    .ok_or(RenderError::UnknownPipeline(pass.kernel))?;
                let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(pass.label),
                    layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(input),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(output),
                        },
                    ],
                });

                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(pass.label),
                    timestamp_writes: None,
                });
                cpass.set_pipeline(pipeline);
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.set_bind_group(1, resources.kernel.bind_group(), &[]);
                cpass.dispatch_workgroups(dispatch.x, dispatch.y, dispatch.z);
            }
        }
    }
    Ok(())
}
