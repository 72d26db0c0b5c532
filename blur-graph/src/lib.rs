//! blur-graph renders live or static frames through a fixed GPU frame-graph:
//! resize to a working resolution, `N` iterations of separable Gaussian blur,
//! then a masked composite of the blurred and original images.
//!
//! # Usage
//!
//! ```no_run
//! use blur_graph::{
//!     BlurGraphConfig, BlurRenderer, FrameBuffer, GpuContext, OffscreenTarget, PixelFormat,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = GpuContext::new_headless(false)?;
//! let mut renderer = BlurRenderer::build(ctx.clone(), BlurGraphConfig::default())?;
//! let mut target = OffscreenTarget::new(&ctx, 256, 256);
//!
//! let pixels = vec![200u8; 640 * 480 * 4];
//! let frame = FrameBuffer::new(&pixels, 640, 480, PixelFormat::Bgra8Unorm);
//! if renderer.ingest(&frame) {
//!     renderer.present(&mut target)?;
//! }
//! let rgba = target.read_pixels(&ctx)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Threading
//!
//! A capture callback should not drive the GPU directly. Spawn a
//! [`RenderLoop`] and send frames through its [`FrameMailbox`]; the producer
//! blocks while a frame is in flight, so at most one frame is ever queued.

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod graph;
pub mod ingest;
pub mod kernel;
pub mod mailbox;
pub mod pool;
pub mod registry;
pub mod renderer;
pub mod target;
pub mod texture;
pub mod uniforms;

#[cfg(test)]
mod test;

pub use wgpu;

pub use crate::{
    config::BlurGraphConfig,
    context::GpuContext,
    driver::{LoopStats, OwnedFrame, RenderLoop},
    error::{ConfigError, IngestError, InitError, RenderError},
    graph::{FrameGraph, PassDescriptor, PassKind, ResourceId, Stage},
    ingest::{FrameBuffer, FrameTextureCache, IngestedFrame, PixelFormat},
    kernel::{GaussianKernel, gaussian_weights},
    mailbox::{FrameMailbox, MailboxLease, SendError, TrySendError},
    pool::{PingPong, TexturePool},
    registry::{KernelId, KernelLibrary, PipelineRegistry},
    renderer::{BlurRenderer, FrameOutcome, FrameTiming, PipelineState, SkipReason},
    target::{OffscreenTarget, PresentTarget, SurfaceTarget, TargetFrame},
    texture::{DispatchSize, StorageClass, THREADGROUP_EXTENT, TextureDesc},
    uniforms::{KERNEL_BLOCK_SIZE, MAX_TAPS},
};
