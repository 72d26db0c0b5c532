//! Error types for the blur frame-graph.
//!
//! Errors are split by when they can happen:
//!
//! - [`ConfigError`]: invalid parameters, caught before any GPU allocation.
//! - [`InitError`]: init-fatal; the renderer enters the failed state.
//! - [`IngestError`]: per-frame and recoverable; the frame is skipped.
//! - [`RenderError`]: returned from presents. Only `PipelineUnavailable` is
//!   terminal.

use thiserror::Error;

use crate::{graph::ResourceId, registry::KernelId};

/// Invalid configuration, surfaced at init and never silently defaulted.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("{width}x{height} is not a non-zero multiple of the {extent}x{extent} threadgroup")]
    Dimensions { width: u32, height: u32, extent: u32 },
    #[error("working format {0:?} cannot be bound as a storage texture")]
    UnsupportedWorkingFormat(wgpu::TextureFormat),
    #[error("requested texture descriptor does not match the configured working descriptor")]
    DescriptorMismatch,
    #[error("external input {0:?} aliases a ping-pong texture")]
    AliasedInput(ResourceId),
}

/// Init-fatal failures. Reported once and never retried.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("no compatible GPU adapter found")]
    NoAdapter,
    #[error("failed to request GPU device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("kernel {0:?} has no source or is missing its entry point")]
    KernelUnavailable(KernelId),
    #[error("kernel {kernel:?} failed to compile:\n{message}")]
    KernelCompilation { kernel: KernelId, message: String },
    #[error("pipeline for kernel {kernel:?} could not be created: {message}")]
    PipelineCreation { kernel: KernelId, message: String },
    #[error("failed to create {label}: {message}")]
    ResourceCreation { label: &'static str, message: String },
    #[error("texture `{label}` ({width}x{height}) exceeds the device limit of {limit}")]
    TextureAllocation {
        label: &'static str,
        width: u32,
        height: u32,
        limit: u32,
    },
    #[error("initialization already failed and is not retried")]
    AlreadyFailed,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Per-frame ingestion failures. The frame is dropped and rendering continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("pixel format {0:?} cannot be ingested")]
    UnsupportedFormat(crate::ingest::PixelFormat),
    #[error("all {capacity} frame cache slots are leased")]
    CacheExhausted { capacity: usize },
    #[error("frame buffer is inconsistent with its extent: {0}")]
    InvalidBuffer(String),
}

/// Errors returned while rendering or presenting a frame.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("the render pipeline is not available (state: {0:?})")]
    PipelineUnavailable(crate::renderer::PipelineState),
    #[error("kernel {0:?} has no pipeline of the kind its pass needs")]
    UnknownPipeline(KernelId),
    #[error("resource {0:?} is not bound for this frame")]
    MissingResource(ResourceId),
    #[error("target format {actual:?} does not match the composite pipeline's {expected:?}")]
    TargetFormat {
        expected: wgpu::TextureFormat,
        actual: wgpu::TextureFormat,
    },
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("waiting for the GPU failed: {0}")]
    Device(#[from] wgpu::PollError),
    #[error("failed to acquire the presentable surface: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("failed to read back the output texture: {0}")]
    Readback(String),
}
