//! Kernel identifiers, their WGSL sources, and the pipelines built from them.
//!
//! Every pass names its kernel with a [`KernelId`]. The [`PipelineRegistry`]
//! validates and builds all of them once at init. A missing source, a
//! missing entry point, or a module that fails validation is an [`InitError`].
//! Nothing is looked up by name while rendering.
//!
//! The render kernels share the quad vertex stage: each render module is the
//! [`KernelId::ImageVertex`] source followed by the fragment source.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::{
    context::GpuContext,
    error::InitError,
    geometry::{self, ImageVertex},
    texture::WORKING_FORMAT,
    uniforms::KernelBuffer,
};

/// Identifier of a GPU kernel with a fixed binding contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// Quad vertex stage: two `vec2<f32>` attributes, stride 16.
    ImageVertex,
    /// Fragment stage sampling the source into the working resolution.
    /// Binds the source texture (0) and a sampler (1).
    Resize,
    /// Compute stage. Binds input (0) and storage output (1) in group 0, and
    /// the kernel block (0) in group 1.
    BlurHorizontal,
    /// Same contract as [`KernelId::BlurHorizontal`].
    BlurVertical,
    /// Fragment stage blending source (0), blurred (1) and mask (2) through a
    /// sampler (3).
    Composite,
}

impl KernelId {
    pub const ALL: [KernelId; 5] = [
        KernelId::ImageVertex,
        KernelId::Resize,
        KernelId::BlurHorizontal,
        KernelId::BlurVertical,
        KernelId::Composite,
    ];

    /// Entry point the kernel's module must export.
    pub fn entry_point(self) -> &'static str {
        match self {
            KernelId::ImageVertex => "image_vertex",
            KernelId::Resize => "resize_fragment",
            KernelId::BlurHorizontal => "blur_horizontal",
            KernelId::BlurVertical => "blur_vertical",
            KernelId::Composite => "composite_fragment",
        }
    }

    pub fn is_compute(self) -> bool {
        matches!(self, KernelId::BlurHorizontal | KernelId::BlurVertical)
    }
}

/// WGSL sources keyed by kernel.
#[derive(Debug, Clone)]
pub struct KernelLibrary {
    sources: FxHashMap<KernelId, Cow<'static, str>>,
}

impl Default for KernelLibrary {
    /// The shaders bundled with the crate.
    fn default() -> Self {
        let blur = include_str!("../shaders/blur.wgsl");
        let mut sources = FxHashMap::default();
        sources.insert(
            KernelId::ImageVertex,
            Cow::Borrowed(include_str!("../shaders/image_vertex.wgsl")),
        );
        sources.insert(
            KernelId::Resize,
            Cow::Borrowed(include_str!("../shaders/resize.wgsl")),
        );
        sources.insert(KernelId::BlurHorizontal, Cow::Borrowed(blur));
        sources.insert(KernelId::BlurVertical, Cow::Borrowed(blur));
        sources.insert(
            KernelId::Composite,
            Cow::Borrowed(include_str!("../shaders/composite.wgsl")),
        );
        Self { sources }
    }
}

impl KernelLibrary {
    /// A library with no kernels, to be filled with [`KernelLibrary::insert`].
    pub fn empty() -> Self {
        Self {
            sources: FxHashMap::default(),
        }
    }

    /// Replaces the source of one kernel.
    pub fn insert(&mut self, kernel: KernelId, source: impl Into<Cow<'static, str>>) {
        self.sources.insert(kernel, source.into());
    }

    pub fn remove(&mut self, kernel: KernelId) -> Option<Cow<'static, str>> {
        self.sources.remove(&kernel)
    }

    pub fn source(&self, kernel: KernelId) -> Option<&str> {
        self.sources.get(&kernel).map(|source| source.as_ref())
    }

    /// Full module text for `kernel`: render fragments are prefixed with the
    /// vertex stage they are linked against.
    pub fn module_source(&self, kernel: KernelId) -> Result<String, InitError> {
        let own = self
            .source(kernel)
            .ok_or(InitError::KernelUnavailable(kernel))?;
        match kernel {
            KernelId::Resize | KernelId::Composite => {
                let vertex = self
                    .source(KernelId::ImageVertex)
                    .ok_or(InitError::KernelUnavailable(KernelId::ImageVertex))?;
                Ok(format!("{vertex}\n{own}"))
            }
            _ => Ok(own.to_string()),
        }
    }

    /// Parses and validates the module for `kernel` and checks that it exports
    /// every entry point the kernel's passes use.
    pub fn validate(&self, kernel: KernelId) -> Result<naga::Module, InitError> {
        let source = self.module_source(kernel)?;
        let module = validate_wgsl(kernel, &source)?;
        let mut required = vec![kernel.entry_point()];
        if matches!(kernel, KernelId::Resize | KernelId::Composite) {
            required.push(KernelId::ImageVertex.entry_point());
        }
        for name in required {
            if !module.entry_points.iter().any(|entry| entry.name == name) {
                return Err(InitError::KernelUnavailable(kernel));
            }
        }
        Ok(module)
    }
}

/// Parses `source` with naga's WGSL front end and runs the validator.
fn validate_wgsl(kernel: KernelId, source: &str) -> Result<naga::Module, InitError> {
    let module =
        naga::front::wgsl::parse_str(source).map_err(|e| InitError::KernelCompilation {
            kernel,
            message: e.emit_to_string(source),
        })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| InitError::KernelCompilation {
        kernel,
        message: e.emit_to_string(source),
    })?;
    Ok(module)
}

/// Pipelines, layouts and shared static resources for every kernel.
pub struct PipelineRegistry {
    resize: wgpu::RenderPipeline,
    composite: wgpu::RenderPipeline,
    blur_horizontal: wgpu::ComputePipeline,
    blur_vertical: wgpu::ComputePipeline,
    resize_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    kernel_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    quad: wgpu::Buffer,
    output_format: wgpu::TextureFormat,
}

impl PipelineRegistry {
    /// Validates every kernel in `library`, then builds the pipelines.
    ///
    /// The composite pipeline renders to `output_format`; the resize pipeline
    /// always renders to the working format.
    pub fn new(
        ctx: &GpuContext,
        library: &KernelLibrary,
        output_format: wgpu::TextureFormat,
    ) -> Result<Self, InitError> {
        for kernel in KernelId::ALL {
            library.validate(kernel)?;
            debug!("Validated kernel {kernel:?}");
        }

        let (resize_layout, composite_layout, blur_layout, kernel_layout, blur_pipeline_layout) =
            ctx.capture_errors(|device| {
                let resize_layout = image_bind_group_layout(device, "Resize Bind Group Layout", 1);
                let composite_layout =
                    image_bind_group_layout(device, "Composite Bind Group Layout", 3);
                let blur_layout = blur_bind_group_layout(device);
                let kernel_layout = KernelBuffer::bind_group_layout(device);
                let blur_pipeline_layout =
                    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                        label: Some("Blur Pipeline Layout"),
                        bind_group_layouts: &[&blur_layout, &kernel_layout],
                        immediate_size: 0,
                    });
                (
                    resize_layout,
                    composite_layout,
                    blur_layout,
                    kernel_layout,
                    blur_pipeline_layout,
                )
            })
            .map_err(|err| InitError::ResourceCreation {
                label: "bind group layouts",
                message: err.to_string(),
            })?;

        let resize = create_image_pipeline(
            ctx,
            library,
            KernelId::Resize,
            &resize_layout,
            WORKING_FORMAT,
        )?;
        let composite = create_image_pipeline(
            ctx,
            library,
            KernelId::Composite,
            &composite_layout,
            output_format,
        )?;
        let blur_horizontal = create_blur_pipeline(
            ctx,
            library,
            KernelId::BlurHorizontal,
            &blur_pipeline_layout,
        )?;
        let blur_vertical = create_blur_pipeline(
            ctx,
            library,
            KernelId::BlurVertical,
            &blur_pipeline_layout,
        )?;

        let device = &ctx.device;
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Image Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Ok(Self {
            resize,
            composite,
            blur_horizontal,
            blur_vertical,
            resize_layout,
            composite_layout,
            blur_layout,
            kernel_layout,
            sampler,
            quad: geometry::create_quad_buffer(device),
            output_format,
        })
    }

    /// Render pipeline of a render kernel, `None` for compute or vertex-only
    /// kernels.
    pub fn render_pipeline(&self, kernel: KernelId) -> Option<&wgpu::RenderPipeline> {
        match kernel {
            KernelId::Resize => Some(&self.resize),
            KernelId::Composite => Some(&self.composite),
            _ => None,
        }
    }

    pub fn compute_pipeline(&self, kernel: KernelId) -> Option<&wgpu::ComputePipeline> {
        match kernel {
            KernelId::BlurHorizontal => Some(&self.blur_horizontal),
            KernelId::BlurVertical => Some(&self.blur_vertical),
            _ => None,
        }
    }

    /// Layout of bind group 0 for `kernel`.
    pub fn texture_layout(&self, kernel: KernelId) -> Option<&wgpu::BindGroupLayout> {
        match kernel {
            KernelId::Resize => Some(&self.resize_layout),
            KernelId::Composite => Some(&self.composite_layout),
            KernelId::BlurHorizontal | KernelId::BlurVertical => Some(&self.blur_layout),
            KernelId::ImageVertex => None,
        }
    }

    pub fn kernel_layout(&self) -> &wgpu::BindGroupLayout {
        &self.kernel_layout
    }

    pub fn sampler(&self) -> &wgpu::Sampler {
        &self.sampler
    }

    pub fn quad(&self) -> &wgpu::Buffer {
        &self.quad
    }

    pub fn output_format(&self) -> wgpu::TextureFormat {
        self.output_format
    }
}

/// `textures` sampled textures at bindings `0..textures`, then the sampler.
fn image_bind_group_layout(
    device: &wgpu::Device,
    label: &str,
    textures: u32,
) -> wgpu::BindGroupLayout {
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..textures)
        .map(|binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: textures,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

fn blur_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Blur Bind Group Layout"),
        entries: &[
            // 0: Input texture
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            },
            // 1: Output texture
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::StorageTexture {
                    access: wgpu::StorageTextureAccess::WriteOnly,
                    format: WORKING_FORMAT,
                    view_dimension: wgpu::TextureViewDimension::D2,
                },
                count: None,
            },
        ],
    })
}

fn pipeline_error(kernel: KernelId) -> impl FnOnce(wgpu::Error) -> InitError {
    move |err| InitError::PipelineCreation {
        kernel,
        message: err.to_string(),
    }
}

fn create_image_pipeline(
    ctx: &GpuContext,
    library: &KernelLibrary,
    kernel: KernelId,
    bind_group_layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> Result<wgpu::RenderPipeline, InitError> {
    let source = library.module_source(kernel)?;
    ctx.capture_errors(|device| {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.entry_point()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.entry_point()),
            bind_group_layouts: &[bind_group_layout],
            immediate_size: 0,
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(kernel.entry_point()),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some(KernelId::ImageVertex.entry_point()),
                buffers: &[ImageVertex::layout()],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some(kernel.entry_point()),
                targets: &[Some(format.into())],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    })
    .map_err(pipeline_error(kernel))
}

fn create_blur_pipeline(
    ctx: &GpuContext,
    library: &KernelLibrary,
    kernel: KernelId,
    layout: &wgpu::PipelineLayout,
) -> Result<wgpu::ComputePipeline, InitError> {
    let source = library.module_source(kernel)?;
    ctx.capture_errors(|device| {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.entry_point()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.entry_point()),
            layout: Some(layout),
            module: &shader,
            entry_point: Some(kernel.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        })
    })
    .map_err(pipeline_error(kernel))
}

/// Valid WGSL whose binding 7 is absent from the composite layout.
#[cfg(test)]
pub(crate) const UNBOUND_COMPOSITE: &str = "
@group(0) @binding(7)
var unbound_texture: texture_2d<f32>;

@fragment
fn composite_fragment(in: VertexOutput) -> @location(0) vec4<f32> {
    return textureLoad(unbound_texture, vec2<i32>(0, 0), 0);
}
";
