//! Per-frame pass list.
//!
//! The topology is fixed for a renderer: one resize pass, `N` pairs of blur
//! passes, one composite pass. The graph is rebuilt every frame from a
//! [`GraphLayout`]; only the ping-pong bindings differ between iterations.

use smallvec::{SmallVec, smallvec};

use crate::{
    error::ConfigError, pool::PingPong, registry::KernelId, texture::DispatchSize,
};

/// Logical texture a pass reads or writes, resolved to a view at execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// The ingested frame or the static source.
    Source,
    /// Working-resolution copy of the source.
    Resize,
    /// Output of each horizontal blur pass.
    BlurScratch,
    PingA,
    PingB,
    /// Composite mask.
    Mask,
    /// The presentable surface.
    Target,
}

/// Group of passes that run together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Runs when a frame is ingested.
    Transform,
    Blur,
    /// Runs when a frame is presented, after the blur stage.
    Composite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassKind {
    /// Draw the quad into `output` after clearing it.
    Render { clear: wgpu::Color },
    Compute { dispatch: DispatchSize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassDescriptor {
    pub label: &'static str,
    pub stage: Stage,
    /// Blur iteration, `None` outside the blur stage.
    pub iteration: Option<u32>,
    pub kind: PassKind,
    pub kernel: KernelId,
    /// Textures bound in the kernel's slot order.
    pub inputs: SmallVec<[ResourceId; 3]>,
    pub output: ResourceId,
}

/// Inputs needed to build a frame's graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphLayout {
    pub iterations: u32,
    pub dispatch: DispatchSize,
    pub clear_color: wgpu::Color,
    pub ping_pong: PingPong,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameGraph {
    passes: Vec<PassDescriptor>,
    blurred: ResourceId,
}

impl FrameGraph {
    pub fn build(layout: &GraphLayout) -> Result<Self, ConfigError> {
        let mut passes = Vec::with_capacity(2 + 2 * layout.iterations as usize);
        passes.push(PassDescriptor {
            label: "Resize Pass",
            stage: Stage::Transform,
            iteration: None,
            kind: PassKind::Render {
                clear: layout.clear_color,
            },
            kernel: KernelId::Resize,
            inputs: smallvec![ResourceId::Source],
            output: ResourceId::Resize,
        });

        let blur = PassKind::Compute {
            dispatch: layout.dispatch,
        };
        for iteration in 0..layout.iterations {
            let (read, write) = layout
                .ping_pong
                .select_read_write(iteration, ResourceId::Resize)?;
            passes.push(PassDescriptor {
                label: "Blur Horizontal Pass",
                stage: Stage::Blur,
                iteration: Some(iteration),
                kind: blur,
                kernel: KernelId::BlurHorizontal,
                inputs: smallvec![read],
                output: ResourceId::BlurScratch,
            });
            passes.push(PassDescriptor {
                label: "Blur Vertical Pass",
                stage: Stage::Blur,
                iteration: Some(iteration),
                kind: blur,
                kernel: KernelId::BlurVertical,
                inputs: smallvec![ResourceId::BlurScratch],
                output: write,
            });
        }

        let blurred = layout
            .ping_pong
            .final_output(layout.iterations, ResourceId::Resize);
        passes.push(PassDescriptor {
            label: "Composite Pass",
            stage: Stage::Composite,
            iteration: None,
            kind: PassKind::Render {
                clear: layout.clear_color,
            },
            kernel: KernelId::Composite,
            inputs: smallvec![ResourceId::Source, blurred, ResourceId::Mask],
            output: ResourceId::Target,
        });

        for pass in &passes {
            if pass.inputs.contains(&pass.output) {
                return Err(ConfigError::AliasedInput(pass.output));
            }
        }
        Ok(Self { passes, blurred })
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.passes
    }

    /// Passes belonging to any of `stages`, in execution order.
    pub fn stages<'a>(
        &'a self,
        stages: &'a [Stage],
    ) -> impl Iterator<Item = &'a PassDescriptor> + 'a {
        self.passes
            .iter()
            .filter(move |pass| stages.contains(&pass.stage))
    }

    /// Texture the composite pass samples as the blurred image.
    pub fn blurred(&self) -> ResourceId {
        self.blurred
    }
}
