use std::sync::OnceLock;

use crate::{
    BlurGraphConfig, BlurRenderer, FrameBuffer, FrameOutcome, GpuContext, InitError,
    KernelId, KernelLibrary, OffscreenTarget, OwnedFrame, PipelineState, PixelFormat,
    RenderError, RenderLoop, ResourceId, SkipReason,
};

/// Software adapter shared by GPU tests, `None` when the machine has none.
pub(crate) fn context() -> Option<GpuContext> {
    static CONTEXT: OnceLock<Option<GpuContext>> = std::sync::OnceLock::new();
    CONTEXT
        .get_or_init(|| GpuContext::new_headless(true).ok())
        .clone()
}

fn renderer(config: BlurGraphConfig) -> Option<(GpuContext, BlurRenderer)> {
    let ctx = context()?;
    let renderer = BlurRenderer::build(ctx.clone(), config).expect("renderer initializes");
    Some((ctx, renderer))
}

fn solid_bgra(width: u32, height: u32, [r, g, b]: [u8; 3]) -> Vec<u8> {
    [b, g, r, 255].repeat((width * height) as usize)
}

/// 8x8 checkerboard of two colors, RGBA.
fn checker_rgba(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            if (x / 8 + y / 8) % 2 == 0 {
                data.extend_from_slice(&[250, 10, 10, 255]);
            } else {
                data.extend_from_slice(&[10, 10, 250, 255]);
            }
        }
    }
    data
}

fn assert_rgb_eq(actual: &[u8], expected: &[u8]) {
    assert_eq!(actual.len(), expected.len());
    for (index, (a, e)) in actual.chunks(4).zip(expected.chunks(4)).enumerate() {
        assert_eq!(&a[..3], &e[..3], "texel {index}");
    }
}

#[test]
fn uniform_field_is_invariant_under_blur() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = solid_bgra(256, 256, [200, 120, 40]);

    let frame = FrameBuffer::new(&pixels, 256, 256, PixelFormat::Bgra8Unorm);
    assert!(renderer.ingest(&frame));
    assert_eq!(
        renderer.present(&mut target).expect("present"),
        FrameOutcome::Presented
    );

    let output = target.read_pixels(&ctx).expect("readback");
    for texel in output.chunks(4) {
        assert_eq!(&texel[..3], &[200, 120, 40]);
    }
    assert_eq!(renderer.state(), PipelineState::Ready);
}

#[test]
fn uniform_field_is_invariant_under_any_mask() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let mask: Vec<u8> = (0..64u32 * 64)
        .flat_map(|i| {
            let v = (i % 256) as u8;
            [v, v, v, 255]
        })
        .collect();
    renderer
        .set_mask(&FrameBuffer::new(&mask, 64, 64, PixelFormat::Rgba8Unorm))
        .expect("mask uploads");

    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = solid_bgra(256, 256, [30, 60, 90]);
    let outcome = renderer
        .render_frame(
            &FrameBuffer::new(&pixels, 256, 256, PixelFormat::Bgra8Unorm),
            &mut target,
        )
        .expect("render");
    assert_eq!(outcome, FrameOutcome::Presented);

    let output = target.read_pixels(&ctx).expect("readback");
    for texel in output.chunks(4) {
        assert_eq!(&texel[..3], &[30, 60, 90]);
    }
}

#[test]
fn zero_iterations_pass_the_resized_frame_through() {
    let config = BlurGraphConfig {
        iterations: 0,
        ..Default::default()
    };
    let Some((ctx, mut renderer)) = renderer(config) else {
        return;
    };
    assert_eq!(renderer.blurred_resource(), Some(ResourceId::Resize));

    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = checker_rgba(256, 256);
    let frame = FrameBuffer::new(&pixels, 256, 256, PixelFormat::Rgba8Unorm);
    assert!(renderer.ingest(&frame));

    let resized = renderer
        .read_working_texture(ResourceId::Resize)
        .expect("readback");
    assert_rgb_eq(&resized, &pixels);

    renderer.present(&mut target).expect("present");
    let output = target.read_pixels(&ctx).expect("readback");
    assert_rgb_eq(&output, &pixels);
}

#[test]
fn black_mask_keeps_the_original() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    renderer
        .set_mask(&FrameBuffer::new(&[0, 0, 0, 255], 1, 1, PixelFormat::Rgba8Unorm))
        .expect("mask uploads");

    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = checker_rgba(256, 256);
    renderer
        .render_frame(
            &FrameBuffer::new(&pixels, 256, 256, PixelFormat::Rgba8Unorm),
            &mut target,
        )
        .expect("render");

    let output = target.read_pixels(&ctx).expect("readback");
    assert_rgb_eq(&output, &pixels);
}

#[test]
fn blur_softens_edges() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = checker_rgba(256, 256);
    renderer
        .render_frame(
            &FrameBuffer::new(&pixels, 256, 256, PixelFormat::Rgba8Unorm),
            &mut target,
        )
        .expect("render");

    let output = target.read_pixels(&ctx).expect("readback");
    let red_at = |x: usize, y: usize| output[(y * 256 + x) * 4];
    // The checker corner at (8, 8) is no longer a hard edge.
    assert!(red_at(7, 7) < 250);
    assert!(red_at(8, 7) > 10);
}

#[test]
fn unsupported_frame_is_skipped_without_side_effects() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let data = vec![0u8; 256 * 256 * 2];
    let frame = FrameBuffer::new(&data, 256, 256, PixelFormat::Yuv420BiPlanar);

    assert!(!renderer.ingest(&frame));
    assert_eq!(renderer.state(), PipelineState::Ready);
    assert!(renderer.frame_cache().is_empty());

    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    assert_eq!(
        renderer.present(&mut target).expect("present"),
        FrameOutcome::Skipped(SkipReason::NoSource)
    );
    assert_eq!(
        renderer.render_frame(&frame, &mut target).expect("render"),
        FrameOutcome::Skipped(SkipReason::IngestFailed)
    );
}

#[test]
fn live_frame_is_released_after_present() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = solid_bgra(320, 240, [1, 2, 3]);
    let frame = FrameBuffer::new(&pixels, 320, 240, PixelFormat::Bgra8Unorm);

    assert!(renderer.ingest(&frame));
    assert_eq!(renderer.frame_cache().leased(), 1);
    renderer.present(&mut target).expect("present");
    assert_eq!(renderer.frame_cache().leased(), 0);
    assert_eq!(
        renderer.present(&mut target).expect("present"),
        FrameOutcome::Skipped(SkipReason::NoSource)
    );

    for _ in 0..4 {
        assert!(renderer.ingest(&frame));
    }
    assert_eq!(renderer.frame_cache().len(), 1);
}

#[test]
fn static_source_persists_across_presents() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let still = solid_bgra(512, 512, [90, 180, 30]);
    renderer
        .set_static_source(&FrameBuffer::new(&still, 512, 512, PixelFormat::Bgra8Unorm))
        .expect("static source uploads");

    for _ in 0..2 {
        assert_eq!(
            renderer.present(&mut target).expect("present"),
            FrameOutcome::Presented
        );
    }

    // A live frame overrides the still for one present, then the still returns.
    let live = solid_bgra(256, 256, [10, 20, 30]);
    renderer
        .render_frame(
            &FrameBuffer::new(&live, 256, 256, PixelFormat::Bgra8Unorm),
            &mut target,
        )
        .expect("render");
    let output = target.read_pixels(&ctx).expect("readback");
    assert_eq!(&output[..3], &[10, 20, 30]);

    renderer.present(&mut target).expect("present");
    let output = target.read_pixels(&ctx).expect("readback");
    assert_eq!(&output[..3], &[90, 180, 30]);
    assert_eq!(renderer.frame_index(), 4);
}

#[test]
fn failed_initialization_is_terminal() {
    let Some(ctx) = context() else {
        return;
    };
    let mut library = KernelLibrary::default();
    library.remove(KernelId::Composite);
    let mut renderer =
        BlurRenderer::new(ctx.clone(), BlurGraphConfig::default()).with_kernel_library(library);

    assert!(matches!(
        renderer.initialize(),
        Err(InitError::KernelUnavailable(KernelId::Composite))
    ));
    assert_eq!(renderer.state(), PipelineState::Failed);
    assert!(matches!(
        renderer.initialize(),
        Err(InitError::AlreadyFailed)
    ));

    let pixels = solid_bgra(16, 16, [0, 0, 0]);
    assert!(!renderer.ingest(&FrameBuffer::new(&pixels, 16, 16, PixelFormat::Bgra8Unorm)));
    let mut target = OffscreenTarget::new(&ctx, 16, 16);
    assert!(matches!(
        renderer.present(&mut target),
        Err(RenderError::PipelineUnavailable(PipelineState::Failed))
    ));
}

#[test]
fn invalid_config_fails_initialization() {
    let Some(ctx) = context() else {
        return;
    };
    let config = BlurGraphConfig {
        working_width: 200,
        ..Default::default()
    };
    let mut renderer = BlurRenderer::new(ctx, config);
    assert!(matches!(renderer.initialize(), Err(InitError::Config(_))));
    assert_eq!(renderer.state(), PipelineState::Failed);
}

#[test]
fn present_requires_initialization() {
    let Some(ctx) = context() else {
        return;
    };
    let mut renderer = BlurRenderer::new(ctx.clone(), BlurGraphConfig::default());
    let mut target = OffscreenTarget::new(&ctx, 16, 16);
    assert!(matches!(
        renderer.present(&mut target),
        Err(RenderError::PipelineUnavailable(PipelineState::Uninitialized))
    ));
}

#[test]
fn target_format_must_match_composite_pipeline() {
    let config = BlurGraphConfig {
        output_format: wgpu::TextureFormat::Bgra8Unorm,
        ..Default::default()
    };
    let Some((ctx, mut renderer)) = renderer(config) else {
        return;
    };
    let pixels = solid_bgra(16, 16, [0, 0, 0]);
    assert!(renderer.ingest(&FrameBuffer::new(&pixels, 16, 16, PixelFormat::Bgra8Unorm)));
    let mut target = OffscreenTarget::new(&ctx, 16, 16);
    assert!(matches!(
        renderer.present(&mut target),
        Err(RenderError::TargetFormat { .. })
    ));
}

#[test]
fn kernel_can_be_reconfigured() {
    let config = BlurGraphConfig {
        iterations: 1,
        sigma: 0.5,
        ..Default::default()
    };
    let Some((ctx, mut renderer)) = renderer(config) else {
        return;
    };
    assert!(matches!(
        renderer.reconfigure_kernel(2.0, 8),
        Err(RenderError::Config(_))
    ));
    assert_eq!(renderer.kernel().map(|k| k.tap_count()), Some(7));

    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    let pixels = checker_rgba(256, 256);
    let frame = FrameBuffer::new(&pixels, 256, 256, PixelFormat::Rgba8Unorm);
    // Red at the last texel of the first checker square, next to blue.
    let mut edge_red = |renderer: &mut BlurRenderer| {
        renderer
            .render_frame(&frame, &mut target)
            .expect("render");
        let output = target.read_pixels(&ctx).expect("readback");
        output[(4 * 256 + 7) * 4]
    };

    let sharp = edge_red(&mut renderer);
    renderer.reconfigure_kernel(8.0, 15).expect("valid kernel");
    assert_eq!(renderer.kernel().map(|k| k.tap_count()), Some(15));
    assert_eq!(renderer.config().tap_count, 15);
    let soft = edge_red(&mut renderer);

    assert!(sharp > soft + 40, "sharp {sharp}, soft {soft}");
}

#[test]
fn rejected_frame_keeps_the_held_frame() {
    let Some((ctx, mut renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let pixels = solid_bgra(256, 256, [70, 140, 210]);
    assert!(renderer.ingest(&FrameBuffer::new(&pixels, 256, 256, PixelFormat::Bgra8Unorm)));

    let yuv = vec![0u8; 256 * 256 * 2];
    assert!(!renderer.ingest(&FrameBuffer::new(&yuv, 256, 256, PixelFormat::Yuv420BiPlanar)));
    let short = vec![0u8; 16];
    assert!(!renderer.ingest(&FrameBuffer::new(&short, 256, 256, PixelFormat::Bgra8Unorm)));
    assert_eq!(renderer.frame_cache().leased(), 1);

    let mut target = OffscreenTarget::new(&ctx, 256, 256);
    assert_eq!(
        renderer.present(&mut target).expect("present"),
        FrameOutcome::Presented
    );
    let output = target.read_pixels(&ctx).expect("readback");
    assert_eq!(&output[..3], &[70, 140, 210]);
}

#[test]
fn pipeline_creation_failure_is_terminal() {
    let Some(ctx) = context() else {
        return;
    };
    let mut library = KernelLibrary::default();
    library.insert(KernelId::Composite, crate::registry::UNBOUND_COMPOSITE);
    let mut renderer =
        BlurRenderer::new(ctx, BlurGraphConfig::default()).with_kernel_library(library);

    assert!(matches!(
        renderer.initialize(),
        Err(InitError::PipelineCreation {
            kernel: KernelId::Composite,
            ..
        })
    ));
    assert_eq!(renderer.state(), PipelineState::Failed);
    assert!(matches!(
        renderer.initialize(),
        Err(InitError::AlreadyFailed)
    ));
}

#[test]
fn render_loop_drains_mailbox() {
    let Some((ctx, renderer)) = renderer(BlurGraphConfig::default()) else {
        return;
    };
    let target = OffscreenTarget::new(&ctx, 256, 256);
    let render_loop = RenderLoop::spawn(renderer, target).expect("thread spawns");
    let mailbox = render_loop.mailbox();

    for shade in [10u8, 20, 30] {
        let frame = OwnedFrame::packed(
            solid_bgra(64, 64, [shade, shade, shade]),
            64,
            64,
            PixelFormat::Bgra8Unorm,
        );
        mailbox.send(frame).expect("loop is running");
    }

    let (renderer, target) = render_loop.shutdown().expect("render thread");
    assert_eq!(renderer.frame_index(), 3);
    assert!(mailbox.is_closed());

    let output = target.read_pixels(&ctx).expect("readback");
    assert_eq!(&output[..3], &[30, 30, 30]);
}
