//! Headless demo: blurs a still image, or a stream of synthetic camera
//! frames pushed through the render loop, and writes the result as a PNG.

mod synthetic;

use std::{error::Error, path::PathBuf};

use blur_graph::{
    BlurGraphConfig, BlurRenderer, FrameBuffer, GpuContext, OffscreenTarget, PixelFormat,
    RenderLoop,
};
use clap::Parser;
use tracing::info;

/// Blur a still image, or a stream of synthetic camera frames, into a PNG.
#[derive(Parser)]
#[command(name = "example", version, long_about = None)]
struct Args {
    /// Still image to blur. Without it a synthetic camera feeds the render
    /// loop.
    source: Option<PathBuf>,
    /// Mask whose red channel selects the blurred image.
    #[arg(long)]
    mask: Option<PathBuf>,
    /// Where to write the composited frame.
    #[arg(long, default_value = "blurred.png")]
    out: PathBuf,
    /// Number of synthetic frames to send.
    #[arg(long, default_value_t = 30)]
    frames: u32,
}

fn init_tracing() {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => match tracing_subscriber::EnvFilter::try_new("error,blur_graph=info,example=info")
        {
            Ok(filter) => filter,
            Err(_) => tracing_subscriber::EnvFilter::new("error"),
        },
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_rgba(path: &PathBuf) -> Result<image::RgbaImage, Box<dyn Error>> {
    Ok(image::open(path)?.to_rgba8())
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let args = Args::parse();

    let ctx = GpuContext::new_headless(false)?;
    info!("Using adapter {}", ctx.adapter_name());

    let config = BlurGraphConfig::default();
    let mut target = OffscreenTarget::new(&ctx, config.working_width, config.working_height);
    let mut renderer = BlurRenderer::build(ctx.clone(), config)?;

    if let Some(path) = &args.mask {
        let mask = load_rgba(path)?;
        renderer.set_mask(&FrameBuffer::new(
            mask.as_raw(),
            mask.width(),
            mask.height(),
            PixelFormat::Rgba8Unorm,
        ))?;
    }

    if let Some(path) = &args.source {
        let still = load_rgba(path)?;
        renderer.set_static_source(&FrameBuffer::new(
            still.as_raw(),
            still.width(),
            still.height(),
            PixelFormat::Rgba8Unorm,
        ))?;
        let outcome = renderer.present(&mut target)?;
        info!("Still image: {outcome:?}");
    } else {
        let render_loop = RenderLoop::spawn(renderer, target)?;
        let producer = synthetic::spawn_camera(render_loop.mailbox(), args.frames)?;
        let sent = producer
            .join()
            .map_err(|_| "synthetic camera thread panicked")?;
        let stats = render_loop.stats();
        info!(
            "Camera sent {sent} frames, {} presented, {} skipped",
            stats.presented(),
            stats.skipped()
        );
        (renderer, target) = render_loop
            .shutdown()
            .map_err(|_| "render thread panicked")?;
    }

    let pixels = target.read_pixels(&ctx)?;
    let image = image::RgbaImage::from_raw(target.width(), target.height(), pixels)
        .ok_or("readback size does not match the target")?;
    image.save(&args.out)?;
    info!(
        "Wrote {} after {} frames",
        args.out.display(),
        renderer.frame_index()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn defaults_drive_the_synthetic_camera() {
        let args = Args::try_parse_from(["example"]).expect("no arguments are required");
        assert!(args.source.is_none());
        assert!(args.mask.is_none());
        assert_eq!(args.out, PathBuf::from("blurred.png"));
        assert_eq!(args.frames, 30);
    }

    #[test]
    fn parses_still_image_and_options() {
        let args = Args::try_parse_from([
            "example", "still.png", "--mask", "mask.png", "--out", "out.png", "--frames", "5",
        ])
        .expect("valid arguments");
        assert_eq!(args.source, Some(PathBuf::from("still.png")));
        assert_eq!(args.mask, Some(PathBuf::from("mask.png")));
        assert_eq!(args.out, PathBuf::from("out.png"));
        assert_eq!(args.frames, 5);
    }

    #[test]
    fn rejects_bad_frame_count() {
        assert!(Args::try_parse_from(["example", "--frames", "many"]).is_err());
        assert!(Args::try_parse_from(["example", "a.png", "b.png"]).is_err());
    }
}
