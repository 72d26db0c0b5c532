//! Render loop thread draining a [`FrameMailbox`].

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info};

use crate::{
    ingest::{FrameBuffer, PixelFormat},
    mailbox::FrameMailbox,
    renderer::{BlurRenderer, FrameOutcome},
    target::PresentTarget,
};

/// A frame owned by the mailbox while it waits to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub format: PixelFormat,
}

impl OwnedFrame {
    /// A frame with tightly packed 4-byte texels.
    pub fn packed(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row: width.saturating_mul(4),
            format,
        }
    }

    pub fn as_buffer(&self) -> FrameBuffer<'_> {
        FrameBuffer::new(&self.data, self.width, self.height, self.format)
            .with_stride(self.bytes_per_row)
    }
}

/// Counters updated by the render thread.
#[derive(Debug, Default)]
pub struct LoopStats {
    presented: AtomicU64,
    skipped: AtomicU64,
}

impl LoopStats {
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}

/// A renderer running on its own thread, fed through a single-slot mailbox.
pub struct RenderLoop<P> {
    mailbox: FrameMailbox<OwnedFrame>,
    stats: Arc<LoopStats>,
    handle: JoinHandle<(BlurRenderer, P)>,
}

impl<P> RenderLoop<P>
where
    P: PresentTarget + Send + 'static,
{
    /// Moves `renderer` and `target` onto a new thread. They are handed back by
    /// [`RenderLoop::shutdown`].
    pub fn spawn(renderer: BlurRenderer, target: P) -> io::Result<Self> {
        let mailbox = FrameMailbox::new();
        let stats = Arc::new(LoopStats::default());
        let handle = {
            let mailbox = mailbox.clone();
            let stats = Arc::clone(&stats);
            thread::Builder::new()
                .name("blur-graph-render".to_string())
                .spawn(move || run(renderer, target, mailbox, stats))?
        };
        Ok(Self {
            mailbox,
            stats,
            handle,
        })
    }

    /// Handle producers send frames through.
    pub fn mailbox(&self) -> FrameMailbox<OwnedFrame> {
        self.mailbox.clone()
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Closes the mailbox, renders any queued frame, and joins the thread.
    pub fn shutdown(self) -> thread::Result<(BlurRenderer, P)> {
        self.mailbox.close();
        self.handle.join()
    }
}

fn run<P: PresentTarget>(
    mut renderer: BlurRenderer,
    mut target: P,
    mailbox: FrameMailbox<OwnedFrame>,
    stats: Arc<LoopStats>,
) -> (BlurRenderer, P) {
    info!("Render loop started");
    while let Some(frame) = mailbox.recv() {
        match renderer.render_frame(&frame.as_buffer(), &mut target) {
            Ok(FrameOutcome::Presented) => {
                stats.presented.fetch_add(1, Ordering::Relaxed);
            }
            Ok(FrameOutcome::Skipped(reason)) => {
                debug!("Frame skipped: {reason:?}");
                stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                error!("Render loop stopping: {err}");
                break;
            }
        }
        // Dropping the lease here, after the GPU wait, admits the next frame.
    }
    mailbox.close();
    info!(
        "Render loop finished: {} presented, {} skipped",
        stats.presented(),
        stats.skipped()
    );
    (renderer, target)
}
