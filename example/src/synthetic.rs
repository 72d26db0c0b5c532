//! A fake camera producing moving BGRA gradients.

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use blur_graph::{FrameMailbox, OwnedFrame, PixelFormat};
use tracing::debug;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Sends `frames` frames, blocking while the renderer is busy. Returns how
/// many were accepted before the mailbox closed.
pub fn spawn_camera(
    mailbox: FrameMailbox<OwnedFrame>,
    frames: u32,
) -> io::Result<JoinHandle<u32>> {
    thread::Builder::new()
        .name("synthetic-camera".to_string())
        .spawn(move || {
            let mut sent = 0;
            for index in 0..frames {
                let frame =
                    OwnedFrame::packed(gradient(index), WIDTH, HEIGHT, PixelFormat::Bgra8Unorm);
                if mailbox.send(frame).is_err() {
                    debug!("Mailbox closed after {sent} frames");
                    break;
                }
                sent += 1;
                thread::sleep(FRAME_INTERVAL);
            }
            sent
        })
}

fn gradient(index: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    let shift = index.wrapping_mul(8);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let r = ((x + shift) % WIDTH * 255 / WIDTH) as u8;
            let g = (y * 255 / HEIGHT) as u8;
            // Hard-edged stripes make the blur visible.
            let b = if (x + shift) / 40 % 2 == 0 { 230 } else { 20 };
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    data
}
