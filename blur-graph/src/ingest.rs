//! Frame ingestion: turns caller-owned pixel buffers into sampleable textures.
//!
//! Frames are uploaded straight from the caller's rows into a texture leased
//! from a fixed-capacity cache. The cache keeps the input buffer only for the
//! duration of [`FrameTextureCache::ingest`]. The returned [`IngestedFrame`]
//! holds the slot until it is dropped.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{context::GpuContext, error::IngestError, texture::TextureDesc};

/// Pixel layout of an incoming frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit BGRA, the usual camera capture format.
    Bgra8Unorm,
    Rgba8Unorm,
    /// Bi-planar 4:2:0 YUV. Recognised but not ingestible.
    Yuv420BiPlanar,
}

impl PixelFormat {
    /// Texture format the frame uploads into, `None` if unsupported.
    pub fn texture_format(self) -> Option<wgpu::TextureFormat> {
        match self {
            PixelFormat::Bgra8Unorm => Some(wgpu::TextureFormat::Bgra8Unorm),
            PixelFormat::Rgba8Unorm => Some(wgpu::TextureFormat::Rgba8Unorm),
            PixelFormat::Yuv420BiPlanar => None,
        }
    }

    pub fn bytes_per_pixel(self) -> Option<u32> {
        self.texture_format().map(|_| 4)
    }
}

/// Borrowed view of an external frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameBuffer<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    /// Distance in bytes between the starts of consecutive rows.
    pub bytes_per_row: u32,
    pub format: PixelFormat,
}

impl<'a> FrameBuffer<'a> {
    /// A frame with tightly packed rows.
    pub fn new(data: &'a [u8], width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row: width.saturating_mul(format.bytes_per_pixel().unwrap_or(1)),
            format,
        }
    }

    /// A frame whose rows are padded to `bytes_per_row`.
    pub fn with_stride(mut self, bytes_per_row: u32) -> Self {
        self.bytes_per_row = bytes_per_row;
        self
    }
}

/// Checks `frame` without touching the GPU and returns its texture format.
pub fn validate_frame(frame: &FrameBuffer<'_>) -> Result<wgpu::TextureFormat, IngestError> {
    let (Some(format), Some(bytes_per_pixel)) = (
        frame.format.texture_format(),
        frame.format.bytes_per_pixel(),
    ) else {
        return Err(IngestError::UnsupportedFormat(frame.format));
    };
    if frame.width == 0 || frame.height == 0 {
        return Err(IngestError::InvalidBuffer(format!(
            "empty extent {}x{}",
            frame.width, frame.height
        )));
    }
    let row_bytes = u64::from(frame.width) * u64::from(bytes_per_pixel);
    if u64::from(frame.bytes_per_row) < row_bytes {
        return Err(IngestError::InvalidBuffer(format!(
            "row stride {} is shorter than a {}-pixel row",
            frame.bytes_per_row, frame.width
        )));
    }
    let required = u64::from(frame.bytes_per_row) * u64::from(frame.height - 1) + row_bytes;
    if (frame.data.len() as u64) < required {
        return Err(IngestError::InvalidBuffer(format!(
            "{} bytes supplied, {required} required",
            frame.data.len()
        )));
    }
    Ok(format)
}

/// Fixed-capacity cache of upload textures.
///
/// Slots are matched by extent and format. When the cache is full the least
/// recently used unleased slot is replaced. If every slot is leased, ingestion
/// fails with [`IngestError::CacheExhausted`].
pub struct FrameTextureCache {
    inner: Arc<Mutex<CacheInner>>,
    capacity: usize,
}

#[derive(Default)]
struct CacheInner {
    slots: Vec<CacheSlot>,
    next_id: u64,
    tick: u64,
}

struct CacheSlot {
    id: u64,
    desc: TextureDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    leased: bool,
    last_used: u64,
}

impl CacheInner {
    fn release(&mut self, id: u64) {
        if let Some(slot) = self.slots.iter_mut().find(|slot| slot.id == id) {
            slot.leased = false;
        }
    }

    fn lru_unleased_index(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.leased)
            .min_by_key(|(_, slot)| slot.last_used)
            .map(|(index, _)| index)
    }
}

impl FrameTextureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots currently held by an [`IngestedFrame`].
    pub fn leased(&self) -> usize {
        self.inner
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.leased)
            .count()
    }

    /// Uploads `frame` into a leased texture.
    ///
    /// On failure the cache is left exactly as it was.
    pub fn ingest(
        &self,
        ctx: &GpuContext,
        frame: &FrameBuffer<'_>,
    ) -> Result<IngestedFrame, IngestError> {
        let format = validate_for_device(ctx, frame)?;
        let desc = TextureDesc::uploaded(frame.width, frame.height, format);

        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;

        let reusable = inner
            .slots
            .iter()
            .position(|slot| slot.desc == desc && !slot.leased);
        let index = match reusable {
            Some(index) => index,
            None => {
                if inner.slots.len() >= self.capacity {
                    let Some(evict) = inner.lru_unleased_index() else {
                        return Err(IngestError::CacheExhausted {
                            capacity: self.capacity,
                        });
                    };
                    let evicted = inner.slots.swap_remove(evict);
                    debug!(
                        "Evicted frame cache slot {}x{}",
                        evicted.desc.width, evicted.desc.height
                    );
                }
                let texture = desc.create_texture(&ctx.device, "Frame Cache Texture");
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
                let id = inner.next_id;
                inner.next_id += 1;
                inner.slots.push(CacheSlot {
                    id,
                    desc,
                    texture,
                    view,
                    leased: false,
                    last_used: tick,
                });
                inner.slots.len() - 1
            }
        };

        let slot = &mut inner.slots[index];
        upload(ctx, &slot.texture, frame);
        slot.leased = true;
        slot.last_used = tick;

        Ok(IngestedFrame {
            id: slot.id,
            desc,
            view: slot.view.clone(),
            cache: Arc::clone(&self.inner),
        })
    }
}

/// [`validate_frame`] plus the device's texture size limit.
pub(crate) fn validate_for_device(
    ctx: &GpuContext,
    frame: &FrameBuffer<'_>,
) -> Result<wgpu::TextureFormat, IngestError> {
    let format = validate_frame(frame)?;
    let limit = ctx.max_texture_dimension();
    if frame.width > limit || frame.height > limit {
        return Err(IngestError::InvalidBuffer(format!(
            "{}x{} exceeds the device limit of {limit}",
            frame.width, frame.height
        )));
    }
    Ok(format)
}

fn upload(ctx: &GpuContext, texture: &wgpu::Texture, frame: &FrameBuffer<'_>) {
    ctx.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        frame.data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(frame.bytes_per_row),
            rows_per_image: Some(frame.height),
        },
        wgpu::Extent3d {
            width: frame.width,
            height: frame.height,
            depth_or_array_layers: 1,
        },
    );
}

/// A texture uploaded once and owned by its holder, used for static sources
/// and masks.
pub struct UploadedTexture {
    desc: TextureDesc,
    view: wgpu::TextureView,
}

impl UploadedTexture {
    pub fn new(
        ctx: &GpuContext,
        frame: &FrameBuffer<'_>,
        label: &str,
    ) -> Result<Self, IngestError> {
        let format = validate_for_device(ctx, frame)?;
        let desc = TextureDesc::uploaded(frame.width, frame.height, format);
        let texture = desc.create_texture(&ctx.device, label);
        upload(ctx, &texture, frame);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self { desc, view })
    }

    /// A single opaque white texel.
    pub fn white(ctx: &GpuContext, label: &str) -> Self {
        let desc = TextureDesc::uploaded(1, 1, wgpu::TextureFormat::Rgba8Unorm);
        let texture = desc.create_texture(&ctx.device, label);
        upload(
            ctx,
            &texture,
            &FrameBuffer::new(&[255; 4], 1, 1, PixelFormat::Rgba8Unorm),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { desc, view }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

/// A frame texture leased from the cache. Dropping it frees the slot.
pub struct IngestedFrame {
    id: u64,
    desc: TextureDesc,
    view: wgpu::TextureView,
    cache: Arc<Mutex<CacheInner>>,
}

impl IngestedFrame {
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}

impl std::fmt::Debug for IngestedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestedFrame")
            .field("id", &self.id)
            .field("desc", &self.desc)
            .finish()
    }
}

impl Drop for IngestedFrame {
    fn drop(&mut self) {
        self.cache.lock().release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32) -> Vec<u8> {
        vec![128; (width * height * 4) as usize]
    }

    #[test]
    fn accepts_packed_and_strided_frames() {
        let data = solid(16, 16);
        let frame = FrameBuffer::new(&data, 16, 16, PixelFormat::Bgra8Unorm);
        assert_eq!(frame.bytes_per_row, 64);
        assert_eq!(
            validate_frame(&frame),
            Ok(wgpu::TextureFormat::Bgra8Unorm)
        );

        // Last row may omit its padding.
        let padded = vec![0u8; 80 * 15 + 64];
        let frame = FrameBuffer::new(&padded, 16, 16, PixelFormat::Rgba8Unorm).with_stride(80);
        assert_eq!(
            validate_frame(&frame),
            Ok(wgpu::TextureFormat::Rgba8Unorm)
        );
    }

    #[test]
    fn rejects_planar_yuv() {
        let data = solid(16, 16);
        let frame = FrameBuffer::new(&data, 16, 16, PixelFormat::Yuv420BiPlanar);
        assert_eq!(
            validate_frame(&frame),
            Err(IngestError::UnsupportedFormat(PixelFormat::Yuv420BiPlanar))
        );
    }

    #[test]
    fn rejects_short_buffers_and_strides() {
        let data = solid(16, 15);
        let frame = FrameBuffer::new(&data, 16, 16, PixelFormat::Rgba8Unorm);
        assert!(matches!(
            validate_frame(&frame),
            Err(IngestError::InvalidBuffer(_))
        ));

        let data = solid(16, 16);
        let frame = FrameBuffer::new(&data, 16, 16, PixelFormat::Rgba8Unorm).with_stride(32);
        assert!(matches!(
            validate_frame(&frame),
            Err(IngestError::InvalidBuffer(_))
        ));

        let frame = FrameBuffer::new(&[], 0, 16, PixelFormat::Rgba8Unorm);
        assert!(matches!(
            validate_frame(&frame),
            Err(IngestError::InvalidBuffer(_))
        ));
    }

    #[test]
    fn lease_blocks_slot_until_dropped() {
        let Some(ctx) = crate::test::context() else {
            return;
        };
        let cache = FrameTextureCache::new(1);
        let data = solid(32, 32);
        let frame = FrameBuffer::new(&data, 32, 32, PixelFormat::Bgra8Unorm);

        let first = cache.ingest(&ctx, &frame).expect("free slot");
        assert_eq!(cache.leased(), 1);
        assert_eq!(
            cache.ingest(&ctx, &frame).map(|_| ()),
            Err(IngestError::CacheExhausted { capacity: 1 })
        );

        drop(first);
        assert_eq!(cache.leased(), 0);
        let second = cache.ingest(&ctx, &frame).expect("slot released");
        assert_eq!(cache.len(), 1);
        assert_eq!(second.desc().width, 32);
    }

    #[test]
    fn evicts_least_recently_used_slot_for_new_sizes() {
        let Some(ctx) = crate::test::context() else {
            return;
        };
        let cache = FrameTextureCache::new(2);
        let small = solid(16, 16);
        let large = solid(32, 32);
        let tall = solid(16, 32);

        drop(cache.ingest(&ctx, &FrameBuffer::new(&small, 16, 16, PixelFormat::Rgba8Unorm)));
        drop(cache.ingest(&ctx, &FrameBuffer::new(&large, 32, 32, PixelFormat::Rgba8Unorm)));
        assert_eq!(cache.len(), 2);

        let frame = cache
            .ingest(&ctx, &FrameBuffer::new(&tall, 16, 32, PixelFormat::Rgba8Unorm))
            .expect("an unleased slot can be evicted");
        assert_eq!(cache.len(), 2);
        assert_eq!((frame.desc().width, frame.desc().height), (16, 32));
    }

    #[test]
    fn unsupported_frame_leaves_cache_untouched() {
        let Some(ctx) = crate::test::context() else {
            return;
        };
        let cache = FrameTextureCache::new(2);
        let data = solid(16, 16);
        let result = cache.ingest(
            &ctx,
            &FrameBuffer::new(&data, 16, 16, PixelFormat::Yuv420BiPlanar),
        );
        assert!(matches!(result, Err(IngestError::UnsupportedFormat(_))));
        assert!(cache.is_empty());
        assert_eq!(cache.leased(), 0);
    }
}
