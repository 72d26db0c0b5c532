//! Explicit GPU context passed to every collaborator.

use tracing::{error, info};

use crate::error::InitError;

/// Device and queue shared by the renderer, its pools and its targets.
///
/// `wgpu` handles are reference counted, so cloning the context is cheap and
/// all clones address the same device.
#[derive(Clone)]
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    adapter_info: Option<wgpu::AdapterInfo>,
}

impl GpuContext {
    /// Requests an adapter without a surface and blocks until the device is
    /// ready.
    ///
    /// Set `force_fallback_adapter` to run on a software adapter, which is
    /// what the test suite does.
    pub fn new_headless(force_fallback_adapter: bool) -> Result<Self, InitError> {
        pollster::block_on(Self::request(None, force_fallback_adapter))
    }

    /// Requests an adapter able to present to `surface`.
    pub async fn for_surface(
        instance: &wgpu::Instance,
        surface: &wgpu::Surface<'_>,
    ) -> Result<Self, InitError> {
        Self::request_with_instance(instance, Some(surface), false).await
    }

    /// Wraps handles owned by the caller, e.g. an application that already
    /// manages its own window surface.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            adapter_info: None,
        }
    }

    pub fn adapter_info(&self) -> Option<&wgpu::AdapterInfo> {
        self.adapter_info.as_ref()
    }

    /// Human readable adapter name for logs.
    pub fn adapter_name(&self) -> &str {
        self.adapter_info
            .as_ref()
            .map_or("external device", |info| info.name.as_str())
    }

    /// Largest 2D texture edge the device accepts.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    /// Submits `commands` and blocks until the queue has drained.
    ///
    /// The wait has no timeout: a stalled GPU stalls the caller.
    pub fn submit_and_wait(
        &self,
        commands: wgpu::CommandBuffer,
    ) -> Result<(), wgpu::PollError> {
        self.queue.submit(Some(commands));
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
    }

    /// Runs `create` inside validation and out-of-memory error scopes and
    /// returns the first error either of them captured.
    ///
    /// Outside a scope wgpu hands such errors to its default handler, which
    /// panics.
    pub fn capture_errors<T>(
        &self,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, wgpu::Error> {
        let out_of_memory = self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let validation = self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create(&self.device);
        // Scopes pop innermost first.
        let validation = validation.pop();
        let out_of_memory = out_of_memory.pop();
        if let Some(err) = pollster::block_on(validation) {
            return Err(err);
        }
        match pollster::block_on(out_of_memory) {
            Some(err) => Err(err),
            None => Ok(value),
        }
    }

    async fn request(
        surface: Option<&wgpu::Surface<'_>>,
        force_fallback_adapter: bool,
    ) -> Result<Self, InitError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        Self::request_with_instance(&instance, surface, force_fallback_adapter).await
    }

    async fn request_with_instance(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'_>>,
        force_fallback_adapter: bool,
    ) -> Result<Self, InitError> {
        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: surface,
                force_fallback_adapter,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(e) => {
                error!("Failed to find an appropriate adapter: {e:?}");
                return Err(InitError::NoAdapter);
            }
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                label: Some("Blur Graph Device"),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await
            .inspect_err(|e| error!("Failed to create device: {e:?}"))?;

        let adapter_info = adapter.get_info();
        info!(
            "Using adapter {} ({:?})",
            adapter_info.name, adapter_info.backend
        );
        Ok(Self {
            device,
            queue,
            adapter_info: Some(adapter_info),
        })
    }
}
