//! wgpu backend implementation

use crate::backend::traits::*;
use crate::backend::types::*;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::collections::HashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Buffered compute pass command
#[derive(Clone)]
enum ComputeCommand {
    SetPipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
}

/// Pending compute pass with buffered commands
struct PendingComputePass {
    label: Option<String>,
    commands: Vec<ComputeCommand>,
}

/// Swapchain image between acquire and present
struct AcquiredSurfaceTexture {
    texture: wgpu::SurfaceTexture,
    view_id: u64,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    current_texture: Option<AcquiredSurfaceTexture>,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, wgpu::Texture>,
    texture_views: HashMap<u64, wgpu::TextureView>,
    bind_group_layouts: HashMap<u64, wgpu::BindGroupLayout>,
    bind_groups: HashMap<u64, wgpu::BindGroup>,
    compute_pipelines: HashMap<u64, wgpu::ComputePipeline>,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_view_id: u64,
    next_layout_id: u64,
    next_bind_group_id: u64,
    next_compute_pipeline_id: u64,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Pending pass - commands are buffered here and executed on end_compute_pass
    pending_compute_pass: Option<PendingComputePass>,

    // Submission tracking, completed serial is written from queue callbacks
    last_submission: u64,
    completed_submission: Arc<AtomicU64>,
    device_lost: Arc<AtomicBool>,
    /// First error raised outside an error scope, reported by the next checked call
    uncaptured_error: Arc<Mutex<Option<wgpu::Error>>>,
}

/// Outcome of a creation call from its popped error scopes
fn scoped_result(
    validation: Option<wgpu::Error>,
    out_of_memory: Option<wgpu::Error>,
    map: impl FnOnce(String) -> BackendError,
) -> BackendResult<()> {
    if out_of_memory.is_some() {
        return Err(BackendError::OutOfMemory);
    }
    match validation {
        Some(error) => Err(map(error.to_string())),
        None => Ok(()),
    }
}

fn uncaptured_result(error: Option<wgpu::Error>) -> BackendResult<()> {
    match error {
        Some(wgpu::Error::OutOfMemory { .. }) => Err(BackendError::OutOfMemory),
        Some(error) => Err(BackendError::CommandRecordingFailed(error.to_string())),
        None => Ok(()),
    }
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn convert_texture_format_back(format: wgpu::TextureFormat) -> Option<TextureFormat> {
        match format {
            wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
            wgpu::TextureFormat::Bgra8Unorm => Some(TextureFormat::Bgra8Unorm),
            wgpu::TextureFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
            _ => None,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::MAP_WRITE) {
            result |= wgpu::BufferUsages::MAP_WRITE;
        }
        if usage.contains(BufferUsage::COPY_SRC) {
            result |= wgpu::BufferUsages::COPY_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        result
    }

    /// Clamp to device limits while maintaining aspect ratio
    fn clamp_to_limits(&self, width: u32, height: u32) -> (u32, u32) {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            let new_width = ((width as f32 * scale) as u32).max(1);
            let new_height = ((height as f32 * scale) as u32).max(1);
            (new_width, new_height)
        } else {
            (width.max(1), height.max(1))
        }
    }

    fn check_device(&self) -> BackendResult<()> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(BackendError::DeviceLost);
        }
        uncaptured_result(self.uncaptured_error.lock().take())
    }

    /// Capture allocation and validation errors of the calls that follow
    fn push_error_scopes(&self) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
    }

    /// Pop the scopes of [`Self::push_error_scopes`]; validation errors go through `map`
    fn pop_error_scopes(&self, map: impl FnOnce(String) -> BackendError) -> BackendResult<()> {
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        scoped_result(validation, out_of_memory, map)
    }

    fn reconfigure_surface(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
    }
}

impl WgpuBackend {
    /// Create the backend for a window.
    ///
    /// `size` is the initial surface size in physical pixels.
    pub fn new<W>(window: Arc<W>, size: (u32, u32), vsync: bool) -> BackendResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        pollster::block_on(Self::new_async(window, size, vsync))
    }

    pub async fn new_async<W>(window: Arc<W>, size: (u32, u32), vsync: bool) -> BackendResult<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let (instance, surface, adapter, device, queue) = Self::init_native(window).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        // The ray-marcher writes the swapchain image as a storage texture
        let surface_format = [wgpu::TextureFormat::Rgba8Unorm, wgpu::TextureFormat::Bgra8Unorm]
            .into_iter()
            .find(|f| surface_caps.formats.contains(f))
            .ok_or_else(|| {
                BackendError::InitializationFailed(format!(
                    "Surface offers no storage-capable format (available: {:?})",
                    surface_caps.formats
                ))
            })?;
        if !surface_caps
            .usages
            .contains(wgpu::TextureUsages::STORAGE_BINDING)
        {
            return Err(BackendError::InitializationFailed(
                "Surface does not support storage binding".into(),
            ));
        }
        if surface_format == wgpu::TextureFormat::Bgra8Unorm
            && !adapter
                .features()
                .contains(wgpu::Features::BGRA8UNORM_STORAGE)
        {
            return Err(BackendError::InitializationFailed(
                "Bgra8Unorm surface needs BGRA8UNORM_STORAGE".into(),
            ));
        }

        let present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else if surface_caps
            .present_modes
            .contains(&wgpu::PresentMode::Mailbox)
        {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::AutoNoVsync
        };

        let max_size = device.limits().max_texture_dimension_2d;
        let (width, height) = size;
        let (clamped_width, clamped_height) = if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width.max(1), height.max(1))
        };

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::STORAGE_BINDING,
            format: surface_format,
            width: clamped_width,
            height: clamped_height,
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: crate::FRAMES_IN_FLIGHT as u32,
        };

        surface.configure(&device, &surface_config);
        log::info!(
            "Surface configured: {}x{} {:?} {:?}",
            clamped_width,
            clamped_height,
            surface_format,
            present_mode
        );

        let device_lost = Arc::new(AtomicBool::new(false));
        {
            let device_lost = Arc::clone(&device_lost);
            device.set_device_lost_callback(move |reason, message| {
                log::error!("Device lost ({:?}): {}", reason, message);
                device_lost.store(true, Ordering::Release);
            });
        }
        let uncaptured_error = Arc::new(Mutex::new(None));
        {
            let uncaptured_error = Arc::clone(&uncaptured_error);
            device.on_uncaptured_error(Box::new(move |error| {
                log::error!("Uncaptured wgpu error: {}", error);
                uncaptured_error.lock().get_or_insert(error);
            }));
        }

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            texture_views: HashMap::new(),
            bind_group_layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            compute_pipelines: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_view_id: 1,
            next_layout_id: 1,
            next_bind_group_id: 1,
            next_compute_pipeline_id: 1,
            encoder: None,
            pending_compute_pass: None,
            last_submission: 0,
            completed_submission: Arc::new(AtomicU64::new(0)),
            device_lost,
            uncaptured_error,
        })
    }

    async fn init_native<W>(
        window: Arc<W>,
    ) -> BackendResult<(
        wgpu::Instance,
        wgpu::Surface<'static>,
        wgpu::Adapter,
        wgpu::Device,
        wgpu::Queue,
    )>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or_else(wgpu::Backends::all);

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let required_features = adapter.features() & wgpu::Features::BGRA8UNORM_STORAGE;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("VOX DDA Device"),
                    required_features,
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        Ok((instance, surface, adapter, device, queue))
    }
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            let (clamped_width, clamped_height) = self.clamp_to_limits(width, height);
            self.surface_config.width = clamped_width;
            self.surface_config.height = clamped_height;
            self.reconfigure_surface();
            log::debug!("Surface resized to {}x{}", clamped_width, clamped_height);
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn swapchain_format(&self) -> TextureFormat {
        // new_async only accepts formats that convert back
        Self::convert_texture_format_back(self.surface_config.format)
            .unwrap_or(TextureFormat::Rgba8Unorm)
    }

    fn acquire_image(&mut self) -> BackendResult<Option<AcquiredImage>> {
        self.check_device()?;

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Timeout) => {
                log::debug!("Swapchain acquire timed out");
                return Ok(None);
            }
            Err(wgpu::SurfaceError::Outdated) | Err(wgpu::SurfaceError::Lost) => {
                log::warn!("Swapchain outdated or lost, reconfiguring");
                self.reconfigure_surface();
                return Ok(None);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
        };

        if output.suboptimal {
            log::trace!("Swapchain image is suboptimal");
        }

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let view_id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(view_id, view);

        let width = output.texture.width();
        let height = output.texture.height();
        self.current_texture = Some(AcquiredSurfaceTexture {
            texture: output,
            view_id,
        });

        Ok(Some(AcquiredImage {
            view: TextureViewHandle(view_id),
            width,
            height,
        }))
    }

    fn present(&mut self) -> BackendResult<()> {
        let acquired = self
            .current_texture
            .take()
            .ok_or_else(|| BackendError::PresentFailed("No image acquired".into()))?;
        self.texture_views.remove(&acquired.view_id);
        acquired.texture.present();
        Ok(())
    }

    fn discard_image(&mut self) {
        // Dropping a SurfaceTexture without presenting releases it
        if let Some(acquired) = self.current_texture.take() {
            self.texture_views.remove(&acquired.view_id);
        }
    }

    fn begin_commands(&mut self, label: Option<&str>) {
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label }),
        );
    }

    fn discard_commands(&mut self) {
        self.pending_compute_pass = None;
        self.encoder = None;
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> BackendResult<()> {
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| BackendError::CommandRecordingFailed("No command encoder".into()))?;
        let src_buf = self
            .buffers
            .get(&src.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", src)))?;
        let dst_buf = self
            .buffers
            .get(&dst.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", dst)))?;
        encoder.copy_buffer_to_buffer(src_buf, 0, dst_buf, 0, size);
        Ok(())
    }

    fn submit(&mut self) -> BackendResult<SubmissionIndex> {
        self.check_device()?;

        let command_buffer = self.encoder.take().map(|encoder| encoder.finish());
        self.queue.submit(command_buffer);

        self.last_submission += 1;
        let serial = self.last_submission;
        let completed = Arc::clone(&self.completed_submission);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(serial, Ordering::AcqRel);
        });

        log::trace!("Submitted command stream #{}", serial);
        Ok(SubmissionIndex(serial))
    }

    fn completed_submission(&mut self) -> SubmissionIndex {
        self.device.poll(wgpu::Maintain::Poll);
        SubmissionIndex(self.completed_submission.load(Ordering::Acquire))
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        self.completed_submission
            .fetch_max(self.last_submission, Ordering::AcqRel);
        self.check_device()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        self.check_device()?;
        self.push_error_scopes();
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        self.pop_error_scopes(BackendError::BufferCreationFailed)?;

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        self.check_device()?;
        self.push_error_scopes();
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });
        self.pop_error_scopes(BackendError::BufferCreationFailed)?;

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> u64 {
        buffer.0
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.check_device()?;
        self.push_error_scopes();
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        self.pop_error_scopes(BackendError::TextureCreationFailed)?;

        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(id, texture);

        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?;

        let view = tex.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.texture_views.insert(id, view);

        Ok(TextureViewHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| {
                let ty = match &e.ty {
                    BindingType::UniformBuffer => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::StorageBuffer { read_only } => wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage {
                            read_only: *read_only,
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    BindingType::Texture { sample_type } => wgpu::BindingType::Texture {
                        sample_type: match sample_type {
                            TextureSampleType::Float { filterable } => {
                                wgpu::TextureSampleType::Float { filterable: *filterable }
                            }
                            TextureSampleType::Uint => wgpu::TextureSampleType::Uint,
                        },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    BindingType::StorageTexture { format } => wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: Self::convert_texture_format(*format),
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                };

                let mut visibility = wgpu::ShaderStages::empty();
                if e.visibility.contains(ShaderStageFlags::COMPUTE) {
                    visibility |= wgpu::ShaderStages::COMPUTE;
                }

                wgpu::BindGroupLayoutEntry {
                    binding: e.binding,
                    visibility,
                    ty,
                    count: None,
                }
            })
            .collect();

        self.push_error_scopes();
        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &wgpu_entries,
            });
        self.pop_error_scopes(BackendError::BindGroupCreationFailed)?;

        let id = self.next_layout_id;
        self.next_layout_id += 1;
        self.bind_group_layouts.insert(id, layout);

        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", layout)))?;

        let mut wgpu_entries: Vec<wgpu::BindGroupEntry> = Vec::with_capacity(entries.len());
        for (binding, entry) in entries {
            let resource = match entry {
                BindGroupEntry::Buffer { buffer, offset, size } => {
                    let buf = self
                        .buffers
                        .get(&buffer.0)
                        .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", buffer)))?;
                    wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: *offset,
                        size: size.and_then(std::num::NonZeroU64::new),
                    })
                }
                BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                    let v = self
                        .texture_views
                        .get(&view.0)
                        .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", view)))?;
                    wgpu::BindingResource::TextureView(v)
                }
            };

            wgpu_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        self.push_error_scopes();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });
        self.pop_error_scopes(BackendError::BindGroupCreationFailed)?;

        let id = self.next_bind_group_id;
        self.next_bind_group_id += 1;
        self.bind_groups.insert(id, bind_group);

        Ok(BindGroupHandle(id))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        self.push_error_scopes();

        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.shader.as_str().into()),
            });

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|h| self.bind_group_layouts.get(&h.0))
            .collect();

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: &desc.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        self.pop_error_scopes(BackendError::PipelineCreationFailed)?;

        let id = self.next_compute_pipeline_id;
        self.next_compute_pipeline_id += 1;
        self.compute_pipelines.insert(id, pipeline);

        Ok(ComputePipelineHandle(id))
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.pending_compute_pass = Some(PendingComputePass {
            label: label.map(|s| s.to_string()),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        let Some(pending) = self.pending_compute_pass.take() else {
            return;
        };

        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };

        let compute_pipelines = &self.compute_pipelines;
        let bind_groups = &self.bind_groups;

        let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: pending.label.as_deref(),
            timestamp_writes: None,
        });

        for cmd in &pending.commands {
            match cmd {
                ComputeCommand::SetPipeline(handle) => {
                    if let Some(pipeline) = compute_pipelines.get(&handle.0) {
                        compute_pass.set_pipeline(pipeline);
                    }
                }
                ComputeCommand::SetBindGroup { index, bind_group } => {
                    if let Some(bg) = bind_groups.get(&bind_group.0) {
                        compute_pass.set_bind_group(*index, bg, &[]);
                    }
                }
                ComputeCommand::Dispatch { x, y, z } => {
                    compute_pass.dispatch_workgroups(*x, *y, *z);
                }
            }
        }
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending
                .commands
                .push(ComputeCommand::SetBindGroup { index, bind_group });
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        if let Some(ref mut pending) = self.pending_compute_pass {
            pending.commands.push(ComputeCommand::Dispatch { x, y, z });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(tex) = self.textures.remove(&texture.0) {
            tex.destroy();
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(&layout.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(&pipeline.0);
    }
}

impl WgpuBackend {
    /// Name of the adapter driving the surface
    pub fn adapter_name(&self) -> String {
        self.adapter.get_info().name
    }
}
