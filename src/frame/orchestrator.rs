//! Frame orchestrator: persistent resources and the per-frame sequence

use crate::backend::{
    BackendError, BackendResult, BindGroupEntry, BindGroupLayoutHandle, BufferDescriptor,
    BufferHandle, BufferUsage, ComputePipelineHandle, GraphicsBackend, SubmissionIndex,
    TextureViewHandle,
};
use crate::pipeline::ReloadOutcome;
use crate::scene::{CameraCommand, CameraController, CameraViewData, FrameSlot};
use crate::voxel::VoxelVolume;

use super::resources::{
    AccumulationPair, DeferredDestructor, DeferredResource, GpuResource, ResourceRegistry,
    ResourceRole,
};
use super::{
    dispatch_size, FrameBindings, FrameContext, FrameOutcome, FramePush, FLAG_ACCUMULATE,
    FLAG_HISTORY_VALID,
};

pub const VOXEL_BUFFER: &str = "voxel_volume";
pub const CAMERA_BUFFER: &str = "camera_view";
pub const FRAME_CONSTANTS_BUFFER: &str = "frame_constants";
pub const SWAPCHAIN: &str = "swapchain";

/// Binding slots of the ray-march bind group
pub mod bindings {
    pub const FRAME_CONSTANTS: u32 = 0;
    pub const CAMERA: u32 = 1;
    pub const VOXELS: u32 = 2;
    pub const OUTPUT: u32 = 3;
    pub const ACCUM_PREVIOUS: u32 = 4;
    pub const ACCUM_CURRENT: u32 = 5;
}

/// 32-bit image handle written into [`FramePush`]
fn shader_handle(view: TextureViewHandle) -> BackendResult<u32> {
    u32::try_from(view.id()).map_err(|_| BackendError::HandleOverflow(view.id()))
}

/// Owns the persistent GPU resources and runs acquire, upload, dispatch and present.
///
/// The swapchain image is refreshed from the backend on every acquire and is
/// never cached beyond the [`FrameContext`] of the frame that acquired it.
pub struct FrameOrchestrator<B: GraphicsBackend> {
    backend: B,
    registry: ResourceRegistry,
    garbage: DeferredDestructor,

    layout: BindGroupLayoutHandle,
    pipeline: ComputePipelineHandle,

    voxel_buffer: BufferHandle,
    camera_buffer: BufferHandle,
    frame_constants_buffer: BufferHandle,
    accumulation_enabled: bool,
    accumulation: Option<AccumulationPair>,

    slot: FrameSlot,
    frame_index: u64,
    /// Frames presented since the accumulation history was last invalidated
    history_frames: u64,
    last_camera: Option<CameraViewData>,
    swapchain_epoch: u64,
    extent: (u32, u32),
    pending_resize: Option<(u32, u32)>,
    last_submission: SubmissionIndex,
}

impl<B: GraphicsBackend> FrameOrchestrator<B> {
    /// Create the persistent resources and upload the voxel volume.
    ///
    /// Takes ownership of `layout` and `pipeline`. The voxel upload is the
    /// only startup transfer and is waited on before this returns.
    pub fn new(
        backend: B,
        volume: &VoxelVolume,
        layout: BindGroupLayoutHandle,
        pipeline: ComputePipelineHandle,
        accumulation: bool,
    ) -> BackendResult<Self> {
        let extent = backend.surface_size();
        let mut orchestrator = Self {
            backend,
            registry: ResourceRegistry::default(),
            garbage: DeferredDestructor::new(),
            layout,
            pipeline,
            voxel_buffer: BufferHandle(0),
            camera_buffer: BufferHandle(0),
            frame_constants_buffer: BufferHandle(0),
            accumulation_enabled: accumulation,
            accumulation: None,
            slot: FrameSlot::default(),
            frame_index: 0,
            history_frames: 0,
            last_camera: None,
            swapchain_epoch: 0,
            extent,
            pending_resize: None,
            last_submission: SubmissionIndex::default(),
        };

        if let Err(err) = orchestrator.startup(volume) {
            log::error!("Renderer startup failed: {}", err);
            orchestrator.release_all();
            return Err(err);
        }
        Ok(orchestrator)
    }

    fn startup(&mut self, volume: &VoxelVolume) -> BackendResult<()> {
        let bytes = volume.to_bytes();
        let staging = self
            .backend
            .create_buffer_init(&BufferDescriptor::staging("voxel staging", bytes.len() as u64), &bytes)?;
        let uploaded = self.upload_voxels(staging, bytes.len() as u64);
        self.backend.destroy_buffer(staging);
        uploaded?;

        self.camera_buffer = self.backend.create_buffer(&BufferDescriptor {
            label: Some(CAMERA_BUFFER.to_string()),
            size: CameraViewData::SIZE,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        self.registry.register(
            CAMERA_BUFFER,
            ResourceRole::PerFrameWritable,
            GpuResource::Buffer(self.camera_buffer),
        );

        self.frame_constants_buffer = self.backend.create_buffer(&BufferDescriptor {
            label: Some(FRAME_CONSTANTS_BUFFER.to_string()),
            size: FramePush::SIZE,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        self.registry.register(
            FRAME_CONSTANTS_BUFFER,
            ResourceRole::PerFrameWritable,
            GpuResource::Buffer(self.frame_constants_buffer),
        );

        self.registry
            .register(SWAPCHAIN, ResourceRole::SwapchainBacked, GpuResource::Swapchain);

        if self.accumulation_enabled {
            let (width, height) = self.extent;
            self.accumulation = Some(AccumulationPair::create(
                &mut self.backend,
                &mut self.registry,
                width,
                height,
            )?);
        }

        log::info!(
            "Frame orchestrator ready: {}x{}, accumulation {}",
            self.extent.0,
            self.extent.1,
            if self.accumulation_enabled { "on" } else { "off" }
        );
        Ok(())
    }

    fn upload_voxels(&mut self, staging: BufferHandle, size: u64) -> BackendResult<()> {
        self.voxel_buffer = self.backend.create_buffer(&BufferDescriptor {
            label: Some(VOXEL_BUFFER.to_string()),
            size,
            usage: BufferUsage::STORAGE | BufferUsage::COPY_DST,
        })?;
        self.registry.register(
            VOXEL_BUFFER,
            ResourceRole::StaticInput,
            GpuResource::Buffer(self.voxel_buffer),
        );

        self.backend.begin_commands(Some("startup upload"));
        if let Err(err) = self
            .backend
            .copy_buffer_to_buffer(staging, self.voxel_buffer, size)
        {
            self.backend.discard_commands();
            return Err(err);
        }
        self.last_submission = self.backend.submit()?;
        self.backend.wait_idle()?;
        log::info!("Uploaded voxel volume ({} bytes)", size);
        Ok(())
    }

    /// Collect garbage, apply a pending resize, acquire an image and upload
    /// the camera if the current slot is stale.
    ///
    /// Returns `Ok(None)` when the frame should be skipped.
    pub fn begin_frame(
        &mut self,
        camera: &mut CameraController,
    ) -> BackendResult<Option<FrameContext>> {
        self.collect_garbage();

        if let Some((width, height)) = self.pending_resize {
            if width == 0 || height == 0 {
                log::debug!("Viewport is {}x{}, skipping frame", width, height);
                return Ok(None);
            }
            self.apply_resize(width, height, camera)?;
        }

        let Some(image) = self.backend.acquire_image()? else {
            log::debug!("No swapchain image available, skipping frame");
            return Ok(None);
        };

        let mut ctx = FrameContext {
            width: image.width,
            height: image.height,
            frame_index: self.frame_index,
            image,
            swapchain_epoch: self.swapchain_epoch,
            bindings: None,
            camera_uploaded: false,
            transients: Vec::new(),
        };

        self.backend.begin_commands(Some("frame"));

        if camera.is_slot_dirty(self.slot) {
            if let Err(err) = self.upload_camera(&mut ctx, camera) {
                self.abort_frame(ctx);
                return Err(err);
            }
        }
        self.slot = camera.advance_slot(self.slot);

        Ok(Some(ctx))
    }

    fn upload_camera(
        &mut self,
        ctx: &mut FrameContext,
        camera: &CameraController,
    ) -> BackendResult<()> {
        let data = camera.camera_view(true);
        let staging = self.backend.create_buffer_init(
            &BufferDescriptor::staging("camera staging", CameraViewData::SIZE),
            bytemuck::bytes_of(&data),
        )?;
        ctx.transients.push(DeferredResource::Buffer(staging));
        self.backend
            .copy_buffer_to_buffer(staging, self.camera_buffer, CameraViewData::SIZE)?;
        ctx.camera_uploaded = true;
        if self.last_camera != Some(data) {
            self.history_frames = 0;
            self.last_camera = Some(data);
        }
        log::trace!(
            "Camera uploaded for slot {} (frame {})",
            self.slot.index(),
            ctx.frame_index
        );
        Ok(())
    }

    /// Record the ray-march dispatch over the frame's image
    pub fn dispatch(&mut self, ctx: &mut FrameContext) -> BackendResult<()> {
        let history_valid = self.history_frames > 0;
        let accumulation = self.accumulation.map(|pair| pair.roles(ctx.frame_index));

        let mut flags = 0;
        if accumulation.is_some() {
            flags |= FLAG_ACCUMULATE;
            if history_valid {
                flags |= FLAG_HISTORY_VALID;
            }
        }

        let push = FramePush {
            camera_view: self.backend.buffer_device_address(self.camera_buffer),
            resolution: [ctx.width, ctx.height],
            frame_index: ctx.frame_index,
            flags,
            image: shader_handle(ctx.image.view)?,
            voxels: self.backend.buffer_device_address(self.voxel_buffer),
            accum_previous: accumulation
                .map_or(Ok(0), |(previous, _)| shader_handle(previous.view))?,
            accum_current: accumulation.map_or(Ok(0), |(_, current)| shader_handle(current.view))?,
        };

        let staging = self.backend.create_buffer_init(
            &BufferDescriptor::staging("frame constants staging", FramePush::SIZE),
            bytemuck::bytes_of(&push),
        )?;
        ctx.transients.push(DeferredResource::Buffer(staging));
        self.backend
            .copy_buffer_to_buffer(staging, self.frame_constants_buffer, FramePush::SIZE)?;

        let mut entries = vec![
            (
                bindings::FRAME_CONSTANTS,
                BindGroupEntry::Buffer {
                    buffer: self.frame_constants_buffer,
                    offset: 0,
                    size: None,
                },
            ),
            (
                bindings::CAMERA,
                BindGroupEntry::Buffer {
                    buffer: self.camera_buffer,
                    offset: 0,
                    size: None,
                },
            ),
            (
                bindings::VOXELS,
                BindGroupEntry::Buffer {
                    buffer: self.voxel_buffer,
                    offset: 0,
                    size: None,
                },
            ),
            (bindings::OUTPUT, BindGroupEntry::StorageTexture(ctx.image.view)),
        ];
        if let Some((previous, current)) = accumulation {
            entries.push((bindings::ACCUM_PREVIOUS, BindGroupEntry::Texture(previous.view)));
            entries.push((bindings::ACCUM_CURRENT, BindGroupEntry::StorageTexture(current.view)));
        }

        let bind_group = self.backend.create_bind_group(self.layout, &entries)?;
        ctx.transients.push(DeferredResource::BindGroup(bind_group));

        let (x, y, z) = dispatch_size(ctx.width, ctx.height);
        self.backend.begin_compute_pass(Some("raymarch"));
        self.backend.set_compute_pipeline(self.pipeline);
        self.backend.set_bind_group(0, bind_group);
        self.backend.dispatch_compute(x, y, z);
        self.backend.end_compute_pass();

        ctx.bindings = Some(FrameBindings { bind_group, push });
        Ok(())
    }

    /// Submit and present, or discard the frame if the swapchain changed
    pub fn end_frame(&mut self, ctx: FrameContext) -> BackendResult<FrameOutcome> {
        if ctx.swapchain_epoch != self.swapchain_epoch || self.pending_resize.is_some() {
            log::debug!(
                "Discarding frame {}: swapchain changed after acquire",
                ctx.frame_index
            );
            self.abort_frame(ctx);
            return Ok(FrameOutcome::Discarded);
        }

        let submitted = self.backend.submit();
        let serial = match submitted {
            Ok(serial) => serial,
            Err(err) => {
                self.abort_frame(ctx);
                return Err(err);
            }
        };
        self.last_submission = serial;
        for resource in ctx.transients {
            self.garbage.queue(serial, resource);
        }

        self.backend.present()?;

        self.frame_index += 1;
        self.history_frames += 1;
        log::trace!("Presented frame {} (submission #{})", ctx.frame_index, serial.0);
        Ok(FrameOutcome::Presented)
    }

    /// Drop a frame that was never submitted
    fn abort_frame(&mut self, ctx: FrameContext) {
        self.backend.discard_commands();
        self.backend.discard_image();
        // Never submitted, so nothing on the device references these
        for resource in ctx.transients {
            resource.destroy(&mut self.backend);
        }
    }

    /// Run one full iteration: acquire, upload, dispatch, present
    pub fn render_frame(&mut self, camera: &mut CameraController) -> BackendResult<FrameOutcome> {
        let Some(mut ctx) = self.begin_frame(camera)? else {
            return Ok(FrameOutcome::Skipped);
        };
        if let Err(err) = self.dispatch(&mut ctx) {
            self.abort_frame(ctx);
            return Err(err);
        }
        self.end_frame(ctx)
    }

    /// Record a viewport change; it is applied before the next acquire
    pub fn request_resize(&mut self, width: u32, height: u32) {
        log::debug!("Resize requested: {}x{}", width, height);
        self.pending_resize = Some((width, height));
    }

    fn apply_resize(
        &mut self,
        width: u32,
        height: u32,
        camera: &mut CameraController,
    ) -> BackendResult<()> {
        self.pending_resize = None;
        self.backend.resize(width, height);
        self.extent = self.backend.surface_size();
        self.swapchain_epoch += 1;
        self.history_frames = 0;

        if self.accumulation_enabled {
            // Older frames may still read the old pair
            for old in self.registry.remove_role(ResourceRole::AccumulationTarget) {
                if let GpuResource::Image { texture, view } = old.resource {
                    self.garbage
                        .queue(self.last_submission, DeferredResource::Image { texture, view });
                }
            }
            self.accumulation = None;
            let (width, height) = self.extent;
            self.accumulation = Some(AccumulationPair::create(
                &mut self.backend,
                &mut self.registry,
                width,
                height,
            )?);
        }

        camera.apply_command(CameraCommand::SetViewport {
            width: self.extent.0,
            height: self.extent.1,
        });
        log::info!("Swapchain resized to {}x{}", self.extent.0, self.extent.1);
        Ok(())
    }

    /// Apply the outcome of a pipeline reload
    pub fn handle_reload(&mut self, outcome: ReloadOutcome) {
        match outcome {
            ReloadOutcome::Unchanged => {}
            ReloadOutcome::Succeeded(pipeline) => {
                let previous = std::mem::replace(&mut self.pipeline, pipeline);
                self.garbage
                    .queue(self.last_submission, DeferredResource::ComputePipeline(previous));
                self.history_frames = 0;
                log::info!("Ray-march pipeline reloaded");
            }
            ReloadOutcome::Failed(err) => {
                log::error!("Shader reload failed, keeping previous pipeline: {}", err);
            }
        }
    }

    /// Destroy transients whose submissions have completed
    pub fn collect_garbage(&mut self) -> usize {
        let completed = self.backend.completed_submission();
        self.garbage.collect(&mut self.backend, completed)
    }

    /// Wait for the device, then destroy every resource in reverse creation order.
    ///
    /// Resources are released even when the wait fails. On success the
    /// backend is handed back so the caller decides when the device goes away.
    pub fn shutdown(mut self) -> BackendResult<B> {
        let waited = self.backend.wait_idle();
        if let Err(err) = &waited {
            log::error!("Wait for idle failed during shutdown: {}", err);
        }
        self.release_all();
        log::info!("Frame orchestrator shut down after {} frames", self.frame_index);
        waited.map(|()| self.backend)
    }

    fn release_all(&mut self) {
        self.garbage.flush(&mut self.backend);
        self.registry.destroy_all(&mut self.backend);
        self.accumulation = None;
        self.backend.destroy_compute_pipeline(self.pipeline);
        self.backend.destroy_bind_group_layout(self.layout);
    }

    pub fn current_slot(&self) -> FrameSlot {
        self.slot
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn extent(&self) -> (u32, u32) {
        self.extent
    }

    pub fn swapchain_epoch(&self) -> u64 {
        self.swapchain_epoch
    }

    pub fn active_pipeline(&self) -> ComputePipelineHandle {
        self.pipeline
    }

    pub fn voxel_buffer(&self) -> BufferHandle {
        self.voxel_buffer
    }

    pub fn camera_buffer(&self) -> BufferHandle {
        self.camera_buffer
    }

    pub fn accumulation(&self) -> Option<&AccumulationPair> {
        self.accumulation.as_ref()
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn pending_garbage(&self) -> usize {
        self.garbage.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
