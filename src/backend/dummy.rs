//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. It keeps buffer
//! contents in host memory, records every call in a log and lets tests script
//! the awkward parts of a real device: empty acquires, submissions that stay
//! in flight for a while, pipeline failures and device loss.

use std::collections::{HashMap, HashSet};

use crate::backend::traits::*;
use crate::backend::types::*;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Resize { width: u32, height: u32 },
    Acquire { view: Option<TextureViewHandle> },
    Present,
    DiscardImage,
    BeginCommands,
    DiscardCommands,
    CopyBuffer { src: BufferHandle, dst: BufferHandle, size: u64 },
    Submit(SubmissionIndex),
    WaitIdle,
    CreateBuffer { handle: BufferHandle, label: Option<String>, size: u64 },
    CreateTexture { handle: TextureHandle, label: Option<String>, width: u32, height: u32 },
    CreateTextureView { handle: TextureViewHandle },
    CreateBindGroupLayout { handle: BindGroupLayoutHandle },
    CreateBindGroup { handle: BindGroupHandle, entries: Vec<(u32, BindGroupEntry)> },
    CreateComputePipeline { handle: ComputePipelineHandle, entry_point: String },
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    Dispatch { x: u32, y: u32, z: u32 },
    DestroyBuffer(BufferHandle),
    DestroyTexture(TextureHandle),
    DestroyTextureView(TextureViewHandle),
    DestroyBindGroup(BindGroupHandle),
    DestroyBindGroupLayout(BindGroupLayoutHandle),
    DestroyComputePipeline(ComputePipelineHandle),
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    surface_size: (u32, u32),
    format: TextureFormat,
    calls: Vec<Call>,
    next_id: u64,

    buffers: HashMap<u64, Vec<u8>>,
    textures: HashSet<u64>,
    texture_views: HashSet<u64>,
    bind_group_layouts: HashSet<u64>,
    bind_groups: HashSet<u64>,
    compute_pipelines: HashSet<u64>,
    invalid_destroys: usize,

    recording: bool,
    acquired: Option<TextureViewHandle>,
    empty_acquires: usize,
    fail_pipelines: usize,
    device_lost: bool,

    last_submission: u64,
    completed_submission: u64,
    completion_lag: u64,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new(800, 600)
    }
}

impl DummyBackend {
    /// Create a new dummy backend with the given surface size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            surface_size: (width, height),
            format: TextureFormat::Rgba8Unorm,
            calls: Vec::new(),
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashSet::new(),
            texture_views: HashSet::new(),
            bind_group_layouts: HashSet::new(),
            bind_groups: HashSet::new(),
            compute_pipelines: HashSet::new(),
            invalid_destroys: 0,
            recording: false,
            acquired: None,
            empty_acquires: 0,
            fail_pipelines: 0,
            device_lost: false,
            last_submission: 0,
            completed_submission: 0,
            completion_lag: 0,
        }
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Drain the call log.
    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    /// The next `count` acquires report no image.
    pub fn script_empty_acquires(&mut self, count: usize) {
        self.empty_acquires += count;
    }

    /// The next `count` pipeline creations fail.
    pub fn script_pipeline_failures(&mut self, count: usize) {
        self.fail_pipelines = count;
    }

    /// Submissions complete only after `lag` newer submissions were made.
    pub fn set_completion_lag(&mut self, lag: u64) {
        self.completion_lag = lag;
    }

    /// Hand out handle ids starting at `id` from now on.
    pub fn skip_ids_to(&mut self, id: u64) {
        self.next_id = self.next_id.max(id);
    }

    /// Simulate the device going away.
    pub fn lose_device(&mut self) {
        self.device_lost = true;
    }

    /// Host copy of a live buffer's contents.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    pub fn is_buffer_alive(&self, buffer: BufferHandle) -> bool {
        self.buffers.contains_key(&buffer.0)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_texture_views(&self) -> usize {
        self.texture_views.len()
    }

    pub fn live_bind_groups(&self) -> usize {
        self.bind_groups.len()
    }

    pub fn live_compute_pipelines(&self) -> usize {
        self.compute_pipelines.len()
    }

    /// Destroy calls that named an unknown or already destroyed resource.
    pub fn invalid_destroys(&self) -> usize {
        self.invalid_destroys
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn check_device(&self) -> BackendResult<()> {
        if self.device_lost {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn note_destroy(&mut self, removed: bool, what: &str, id: u64) {
        if removed {
            log::trace!("DummyBackend: destroyed {} #{}", what, id);
        } else {
            log::warn!("DummyBackend: destroying unknown {} #{}", what, id);
            self.invalid_destroys += 1;
        }
    }

    fn advance_completion(&mut self) {
        let done = self.last_submission.saturating_sub(self.completion_lag);
        self.completed_submission = self.completed_submission.max(done);
    }
}

impl GraphicsBackend for DummyBackend {
    fn resize(&mut self, width: u32, height: u32) {
        log::trace!("DummyBackend: resize {}x{}", width, height);
        if width > 0 && height > 0 {
            self.surface_size = (width, height);
        }
        self.calls.push(Call::Resize { width, height });
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    fn swapchain_format(&self) -> TextureFormat {
        self.format
    }

    fn acquire_image(&mut self) -> BackendResult<Option<AcquiredImage>> {
        self.check_device()?;
        if self.empty_acquires > 0 {
            self.empty_acquires -= 1;
            self.calls.push(Call::Acquire { view: None });
            return Ok(None);
        }

        let view = TextureViewHandle(self.allocate_id());
        self.texture_views.insert(view.0);
        self.acquired = Some(view);
        self.calls.push(Call::Acquire { view: Some(view) });

        let (width, height) = self.surface_size;
        Ok(Some(AcquiredImage {
            view,
            width,
            height,
        }))
    }

    fn present(&mut self) -> BackendResult<()> {
        let view = self
            .acquired
            .take()
            .ok_or_else(|| BackendError::PresentFailed("No image acquired".into()))?;
        self.texture_views.remove(&view.0);
        self.calls.push(Call::Present);
        Ok(())
    }

    fn discard_image(&mut self) {
        if let Some(view) = self.acquired.take() {
            self.texture_views.remove(&view.0);
        }
        self.calls.push(Call::DiscardImage);
    }

    fn begin_commands(&mut self, _label: Option<&str>) {
        self.recording = true;
        self.calls.push(Call::BeginCommands);
    }

    fn discard_commands(&mut self) {
        self.recording = false;
        self.calls.push(Call::DiscardCommands);
    }

    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> BackendResult<()> {
        if !self.recording {
            return Err(BackendError::CommandRecordingFailed("No command encoder".into()));
        }
        let data = self
            .buffers
            .get(&src.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", src)))?
            .get(..size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| BackendError::CommandRecordingFailed("Copy exceeds source".into()))?;
        let target = self
            .buffers
            .get_mut(&dst.0)
            .ok_or_else(|| BackendError::ResourceNotFound(format!("{:?}", dst)))?;
        let region = target
            .get_mut(..data.len())
            .ok_or_else(|| BackendError::CommandRecordingFailed("Copy exceeds target".into()))?;
        // Applied at record time; tests only inspect contents after submit
        region.copy_from_slice(&data);

        self.calls.push(Call::CopyBuffer { src, dst, size });
        Ok(())
    }

    fn submit(&mut self) -> BackendResult<SubmissionIndex> {
        self.check_device()?;
        self.recording = false;
        self.last_submission += 1;
        self.advance_completion();
        let index = SubmissionIndex(self.last_submission);
        self.calls.push(Call::Submit(index));
        Ok(index)
    }

    fn completed_submission(&mut self) -> SubmissionIndex {
        SubmissionIndex(self.completed_submission)
    }

    fn wait_idle(&mut self) -> BackendResult<()> {
        self.completed_submission = self.last_submission;
        self.calls.push(Call::WaitIdle);
        self.check_device()
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        self.check_device()?;
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let handle = BufferHandle(self.allocate_id());
        self.buffers.insert(handle.0, vec![0; desc.size as usize]);
        self.calls.push(Call::CreateBuffer {
            handle,
            label: desc.label.clone(),
            size: desc.size,
        });
        Ok(handle)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        if let Some(contents) = self.buffers.get_mut(&handle.0) {
            let len = data.len().min(contents.len());
            contents[..len].copy_from_slice(&data[..len]);
        }
        Ok(handle)
    }

    fn buffer_device_address(&self, buffer: BufferHandle) -> u64 {
        0x1000_0000 + buffer.0
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.check_device()?;
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let handle = TextureHandle(self.allocate_id());
        self.textures.insert(handle.0);
        self.calls.push(Call::CreateTexture {
            handle,
            label: desc.label.clone(),
            width: desc.width,
            height: desc.height,
        });
        Ok(handle)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains(&texture.0) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let handle = TextureViewHandle(self.allocate_id());
        self.texture_views.insert(handle.0);
        self.calls.push(Call::CreateTextureView { handle });
        Ok(handle)
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let handle = BindGroupLayoutHandle(self.allocate_id());
        self.bind_group_layouts.insert(handle.0);
        self.calls.push(Call::CreateBindGroupLayout { handle });
        Ok(handle)
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if !self.bind_group_layouts.contains(&layout.0) {
            return Err(BackendError::PipelineCreationFailed("Layout not found".into()));
        }
        for (_, entry) in entries {
            let alive = match entry {
                BindGroupEntry::Buffer { buffer, .. } => self.buffers.contains_key(&buffer.0),
                BindGroupEntry::Texture(view) | BindGroupEntry::StorageTexture(view) => {
                    self.texture_views.contains(&view.0)
                }
            };
            if !alive {
                return Err(BackendError::ResourceNotFound(format!("{:?}", entry)));
            }
        }
        let handle = BindGroupHandle(self.allocate_id());
        self.bind_groups.insert(handle.0);
        self.calls.push(Call::CreateBindGroup {
            handle,
            entries: entries.to_vec(),
        });
        Ok(handle)
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        if self.fail_pipelines > 0 {
            self.fail_pipelines -= 1;
            return Err(BackendError::PipelineCreationFailed(format!(
                "scripted failure for {:?}",
                desc.label
            )));
        }
        let handle = ComputePipelineHandle(self.allocate_id());
        self.compute_pipelines.insert(handle.0);
        self.calls.push(Call::CreateComputePipeline {
            handle,
            entry_point: desc.entry_point.clone(),
        });
        Ok(handle)
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        log::trace!("DummyBackend: begin compute pass {:?}", label);
    }

    fn end_compute_pass(&mut self) {}

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.calls.push(Call::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.calls.push(Call::SetBindGroup { index, bind_group });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.calls.push(Call::Dispatch { x, y, z });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        let removed = self.buffers.remove(&buffer.0).is_some();
        self.note_destroy(removed, "buffer", buffer.0);
        self.calls.push(Call::DestroyBuffer(buffer));
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let removed = self.textures.remove(&texture.0);
        self.note_destroy(removed, "texture", texture.0);
        self.calls.push(Call::DestroyTexture(texture));
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        let removed = self.texture_views.remove(&view.0);
        self.note_destroy(removed, "texture view", view.0);
        self.calls.push(Call::DestroyTextureView(view));
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        let removed = self.bind_groups.remove(&bind_group.0);
        self.note_destroy(removed, "bind group", bind_group.0);
        self.calls.push(Call::DestroyBindGroup(bind_group));
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        let removed = self.bind_group_layouts.remove(&layout.0);
        self.note_destroy(removed, "bind group layout", layout.0);
        self.calls.push(Call::DestroyBindGroupLayout(layout));
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        let removed = self.compute_pipelines.remove(&pipeline.0);
        self.note_destroy(removed, "compute pipeline", pipeline.0);
        self.calls.push(Call::DestroyComputePipeline(pipeline));
    }
}
