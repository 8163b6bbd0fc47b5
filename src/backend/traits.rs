//! Core backend abstraction traits
//!
//! The frame orchestrator only talks to the device through [`GraphicsBackend`].
//! Both the wgpu backend and the recording dummy backend implement it.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create bind group: {0}")]
    BindGroupCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Failed to record commands: {0}")]
    CommandRecordingFailed(String),
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),
    #[error("Resource id {0} does not fit a 32-bit shader handle")]
    HandleOverflow(u64),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

macro_rules! resource_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Raw backend id, stable for the lifetime of the resource
            pub fn id(&self) -> u64 {
                self.0
            }
        }
    };
}

resource_handle!(
    /// Handle to a GPU buffer
    BufferHandle
);
resource_handle!(
    /// Handle to a GPU texture
    TextureHandle
);
resource_handle!(
    /// Handle to a texture view
    TextureViewHandle
);
resource_handle!(
    /// Handle to a compute pipeline
    ComputePipelineHandle
);
resource_handle!(
    /// Handle to a bind group
    BindGroupHandle
);
resource_handle!(
    /// Handle to a bind group layout
    BindGroupLayoutHandle
);

/// Monotonic serial of a queue submission.
///
/// Serial 0 means "nothing submitted yet"; every completed submission has a
/// serial less than or equal to [`GraphicsBackend::completed_submission`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubmissionIndex(pub u64);

/// Bind group entry for creating bind groups
#[derive(Debug, Clone, PartialEq)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    StorageTexture(TextureViewHandle),
}

/// Bind group layout entry
#[derive(Debug, Clone)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const COMPUTE: Self = Self(1 << 2);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// Binding type
#[derive(Debug, Clone, PartialEq)]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture { sample_type: TextureSampleType },
    StorageTexture { format: TextureFormat },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Uint,
}

/// Compute pipeline descriptor
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    pub label: Option<String>,
    pub shader: String,
    pub entry_point: String,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

/// Presentable image handed out by [`GraphicsBackend::acquire_image`].
///
/// The view is only valid until the image is presented or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquiredImage {
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Resize the swapchain
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Get the swapchain format
    fn swapchain_format(&self) -> TextureFormat;

    // Presentation

    /// Acquire the next presentable image.
    ///
    /// `Ok(None)` means no image is available right now (timeout, outdated or
    /// lost surface) and the caller should skip the frame and retry later.
    fn acquire_image(&mut self) -> BackendResult<Option<AcquiredImage>>;

    /// Present the currently acquired image
    fn present(&mut self) -> BackendResult<()>;

    /// Release the currently acquired image without presenting it
    fn discard_image(&mut self);

    // Command recording and submission

    /// Start recording a new command stream
    fn begin_commands(&mut self, label: Option<&str>);

    /// Drop the commands recorded since `begin_commands` without submitting
    fn discard_commands(&mut self);

    /// Record a buffer to buffer copy
    fn copy_buffer_to_buffer(
        &mut self,
        src: BufferHandle,
        dst: BufferHandle,
        size: u64,
    ) -> BackendResult<()>;

    /// Submit the recorded command stream
    fn submit(&mut self) -> BackendResult<SubmissionIndex>;

    /// Latest submission known to have finished on the device
    fn completed_submission(&mut self) -> SubmissionIndex;

    /// Block until every submitted command stream has finished
    fn wait_idle(&mut self) -> BackendResult<()>;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Address the shader uses to reach the buffer.
    ///
    /// Backends without buffer device addresses return an opaque per-buffer id.
    fn buffer_device_address(&self, buffer: BufferHandle) -> u64;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Create a texture view
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    // Pipeline creation

    /// Create a bind group layout
    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    /// Create a bind group
    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    /// Create a compute pipeline
    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle>;

    // Compute pass recording

    /// Begin a compute pass
    fn begin_compute_pass(&mut self, label: Option<&str>);

    /// End the current compute pass
    fn end_compute_pass(&mut self);

    /// Set the compute pipeline
    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);

    /// Set a bind group
    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    /// Dispatch compute work
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy a texture view
    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    /// Destroy a bind group
    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    /// Destroy a bind group layout
    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle);

    /// Destroy a compute pipeline
    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle);
}
