//! VOX DDA - a real-time voxel ray-marcher
//!
//! A compute shader marches one ray per pixel through a static voxel volume
//! and writes straight into the presentable image. The host side is small:
//!
//! - [`scene::CameraController`] turns input into camera state and tracks,
//!   per frame-in-flight slot, whether the GPU copy is stale
//! - [`frame::FrameOrchestrator`] owns the persistent GPU resources and runs
//!   acquire, upload, dispatch and present once per loop iteration
//! - [`pipeline::PipelineManager`] builds the compute pipeline and rebuilds it
//!   when the shader file changes on disk
//!
//! Rendering goes through the [`backend::GraphicsBackend`] trait. The wgpu
//! backend drives real hardware; [`backend::DummyBackend`] records calls for
//! tests.

use std::path::PathBuf;

pub mod app;
pub mod backend;
pub mod frame;
pub mod pipeline;
pub mod scene;
pub mod voxel;
pub mod window;

pub use app::{run, AppError};
pub use backend::WgpuBackend;
pub use frame::{FrameOrchestrator, FrameOutcome};
pub use pipeline::{PipelineManager, ReloadOutcome};
pub use scene::{CameraCommand, CameraController};
pub use window::{InputAction, InputMapper, Window};

/// Frames the CPU may record ahead of the GPU
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Startup parameters of the renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Window title; the frame rate is appended at runtime
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Blend each frame with the previous one while the camera is still
    pub accumulation: bool,
    /// WGSL file watched for hot reload; `None` uses the embedded shader
    pub shader_path: Option<PathBuf>,
    /// Edge length of the generated voxel cube, at most [`voxel::MAX_EDGE`]
    pub voxel_size: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            title: "VOX DDA".to_string(),
            width: 860,
            height: 640,
            vsync: true,
            accumulation: true,
            shader_path: Some(
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("shaders/raymarch.wgsl"),
            ),
            voxel_size: 64,
        }
    }
}
