//! Application loop: window, wgpu backend and the frame orchestrator

use glam::UVec3;
use thiserror::Error;
use winit::{
    event::Event,
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
};

use crate::backend::{BackendError, GraphicsBackend, WgpuBackend};
use crate::frame::{FrameOrchestrator, FrameOutcome};
use crate::pipeline::PipelineManager;
use crate::scene::{CameraCommand, CameraController};
use crate::voxel::{VoxelError, VoxelVolume};
use crate::window::{FpsCounter, InputAction, InputMapper, Window};
use crate::RendererConfig;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Event loop error: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),

    #[error("Window creation failed: {0}")]
    Window(#[from] winit::error::OsError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Voxel(#[from] VoxelError),
}

/// Open a window and render until it is closed or the device fails.
///
/// The device is drained before returning in both cases. If the drain fails
/// after a device error, the device error is the one reported.
pub fn run(config: RendererConfig) -> Result<(), AppError> {
    let volume = VoxelVolume::generate(UVec3::splat(config.voxel_size))?;
    log::info!(
        "Generated {}^3 voxel volume, {} filled",
        config.voxel_size,
        volume.filled_count()
    );

    let event_loop = EventLoop::new()?;
    let window = Window::new(&event_loop, &config.title, config.width, config.height)?;

    let mut backend = WgpuBackend::new(window.window_arc(), window.dimensions(), config.vsync)?;
    log::info!(
        "Using {} ({:?} swapchain)",
        backend.adapter_name(),
        backend.swapchain_format()
    );

    let (mut pipelines, layout, pipeline) =
        PipelineManager::new(&mut backend, config.shader_path.clone(), config.accumulation)?;

    let mut orchestrator =
        FrameOrchestrator::new(backend, &volume, layout, pipeline, config.accumulation)?;

    let mut camera = CameraController::new();
    let (width, height) = orchestrator.extent();
    camera.apply_command(CameraCommand::SetViewport { width, height });

    let mut input = InputMapper::new();
    let mut fps = FpsCounter::default();
    let mut failure: Option<BackendError> = None;

    let looped = event_loop.run(|event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => match input.map_event(&event) {
                Some(InputAction::Camera(command)) => camera.apply_command(command),
                Some(InputAction::Resize { width, height }) => {
                    orchestrator.request_resize(width, height)
                }
                Some(InputAction::Close) => elwt.exit(),
                None => {}
            },
            Event::AboutToWait => {
                let reloaded = pipelines.reload_all(orchestrator.backend_mut());
                orchestrator.handle_reload(reloaded);

                match orchestrator.render_frame(&mut camera) {
                    Ok(FrameOutcome::Presented) => {
                        if let Some(rate) = fps.tick() {
                            window.show_fps(rate);
                        }
                    }
                    Ok(FrameOutcome::Skipped | FrameOutcome::Discarded) => {}
                    Err(err) => {
                        log::error!("Frame failed: {}", err);
                        failure = Some(err);
                        elwt.exit();
                    }
                }
            }
            _ => {}
        }
    });

    let drained = orchestrator.shutdown();

    if let Some(err) = failure {
        if let Err(drain_err) = drained {
            log::error!("Drain after device failure also failed: {}", drain_err);
        }
        return Err(err.into());
    }
    looped?;
    drained?;
    Ok(())
}
