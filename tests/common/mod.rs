//! Shared setup for the frame orchestrator tests.

use glam::UVec3;
use vox_dda::backend::{Call, DummyBackend};
use vox_dda::frame::{FrameBindings, FrameOrchestrator, FrameOutcome};
use vox_dda::pipeline::PipelineManager;
use vox_dda::scene::{CameraCommand, CameraController};
use vox_dda::voxel::VoxelVolume;

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

/// Edge length of the test voxel cube
pub const VOXELS: u32 = 8;

/// Orchestrator over a [`DummyBackend`] plus a camera sized to the surface
pub struct TestRig {
    pub orchestrator: FrameOrchestrator<DummyBackend>,
    pub camera: CameraController,
    pub volume: VoxelVolume,
}

impl TestRig {
    pub fn new(accumulation: bool) -> Self {
        Self::with_backend(DummyBackend::new(WIDTH, HEIGHT), accumulation)
    }

    pub fn with_backend(mut backend: DummyBackend, accumulation: bool) -> Self {
        let (_, layout, pipeline) =
            PipelineManager::new(&mut backend, None, accumulation).expect("embedded shader");
        let volume = VoxelVolume::generate(UVec3::splat(VOXELS)).expect("voxel volume");
        let orchestrator =
            FrameOrchestrator::new(backend, &volume, layout, pipeline, accumulation)
                .expect("startup");

        let mut camera = CameraController::new();
        let (width, height) = orchestrator.extent();
        camera.apply_command(CameraCommand::SetViewport { width, height });

        Self {
            orchestrator,
            camera,
            volume,
        }
    }

    pub fn render(&mut self) -> FrameOutcome {
        self.orchestrator
            .render_frame(&mut self.camera)
            .expect("frame")
    }

    /// Run one frame step by step, returning what was bound and how it ended
    pub fn render_traced(&mut self) -> (Option<FrameBindings>, bool, FrameOutcome) {
        let Some(mut ctx) = self
            .orchestrator
            .begin_frame(&mut self.camera)
            .expect("begin")
        else {
            return (None, false, FrameOutcome::Skipped);
        };
        self.orchestrator.dispatch(&mut ctx).expect("dispatch");
        let bindings = ctx.bindings;
        let uploaded = ctx.camera_uploaded;
        let outcome = self.orchestrator.end_frame(ctx).expect("end");
        (bindings, uploaded, outcome)
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        self.orchestrator.backend_mut().take_calls()
    }
}

/// Position of the first call matching `pred`
pub fn position(calls: &[Call], pred: impl Fn(&Call) -> bool) -> Option<usize> {
    calls.iter().position(pred)
}

pub fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|call| pred(call)).count()
}
