//! Frame-in-flight orchestration.
//!
//! [`FrameOrchestrator`] owns every persistent GPU resource of the renderer and
//! drives one frame per loop iteration:
//!
//! ```text
//! collect garbage -> apply resize -> acquire -> upload camera (if slot dirty)
//!     -> dispatch ray-march -> submit + present (or discard) -> advance slot
//! ```
//!
//! # Synchronization Model
//!
//! | Concern | Mechanism |
//! |---------|-----------|
//! | Upload before dispatch | Both recorded into one command stream, submitted once |
//! | Transient staging / bind groups | Destroyed once their submission completes |
//! | Camera freshness | Per-slot dirty flags, round-robin [`FrameSlot`](crate::scene::FrameSlot) |
//! | Accumulation | Two images whose read/write roles swap by frame parity |
//! | Resize | Applied before acquire; frames acquired earlier are discarded |
//!
//! The CPU only blocks twice: the startup upload and the shutdown drain.

mod orchestrator;
mod resources;

pub use orchestrator::*;
pub use resources::*;

use bytemuck::{Pod, Zeroable};

use crate::backend::{AcquiredImage, BindGroupHandle};

/// Compute workgroup footprint in pixels
pub const WORKGROUP_SIZE: (u32, u32) = (8, 4);

/// [`FramePush::flags`] bit: accumulation images are bound
pub const FLAG_ACCUMULATE: u32 = 1 << 0;
/// [`FramePush::flags`] bit: the "previous" accumulation image holds valid history
pub const FLAG_HISTORY_VALID: u32 = 1 << 1;

/// Per-frame constants read by the ray-marcher.
///
/// Device addresses are 64-bit; the shader sees them as `vec2<u32>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FramePush {
    pub camera_view: u64,
    pub resolution: [u32; 2],
    pub frame_index: u64,
    pub flags: u32,
    pub image: u32,
    pub voxels: u64,
    pub accum_previous: u32,
    pub accum_current: u32,
}

impl FramePush {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Number of workgroups covering a `width` x `height` image
pub fn dispatch_size(width: u32, height: u32) -> (u32, u32, u32) {
    (
        width.div_ceil(WORKGROUP_SIZE.0),
        height.div_ceil(WORKGROUP_SIZE.1),
        1,
    )
}

/// What was bound for a frame's dispatch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameBindings {
    pub bind_group: BindGroupHandle,
    pub push: FramePush,
}

/// State of one loop iteration between acquire and present.
///
/// Must be handed back to [`FrameOrchestrator::end_frame`]; it owns the
/// frame's transient allocations.
#[derive(Debug)]
pub struct FrameContext {
    pub width: u32,
    pub height: u32,
    pub frame_index: u64,
    pub image: AcquiredImage,
    /// Swapchain generation the image was acquired from
    pub swapchain_epoch: u64,
    pub bindings: Option<FrameBindings>,
    /// Whether this frame re-uploaded the camera
    pub camera_uploaded: bool,
    pub(crate) transients: Vec<DeferredResource>,
}

/// How a loop iteration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// No image was available, or the viewport is zero-sized
    Skipped,
    /// A resize arrived after acquire; nothing was submitted or presented
    Discarded,
}
