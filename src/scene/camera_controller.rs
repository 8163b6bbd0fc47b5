//! Camera controller
//!
//! Accumulates user input into a [`CameraPose`] and tracks, per
//! frame-in-flight slot, whether the camera data that slot last uploaded is
//! stale. The render loop owns the current [`FrameSlot`] and passes it in;
//! the controller only owns the dirty flags.
//!
//! Pose state changes only through [`CameraController::apply_command`].

use glam::{Quat, Vec2, Vec3};

use super::camera::{CameraMatrices, CameraPose, CameraViewData, Lens};
use crate::FRAMES_IN_FLIGHT;

/// Rotation in radians per pixel of cursor travel
pub const MOUSE_SENSITIVITY: f32 = 0.005;
/// Movement multiplier while boost is held
pub const BOOST_MULTIPLIER: f32 = 10.0;

/// Reject rotations that would leave forward this close to the up hint
const MAX_UP_ALIGNMENT: f32 = 0.999;

/// A single mutation request for the camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraCommand {
    MoveForward,
    MoveBackward,
    MoveLeft,
    MoveRight,
    MoveUp,
    MoveDown,
    /// Enable or disable the movement boost
    SetBoost(bool),
    /// Start of a drag: the next `Rotate` only records its position
    BeginRotate,
    /// Cursor position sample while rotating
    Rotate { x: f32, y: f32 },
    SetViewport { width: u32, height: u32 },
    SetFov(f32),
    SetSpeed(f32),
    /// Values outside [0, 5] and [0, 100] are clamped
    SetLens { defocus_angle: f32, focus_distance: f32 },
    /// Restore the initial pose
    Reset,
}

/// Index of a frame-in-flight slot in `0..FRAMES_IN_FLIGHT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub fn new(index: usize) -> Self {
        Self(index % FRAMES_IN_FLIGHT)
    }

    pub fn index(&self) -> usize {
        self.0
    }

    /// Following slot in round-robin order
    pub fn next(&self) -> Self {
        Self((self.0 + 1) % FRAMES_IN_FLIGHT)
    }
}

/// One "camera changed since this slot last uploaded" flag per slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtySlots {
    flags: [bool; FRAMES_IN_FLIGHT],
}

impl Default for DirtySlots {
    /// Every slot starts dirty so the first frame of each uploads
    fn default() -> Self {
        Self {
            flags: [true; FRAMES_IN_FLIGHT],
        }
    }
}

impl DirtySlots {
    pub fn mark_all(&mut self) {
        self.flags = [true; FRAMES_IN_FLIGHT];
    }

    pub fn is_dirty(&self, slot: FrameSlot) -> bool {
        self.flags[slot.index()]
    }

    /// Clear `slot` and return the slot that follows it
    pub fn consume(&mut self, slot: FrameSlot) -> FrameSlot {
        self.flags[slot.index()] = false;
        slot.next()
    }

    pub fn any_dirty(&self) -> bool {
        self.flags.iter().any(|dirty| *dirty)
    }
}

/// Free-fly camera driven by [`CameraCommand`]s.
///
/// - Move commands step along forward / right / up
/// - Rotate samples turn the view while a drag is active
/// - Boost multiplies movement by [`BOOST_MULTIPLIER`]
#[derive(Debug, Clone, Default)]
pub struct CameraController {
    pose: CameraPose,
    dirty: DirtySlots,
    boost: bool,
    /// Previous cursor sample of the current drag
    last_cursor: Option<Vec2>,
}

impl CameraController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a custom pose, all slots dirty
    pub fn with_pose(pose: CameraPose) -> Self {
        Self {
            pose,
            ..Self::default()
        }
    }

    pub fn pose(&self) -> &CameraPose {
        &self.pose
    }

    pub fn boost(&self) -> bool {
        self.boost
    }

    pub fn apply_command(&mut self, command: CameraCommand) {
        match command {
            CameraCommand::MoveForward => self.translate(self.pose.forward),
            CameraCommand::MoveBackward => self.translate(-self.pose.forward),
            CameraCommand::MoveRight => self.translate(self.pose.right()),
            CameraCommand::MoveLeft => self.translate(-self.pose.right()),
            CameraCommand::MoveUp => self.translate(self.pose.up()),
            CameraCommand::MoveDown => self.translate(-self.pose.up()),
            CameraCommand::SetBoost(enabled) => self.boost = enabled,
            CameraCommand::BeginRotate => self.last_cursor = None,
            CameraCommand::Rotate { x, y } => self.rotate_to(Vec2::new(x, y)),
            CameraCommand::SetViewport { width, height } => {
                if width == 0 || height == 0 {
                    log::trace!("Ignoring zero-sized viewport {}x{}", width, height);
                    return;
                }
                self.pose.width = width;
                self.pose.height = height;
                self.dirty.mark_all();
            }
            CameraCommand::SetFov(fov_degrees) => {
                self.pose.fov_degrees = fov_degrees;
                self.dirty.mark_all();
            }
            CameraCommand::SetSpeed(speed) => {
                self.pose.speed = speed;
                self.dirty.mark_all();
            }
            CameraCommand::SetLens {
                defocus_angle,
                focus_distance,
            } => {
                self.pose.lens = Lens::clamped(defocus_angle, focus_distance);
                self.dirty.mark_all();
            }
            CameraCommand::Reset => {
                let (width, height) = (self.pose.width, self.pose.height);
                self.pose = CameraPose {
                    width,
                    height,
                    ..CameraPose::default()
                };
                self.last_cursor = None;
                self.dirty.mark_all();
            }
        }
    }

    fn translate(&mut self, direction: Vec3) {
        let multiplier = if self.boost { BOOST_MULTIPLIER } else { 1.0 };
        self.pose.position += direction * self.pose.speed * multiplier;
        self.dirty.mark_all();
    }

    fn rotate_to(&mut self, cursor: Vec2) {
        let Some(last) = self.last_cursor.replace(cursor) else {
            return;
        };
        let delta = cursor - last;
        if delta == Vec2::ZERO {
            return;
        }

        let pitch = delta.y * MOUSE_SENSITIVITY;
        let yaw = delta.x * MOUSE_SENSITIVITY;
        let yaw_rotation = Quat::from_axis_angle(Vec3::Y, -yaw);

        let right = self.pose.forward.cross(Vec3::Y).normalize_or_zero();
        let rotation = if right == Vec3::ZERO {
            yaw_rotation
        } else {
            (Quat::from_axis_angle(right, -pitch) * yaw_rotation).normalize()
        };

        let mut forward = (rotation * self.pose.forward).normalize();
        if forward.dot(self.pose.up_hint).abs() > MAX_UP_ALIGNMENT {
            // Keep the yaw, drop the pitch that would flip the view over the pole
            if yaw == 0.0 {
                return;
            }
            forward = (yaw_rotation * self.pose.forward).normalize();
        }
        self.pose.forward = forward;
        self.dirty.mark_all();
    }

    /// Derive view/projection matrices and their inverses from the pose
    pub fn derive_matrices(&self, flip_vertical: bool) -> CameraMatrices {
        self.pose.matrices(flip_vertical)
    }

    /// GPU-side camera data for the current pose
    pub fn camera_view(&self, flip_vertical: bool) -> CameraViewData {
        CameraViewData::from(&self.derive_matrices(flip_vertical))
    }

    pub fn is_slot_dirty(&self, slot: FrameSlot) -> bool {
        self.dirty.is_dirty(slot)
    }

    /// Clear the dirty flag of `slot` and return the next slot
    pub fn advance_slot(&mut self, slot: FrameSlot) -> FrameSlot {
        self.dirty.consume(slot)
    }

    pub fn dirty_slots(&self) -> &DirtySlots {
        &self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::INITIAL_POSITION;
    use rstest::rstest;

    fn drain_all(controller: &mut CameraController) {
        let mut slot = FrameSlot::default();
        for _ in 0..FRAMES_IN_FLIGHT {
            slot = controller.advance_slot(slot);
        }
    }

    #[test]
    fn test_new_controller_is_dirty() {
        let controller = CameraController::new();
        for i in 0..FRAMES_IN_FLIGHT {
            assert!(controller.is_slot_dirty(FrameSlot::new(i)));
        }
    }

    #[rstest]
    #[case::forward_first([
        CameraCommand::MoveForward,
        CameraCommand::MoveForward,
        CameraCommand::MoveRight,
        CameraCommand::MoveUp,
    ])]
    #[case::right_first([
        CameraCommand::MoveRight,
        CameraCommand::MoveUp,
        CameraCommand::MoveForward,
        CameraCommand::MoveForward,
    ])]
    #[case::interleaved([
        CameraCommand::MoveForward,
        CameraCommand::MoveUp,
        CameraCommand::MoveRight,
        CameraCommand::MoveForward,
    ])]
    fn test_moves_sum_in_any_order(#[case] commands: [CameraCommand; 4]) {
        let mut controller = CameraController::new();
        for command in commands {
            controller.apply_command(command);
        }

        let pose = controller.pose();
        let expected =
            INITIAL_POSITION + 2.0 * 0.1 * pose.forward + 0.1 * pose.right() + 0.1 * pose.up();
        assert!(pose.position.abs_diff_eq(expected, 1e-6), "{:?}", pose.position);
    }

    #[test]
    fn test_boost_multiplies_step() {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::SetBoost(true));
        controller.apply_command(CameraCommand::MoveForward);
        let expected = INITIAL_POSITION + Vec3::Z * 0.1 * BOOST_MULTIPLIER;
        assert!(controller.pose().position.abs_diff_eq(expected, 1e-5));

        controller.apply_command(CameraCommand::SetBoost(false));
        controller.apply_command(CameraCommand::MoveBackward);
        let expected = expected - Vec3::Z * 0.1;
        assert!(controller.pose().position.abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_mutation_marks_every_slot_and_consume_clears_them() {
        let mut controller = CameraController::new();
        drain_all(&mut controller);
        assert!(!controller.dirty_slots().any_dirty());

        controller.apply_command(CameraCommand::MoveUp);
        for i in 0..FRAMES_IN_FLIGHT {
            assert!(controller.is_slot_dirty(FrameSlot::new(i)));
        }

        drain_all(&mut controller);
        assert!(!controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_advance_slot_round_robin() {
        let mut controller = CameraController::new();
        let mut slot = FrameSlot::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(slot.index());
            slot = controller.advance_slot(slot);
        }
        assert_eq!(seen, vec![0, 1, 2, 0]);
    }

    #[test]
    fn test_consume_only_clears_given_slot() {
        let mut controller = CameraController::new();
        let next = controller.advance_slot(FrameSlot::new(1));
        assert_eq!(next, FrameSlot::new(2));
        assert!(controller.is_slot_dirty(FrameSlot::new(0)));
        assert!(!controller.is_slot_dirty(FrameSlot::new(1)));
        assert!(controller.is_slot_dirty(FrameSlot::new(2)));
    }

    #[test]
    fn test_first_rotate_sample_sets_baseline() {
        let mut controller = CameraController::new();
        drain_all(&mut controller);

        controller.apply_command(CameraCommand::BeginRotate);
        controller.apply_command(CameraCommand::Rotate { x: 100.0, y: 100.0 });
        assert_eq!(controller.pose().forward, Vec3::Z);
        assert!(!controller.dirty_slots().any_dirty());

        controller.apply_command(CameraCommand::Rotate { x: 110.0, y: 100.0 });
        assert_ne!(controller.pose().forward, Vec3::Z);
        assert!((controller.pose().forward.length() - 1.0).abs() < 1e-5);
        assert!(controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_yaw_direction() {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::BeginRotate);
        controller.apply_command(CameraCommand::Rotate { x: 0.0, y: 0.0 });
        controller.apply_command(CameraCommand::Rotate { x: 100.0, y: 0.0 });

        // Yaw of -0.5 rad about +Y turns +Z towards -X
        let forward = controller.pose().forward;
        let expected = Vec3::new(-(0.5f32).sin(), 0.0, (0.5f32).cos());
        assert!(forward.abs_diff_eq(expected, 1e-5), "{:?}", forward);
    }

    #[test]
    fn test_pitch_never_reaches_pole() {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::BeginRotate);
        controller.apply_command(CameraCommand::Rotate { x: 0.0, y: 0.0 });
        for step in 1..200 {
            controller.apply_command(CameraCommand::Rotate {
                x: 0.0,
                y: step as f32 * 50.0,
            });
        }
        let pose = controller.pose();
        assert!(pose.forward.dot(pose.up_hint).abs() <= MAX_UP_ALIGNMENT);
        assert!(pose.right().length() > 0.5);
    }

    #[test]
    fn test_vertical_drag_at_pole_leaves_slots_clean() {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::BeginRotate);
        controller.apply_command(CameraCommand::Rotate { x: 0.0, y: 0.0 });
        // One-pixel steps cannot jump across the pole, so the view pins there
        for step in 1..400 {
            controller.apply_command(CameraCommand::Rotate {
                x: 0.0,
                y: step as f32,
            });
        }
        let forward = controller.pose().forward;
        assert!(forward.dot(Vec3::Y).abs() > 0.99);
        drain_all(&mut controller);

        controller.apply_command(CameraCommand::Rotate { x: 0.0, y: 400.0 });
        assert_eq!(controller.pose().forward, forward);
        assert!(!controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_begin_rotate_resets_baseline() {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::BeginRotate);
        controller.apply_command(CameraCommand::Rotate { x: 0.0, y: 0.0 });
        controller.apply_command(CameraCommand::BeginRotate);
        controller.apply_command(CameraCommand::Rotate { x: 500.0, y: 500.0 });
        assert_eq!(controller.pose().forward, Vec3::Z);
    }

    #[rstest]
    #[case::below_range(-1.0, -5.0, 0.0, 0.0)]
    #[case::above_range(10.0, 500.0, 5.0, 100.0)]
    #[case::inside_range(2.5, 42.0, 2.5, 42.0)]
    fn test_lens_is_clamped(
        #[case] defocus_angle: f32,
        #[case] focus_distance: f32,
        #[case] expected_angle: f32,
        #[case] expected_distance: f32,
    ) {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::SetLens {
            defocus_angle,
            focus_distance,
        });
        let lens = controller.pose().lens;
        assert_eq!(lens.defocus_angle(), expected_angle);
        assert_eq!(lens.focus_distance(), expected_distance);
    }

    #[test]
    fn test_setters_mutate_state() {
        let mut controller = CameraController::new();
        drain_all(&mut controller);

        controller.apply_command(CameraCommand::SetFov(60.0));
        controller.apply_command(CameraCommand::SetSpeed(2.0));
        controller.apply_command(CameraCommand::SetViewport {
            width: 1920,
            height: 1080,
        });

        let pose = controller.pose();
        assert_eq!(pose.fov_degrees, 60.0);
        assert_eq!(pose.speed, 2.0);
        assert_eq!((pose.width, pose.height), (1920, 1080));
        assert!((pose.aspect() - 16.0 / 9.0).abs() < 1e-6);
        assert!(controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_zero_viewport_is_ignored() {
        let mut controller = CameraController::new();
        drain_all(&mut controller);
        controller.apply_command(CameraCommand::SetViewport { width: 0, height: 600 });
        assert_eq!(controller.pose().width, 800);
        assert!(!controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_boost_toggle_does_not_dirty() {
        let mut controller = CameraController::new();
        drain_all(&mut controller);
        controller.apply_command(CameraCommand::SetBoost(true));
        assert!(controller.boost());
        assert!(!controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_reset_keeps_viewport() {
        let mut controller = CameraController::new();
        controller.apply_command(CameraCommand::SetViewport {
            width: 1024,
            height: 768,
        });
        controller.apply_command(CameraCommand::MoveForward);
        controller.apply_command(CameraCommand::SetFov(45.0));
        drain_all(&mut controller);

        controller.apply_command(CameraCommand::Reset);
        let pose = controller.pose();
        assert_eq!(pose.position, INITIAL_POSITION);
        assert_eq!(pose.fov_degrees, 90.0);
        assert_eq!((pose.width, pose.height), (1024, 768));
        assert!(controller.dirty_slots().any_dirty());
    }

    #[test]
    fn test_derive_matrices_is_pure() {
        let controller = CameraController::new();
        let a = controller.derive_matrices(true);
        let b = controller.derive_matrices(true);
        assert_eq!(a, b);
        assert!(controller.dirty_slots().any_dirty());
    }
}
