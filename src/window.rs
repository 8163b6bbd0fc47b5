//! Window management and input mapping using winit

use std::sync::Arc;
use std::time::{Duration, Instant};

use winit::{
    dpi::PhysicalSize,
    error::OsError,
    event::{ElementState, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
    window::{Window as WinitWindow, WindowBuilder},
};

use crate::scene::CameraCommand;

/// Wrapper around winit window with additional state
pub struct Window {
    window: Arc<WinitWindow>,
    title: String,
}

impl Window {
    /// Create a new window with the given title and dimensions
    pub fn new(
        event_loop: &EventLoop<()>,
        title: &str,
        width: u32,
        height: u32,
    ) -> Result<Self, OsError> {
        let window = Arc::new(
            WindowBuilder::new()
                .with_title(title)
                .with_inner_size(PhysicalSize::new(width, height))
                .build(event_loop)?,
        );

        Ok(Self {
            window,
            title: title.to_string(),
        })
    }

    /// Get arc reference to window
    pub fn window_arc(&self) -> Arc<WinitWindow> {
        Arc::clone(&self.window)
    }

    /// Current inner size in physical pixels
    pub fn dimensions(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Show the frame rate after the base title
    pub fn show_fps(&self, fps: f64) {
        let title = format!("{} - {:.0} fps", self.title, fps);
        self.window.set_title(&title);
    }
}

/// Counts presented frames and reports the rate about once per second
#[derive(Debug)]
pub struct FpsCounter {
    frames: u32,
    since: Instant,
    interval: Duration,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl FpsCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            frames: 0,
            since: Instant::now(),
            interval,
        }
    }

    /// Count one frame; returns the rate when an interval has elapsed
    pub fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.since.elapsed();
        if elapsed < self.interval {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.frames = 0;
        self.since = Instant::now();
        Some(fps)
    }
}

/// What a window event asks the application to do
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputAction {
    Camera(CameraCommand),
    Resize { width: u32, height: u32 },
    Close,
}

/// Translates winit events into [`InputAction`]s.
///
/// Holding the primary button rotates the view. The middle button and the
/// scroll wheel are tracked but have no binding yet.
#[derive(Debug, Default)]
pub struct InputMapper {
    rotating: bool,
    middle_held: bool,
    scroll: f32,
}

impl InputMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_event(&mut self, event: &WindowEvent) -> Option<InputAction> {
        match event {
            WindowEvent::CloseRequested => Some(InputAction::Close),
            WindowEvent::Resized(size) => Some(InputAction::Resize {
                width: size.width,
                height: size.height,
            }),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state,
                        repeat,
                        ..
                    },
                ..
            } => self.map_key(*code, *state, *repeat),
            WindowEvent::MouseInput { state, button, .. } => self.map_button(*button, *state),
            WindowEvent::CursorMoved { position, .. } => {
                self.map_cursor(position.x as f32, position.y as f32)
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / 120.0,
                };
                self.map_scroll(lines)
            }
            _ => None,
        }
    }

    pub fn map_key(
        &mut self,
        code: KeyCode,
        state: ElementState,
        repeat: bool,
    ) -> Option<InputAction> {
        let pressed = state == ElementState::Pressed;
        let command = match code {
            KeyCode::ShiftLeft => CameraCommand::SetBoost(pressed),
            _ if !pressed => return None,
            KeyCode::KeyW | KeyCode::ArrowUp => CameraCommand::MoveForward,
            KeyCode::KeyS | KeyCode::ArrowDown => CameraCommand::MoveBackward,
            KeyCode::KeyA | KeyCode::ArrowLeft => CameraCommand::MoveLeft,
            KeyCode::KeyD | KeyCode::ArrowRight => CameraCommand::MoveRight,
            KeyCode::KeyX => CameraCommand::MoveUp,
            KeyCode::KeyZ => CameraCommand::MoveDown,
            KeyCode::KeyR if !repeat => CameraCommand::Reset,
            KeyCode::Escape if !repeat => return Some(InputAction::Close),
            _ => return None,
        };
        Some(InputAction::Camera(command))
    }

    pub fn map_button(
        &mut self,
        button: MouseButton,
        state: ElementState,
    ) -> Option<InputAction> {
        let pressed = state == ElementState::Pressed;
        match button {
            MouseButton::Left => {
                self.rotating = pressed;
                pressed.then_some(InputAction::Camera(CameraCommand::BeginRotate))
            }
            MouseButton::Middle => {
                self.middle_held = pressed;
                None
            }
            _ => None,
        }
    }

    pub fn map_cursor(&mut self, x: f32, y: f32) -> Option<InputAction> {
        self.rotating
            .then_some(InputAction::Camera(CameraCommand::Rotate { x, y }))
    }

    pub fn map_scroll(&mut self, lines: f32) -> Option<InputAction> {
        self.scroll += lines;
        None
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating
    }

    pub fn is_middle_held(&self) -> bool {
        self.middle_held
    }

    /// Scroll accumulated since startup, in lines
    pub fn scroll(&self) -> f32 {
        self.scroll
    }
}
