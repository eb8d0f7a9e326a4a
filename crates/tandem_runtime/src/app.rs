//! Windowed application loop

use anyhow::{Context, Result};
use std::time::Instant;
use tandem_core::time::FrameClock;
use tandem_metrics::FrameTimer;
use tandem_render::vulkan::VulkanBackend;
use tandem_render::window::{self, WindowConfig};
use tandem_render::{Extent, FrameInput, FrameOrchestrator, ResourceSet};
use tandem_services::{Camera, InputState, Key, SceneDescriptor, Settings};
use winit::application::ApplicationHandler;
use winit::event::{DeviceEvent, DeviceId, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

/// Movement binding for a physical key
pub fn movement_key(code: KeyCode) -> Option<Key> {
    match code {
        KeyCode::KeyW => Some(Key::Forward),
        KeyCode::KeyS => Some(Key::Back),
        KeyCode::KeyA => Some(Key::Left),
        KeyCode::KeyD => Some(Key::Right),
        KeyCode::KeyE => Some(Key::Up),
        KeyCode::KeyQ => Some(Key::Down),
        _ => None,
    }
}

/// Window plus everything that renders into it. Field order is drop order:
/// the swapchain must go before the window it presents to.
struct Running {
    orchestrator: FrameOrchestrator<VulkanBackend>,
    window: Window,
}

pub struct App {
    settings: Settings,
    scene: SceneDescriptor,
    running: Option<Running>,
    error: Option<anyhow::Error>,

    clock: FrameClock,
    timer: FrameTimer,
    camera: Camera,
    input: InputState,
    last_frame: Instant,
    last_hud: Instant,
}

impl App {
    pub fn new(settings: Settings, scene: SceneDescriptor) -> Self {
        let clock = match settings.simulation.fixed_delta_secs {
            Some(delta) => FrameClock::fixed(delta),
            None => FrameClock::new(),
        };
        Self {
            settings,
            scene,
            running: None,
            error: None,
            clock,
            timer: FrameTimer::new(120),
            camera: Camera::default(),
            input: InputState::default(),
            last_frame: Instant::now(),
            last_hud: Instant::now(),
        }
    }

    /// Error that stopped the event loop, if any
    pub fn take_error(&mut self) -> Option<anyhow::Error> {
        self.error.take()
    }

    fn start(&self, event_loop: &ActiveEventLoop) -> Result<Running> {
        let config = WindowConfig::from_settings(&self.settings.graphics);
        let window = event_loop
            .create_window(window::window_attributes(&config))
            .context("failed to create window")?;

        let mut backend =
            VulkanBackend::new(&window, &self.settings).context("failed to initialize Vulkan")?;
        let resources = ResourceSet::build(
            &mut backend,
            &self.scene,
            self.settings.simulation.seed,
            self.settings.simulation.bounds(),
        )
        .context("failed to build scene resources")?;
        let orchestrator = FrameOrchestrator::new(backend, resources, &self.settings.profiler);

        Ok(Running {
            orchestrator,
            window,
        })
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        tracing::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let Some(running) = self.running.as_mut() else {
            return Ok(());
        };

        let now = Instant::now();
        let measured = now - self.last_frame;
        self.last_frame = now;
        self.timer.record(measured);

        let delta_secs = self.clock.advance(measured);
        self.input.apply(&mut self.camera, delta_secs);

        let input = FrameInput {
            delta_secs,
            elapsed_secs: self.clock.elapsed_secs(),
            camera: &self.camera,
            lights_on: self.input.lights_on,
        };
        running.orchestrator.tick(&input)?;

        let refresh = self.settings.profiler.hud_refresh_secs;
        if now.duration_since(self.last_hud).as_secs_f32() >= refresh {
            self.last_hud = now;
            if running.window.is_minimized() != Some(true) {
                let snapshot = running.orchestrator.profiler_snapshot();
                if !snapshot.is_empty() {
                    running.window.set_title(&window::hud_title(&snapshot));
                }
            }
        }
        Ok(())
    }

    fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        if let Err(err) = running.orchestrator.shutdown() {
            tracing::warn!(%err, "GPU did not drain cleanly");
        }
        match running.orchestrator.profiler_report() {
            Ok(report) => tracing::info!("\n{report}"),
            Err(err) => tracing::warn!(%err, "final profiler report failed"),
        }
        tracing::info!(
            frames = self.clock.frame_count(),
            presented = running.orchestrator.frames_presented(),
            cpu_ms = self.timer.frame_time_ms(),
            "renderer stopped"
        );
    }

    fn key(&mut self, event_loop: &ActiveEventLoop, event: &KeyEvent) {
        let PhysicalKey::Code(code) = event.physical_key else {
            return;
        };
        let pressed = event.state == ElementState::Pressed;
        if let Some(key) = movement_key(code) {
            self.input.set_key(key, pressed);
            return;
        }
        if !pressed || event.repeat {
            return;
        }
        match code {
            KeyCode::KeyL => self.input.toggle_lights(),
            KeyCode::Escape => {
                self.stop();
                event_loop.exit();
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.running.is_some() {
            return;
        }
        match self.start(event_loop) {
            Ok(running) => {
                self.last_frame = Instant::now();
                self.last_hud = self.last_frame;
                self.running = Some(running);
            }
            Err(err) => self.fail(event_loop, err),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                self.stop();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(running) = self.running.as_mut() {
                    let extent = Extent::new(size.width, size.height);
                    running.orchestrator.backend_mut().set_window_extent(extent);
                    running.orchestrator.request_resize();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.stop();
                    self.fail(event_loop, err.context("frame failed"));
                }
            }
            WindowEvent::KeyboardInput { event, .. } => self.key(event_loop, &event),
            WindowEvent::MouseInput { state, button, .. } => {
                if button == MouseButton::Right {
                    self.input.set_looking(state == ElementState::Pressed);
                }
            }
            WindowEvent::Focused(false) => self.input.release_all(),
            _ => {}
        }
    }

    fn device_event(&mut self, _event_loop: &ActiveEventLoop, _device_id: DeviceId, event: DeviceEvent) {
        if let DeviceEvent::MouseMotion { delta: (dx, dy) } = event {
            self.input.mouse_moved(dx as f32, dy as f32);
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.stop();
    }
}

/// Open the window and render until it closes
pub fn run(settings: Settings, scene: SceneDescriptor) -> Result<()> {
    let event_loop = window::create_event_loop()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(settings, scene);
    event_loop.run_app(&mut app).context("event loop failed")?;
    match app.take_error() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wasd_and_qe_drive_the_camera() {
        assert_eq!(movement_key(KeyCode::KeyW), Some(Key::Forward));
        assert_eq!(movement_key(KeyCode::KeyS), Some(Key::Back));
        assert_eq!(movement_key(KeyCode::KeyA), Some(Key::Left));
        assert_eq!(movement_key(KeyCode::KeyD), Some(Key::Right));
        assert_eq!(movement_key(KeyCode::KeyE), Some(Key::Up));
        assert_eq!(movement_key(KeyCode::KeyQ), Some(Key::Down));
        assert_eq!(movement_key(KeyCode::KeyL), None);
    }

    #[test]
    fn fixed_delta_setting_selects_a_fixed_clock() {
        let mut settings = Settings::default();
        assert!(!App::new(settings.clone(), SceneDescriptor::showcase()).clock.is_fixed());
        settings.simulation.fixed_delta_secs = Some(0.01);
        assert!(App::new(settings, SceneDescriptor::showcase()).clock.is_fixed());
    }
}
