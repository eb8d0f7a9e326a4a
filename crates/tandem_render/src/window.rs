//! Window management
//!
//! winit 0.30 creates windows inside `ApplicationHandler::resumed`; these
//! helpers only describe the window and build the event loop.

use crate::error::RenderError;
use tandem_services::settings::GraphicsSettings;
use winit::{event_loop::EventLoop, window::Window};

pub const APP_NAME: &str = "Tandem Hybrid Renderer";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: APP_NAME.to_string(),
            width: 1280,
            height: 720,
        }
    }
}

impl WindowConfig {
    pub fn from_settings(graphics: &GraphicsSettings) -> Self {
        Self {
            width: graphics.width,
            height: graphics.height,
            ..Self::default()
        }
    }
}

/// Create window attributes from config
pub fn window_attributes(config: &WindowConfig) -> winit::window::WindowAttributes {
    Window::default_attributes()
        .with_title(config.title.clone())
        .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height))
}

/// Title with the profiler readout appended
pub fn hud_title(snapshot: &str) -> String {
    format!("{APP_NAME} - {snapshot}")
}

pub fn create_event_loop() -> Result<EventLoop<()>, RenderError> {
    EventLoop::new().map_err(|e| RenderError::Window(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_follows_graphics_settings() {
        let graphics = GraphicsSettings {
            width: 800,
            height: 600,
            ..GraphicsSettings::default()
        };
        let config = WindowConfig::from_settings(&graphics);
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.title, APP_NAME);
    }

    #[test]
    fn hud_title_prefixes_app_name() {
        assert_eq!(
            hud_title("Profiling..."),
            "Tandem Hybrid Renderer - Profiling..."
        );
    }
}
