//! Tandem Services Layer
//!
//! Settings, scene description and camera input: everything the runtime
//! feeds into the renderer that is not GPU work itself.

pub mod input;
pub mod scene;
pub mod settings;

pub use input::{Camera, InputState, Key};
pub use scene::{LightDesc, ObjectPlacement, SceneDescriptor, SceneError, MAX_LIGHTS};
pub use settings::{Settings, SettingsError};
