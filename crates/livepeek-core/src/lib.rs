pub mod config;
pub mod errors;
pub mod sample;
pub mod types;

pub use config::{
    CaptureResolution, ContentFilter, PickerConfiguration, PickingMode, SessionSettings,
    StreamConfiguration,
};
pub use errors::CaptureError;
pub use sample::*;
pub use types::*;
