//! Value types exchanged with the platform.

mod nmea;
mod position;
mod settings;
mod status;

pub use nmea::NmeaMessage;
pub use position::Position;
pub use settings::{
    ActivityType, AndroidSettings, AppleSettings, ForegroundNotificationConfig, LocationAccuracy,
    LocationSettings, PlatformSettings,
};
pub use status::{LocationAccuracyStatus, LocationPermission, ServiceStatus};
