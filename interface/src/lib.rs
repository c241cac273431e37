//! Platform interface for device geolocation.
//!
//! This crate turns a message-passing [`Transport`] to a native location
//! implementation into a typed API:
//!
//! - one-shot calls (permissions, current and last known position, accuracy
//!   authorization, settings pages) with optional time limits;
//! - shared position, service status and NMEA streams that keep a single
//!   platform subscription open for any number of listeners;
//! - distance and bearing helpers.
//!
//! Native error codes are mapped onto [`GeolocatorError`].
//!
//! # Usage
//!
//! ```ignore
//! use futures::StreamExt;
//! use geolocator_platform_interface::{Geolocator, LocationSettings};
//!
//! let geolocator = Geolocator::new(transport);
//! let here = geolocator.get_current_position(None).await?;
//!
//! let mut updates = geolocator.get_position_stream(None).listen();
//! while let Some(position) = updates.next().await {
//!     println!("{:?}", position?);
//! }
//! ```

mod deadline;
mod error;
pub mod geodesy;
mod geolocator;
pub mod models;
mod shared_stream;
pub mod transport;

pub use error::{GeolocatorError, GeolocatorResult};
pub use geodesy::{bearing_between, distance_between};
pub use geolocator::{Geolocator, NmeaStream, PositionStream, ServiceStatusStream};
pub use models::{
    ActivityType, AndroidSettings, AppleSettings, ForegroundNotificationConfig, LocationAccuracy,
    LocationAccuracyStatus, LocationPermission, LocationSettings, NmeaMessage, PlatformSettings,
    Position, ServiceStatus,
};
pub use shared_stream::{Listener, SharedStream};
pub use transport::{EventStream, PlatformException, Transport, TransportResult};
