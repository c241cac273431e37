//! # Geolocator
//!
//! Cross-platform geolocation: permission handling, one-shot position fixes,
//! shared position, service status and NMEA streams, and distance/bearing
//! helpers.
//!
//! The typed API lives in [`geolocator_platform_interface`] and is re-exported
//! here. This crate adds the native [`Transport`] for the current platform:
//!
//! - Linux: GeoClue2 over the system D-Bus.
//! - Everything else: a transport that fails each call with
//!   `UNSUPPORTED_PLATFORM`.
//!
//! ## Example
//!
//! ```no_run
//! use futures::StreamExt;
//!
//! async fn follow() -> Result<(), geolocator::GeolocatorError> {
//!     let geolocator = geolocator::native();
//!     let here = geolocator.get_current_position(None).await?;
//!     println!("Latitude: {}, Longitude: {}", here.latitude, here.longitude);
//!
//!     let mut updates = geolocator.get_position_stream(None).listen();
//!     while let Some(position) = updates.next().await {
//!         let position = position?;
//!         let meters = geolocator::distance_between(
//!             here.latitude,
//!             here.longitude,
//!             position.latitude,
//!             position.longitude,
//!         );
//!         println!("{meters:.0} m from the start");
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub use geolocator_platform_interface::*;

/// Platform-specific transports.
pub mod sys;

pub use sys::NativeTransport;

/// Creates a [`Geolocator`] backed by the native transport of this platform.
#[must_use]
pub fn native() -> Geolocator {
    Geolocator::new(Arc::new(NativeTransport::default()))
}
