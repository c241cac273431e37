//! Platform-specific transport implementations.

#[cfg(target_os = "linux")]
mod linux;

mod unsupported;

#[cfg(target_os = "linux")]
pub use linux::GeoClueTransport;

pub use unsupported::UnsupportedTransport;

/// The transport used by [`native`](crate::native) on this platform.
#[cfg(target_os = "linux")]
pub type NativeTransport = GeoClueTransport;

/// The transport used by [`native`](crate::native) on this platform.
#[cfg(not(target_os = "linux"))]
pub type NativeTransport = UnsupportedTransport;
