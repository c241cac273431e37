//! The boundary between the interface and a native platform layer.
//!
//! A native layer is reached through two primitives: a one-shot method
//! invocation that resolves to a single reply, and an event subscription that
//! yields payloads until it is dropped. Payloads are plain JSON values.

use std::fmt;
use std::pin::Pin;

use futures::Stream;
use futures::future::BoxFuture;
use serde_json::Value;

/// Channel carrying every one-shot call.
pub const METHOD_CHANNEL: &str = "flutter.baseflow.com/geolocator";
/// Event channel emitting position updates.
pub const POSITION_UPDATES_CHANNEL: &str = "flutter.baseflow.com/geolocator_updates";
/// Event channel emitting location service status changes.
pub const SERVICE_STATUS_UPDATES_CHANNEL: &str = "flutter.baseflow.com/geolocator_service_updates";
/// Event channel emitting raw NMEA sentences.
pub const NMEA_UPDATES_CHANNEL: &str = "flutter.baseflow.com/nmea_updates";

/// Method names understood by the native layer.
pub mod method {
    /// Reads the current permission without prompting.
    pub const CHECK_PERMISSION: &str = "checkPermission";
    /// Prompts the user for location permission.
    pub const REQUEST_PERMISSION: &str = "requestPermission";
    /// Reports whether the device location service is switched on.
    pub const IS_LOCATION_SERVICE_ENABLED: &str = "isLocationServiceEnabled";
    /// Returns the last cached fix, if any.
    pub const GET_LAST_KNOWN_POSITION: &str = "getLastKnownPosition";
    /// Acquires a fresh fix.
    pub const GET_CURRENT_POSITION: &str = "getCurrentPosition";
    /// Reads the reduced/precise accuracy authorization.
    pub const GET_LOCATION_ACCURACY: &str = "getLocationAccuracy";
    /// Asks for temporary precise accuracy.
    pub const REQUEST_TEMPORARY_FULL_ACCURACY: &str = "requestTemporaryFullAccuracy";
    /// Opens the app's settings page.
    pub const OPEN_APP_SETTINGS: &str = "openAppSettings";
    /// Opens the device location settings page.
    pub const OPEN_LOCATION_SETTINGS: &str = "openLocationSettings";
}

/// An error reported by the native layer, before it is mapped to a typed failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("platform error {code}: {}", .message.as_deref().unwrap_or("no message"))]
pub struct PlatformException {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description, when the native layer supplied one.
    pub message: Option<String>,
}

impl PlatformException {
    /// Creates an exception carrying a code and a message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: Some(message.into()),
        }
    }

    /// Creates an exception that only carries a code.
    pub fn from_code(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
        }
    }
}

/// Result of a single transport interaction.
pub type TransportResult = Result<Value, PlatformException>;

/// A live event subscription. Dropping it tears the subscription down.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportResult> + Send>>;

/// A message-passing bridge to a native location implementation.
pub trait Transport: fmt::Debug + Send + Sync {
    /// Issues one request on `channel` and resolves to its single reply.
    ///
    /// The returned future owns everything it needs; dropping it abandons
    /// the reply but does not necessarily cancel the native request.
    fn invoke(
        &self,
        channel: &str,
        method: &str,
        arguments: Option<Value>,
    ) -> BoxFuture<'static, TransportResult>;

    /// Opens an event subscription on `channel`.
    fn subscribe(&self, channel: &str, arguments: Option<Value>) -> EventStream;
}
