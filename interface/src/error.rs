use std::time::Duration;

use crate::transport::PlatformException;

/// Typed failures surfaced by every geolocation operation and stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeolocatorError {
    /// The user denied access to the device location.
    #[error("{}", describe(.0.as_deref(), "User denied permissions to access the device's location."))]
    PermissionDenied(Option<String>),
    /// A permission prompt is already showing.
    #[error("{}", describe(.0.as_deref(), "A request for location permissions is already running."))]
    PermissionRequestInProgress(Option<String>),
    /// The application manifest or plist declares no location permission.
    #[error("{}", describe(.0.as_deref(), "No location permissions are defined in the application manifest."))]
    PermissionDefinitionsNotFound(Option<String>),
    /// The native call needs a foreground UI that is not available.
    #[error("{}", describe(.0.as_deref(), "Activity is missing. This might happen when running a certain function from the background that requires a UI element."))]
    ActivityMissing(Option<String>),
    /// The device location service is switched off.
    #[error("{}", describe(.0.as_deref(), "The location service on the device is disabled."))]
    LocationServiceDisabled(Option<String>),
    /// The native layer only allows one position subscription at a time.
    #[error("{}", describe(.0.as_deref(), "The app is already listening to a stream of position updates."))]
    AlreadySubscribed(Option<String>),
    /// The native layer failed to produce a position update.
    #[error("{}", describe(.0.as_deref(), "Failed to receive a position update."))]
    PositionUpdate(Option<String>),
    /// No reply or event arrived within the time limit.
    #[error("time limit of {0:?} elapsed before the platform replied")]
    Timeout(Duration),
    /// A payload did not have the shape the operation expects.
    #[error("invalid platform payload: {0}")]
    InvalidPayload(String),
    /// An error code with no dedicated variant.
    #[error(transparent)]
    Generic(PlatformException),
}

fn describe<'a>(message: Option<&'a str>, fallback: &'a str) -> &'a str {
    message.unwrap_or(fallback)
}

impl GeolocatorError {
    /// The human-readable message the native layer supplied, if any.
    #[must_use]
    pub fn platform_message(&self) -> Option<&str> {
        match self {
            Self::PermissionDenied(message)
            | Self::PermissionRequestInProgress(message)
            | Self::PermissionDefinitionsNotFound(message)
            | Self::ActivityMissing(message)
            | Self::LocationServiceDisabled(message)
            | Self::AlreadySubscribed(message)
            | Self::PositionUpdate(message) => message.as_deref(),
            Self::Generic(exception) => exception.message.as_deref(),
            Self::Timeout(_) | Self::InvalidPayload(_) => None,
        }
    }
}

impl From<PlatformException> for GeolocatorError {
    fn from(exception: PlatformException) -> Self {
        let message = exception.message.clone();
        match exception.code.as_str() {
            "PERMISSION_DENIED" => Self::PermissionDenied(message),
            "PERMISSION_REQUEST_IN_PROGRESS" => Self::PermissionRequestInProgress(message),
            "PERMISSION_DEFINITIONS_NOT_FOUND" => Self::PermissionDefinitionsNotFound(message),
            "ACTIVITY_MISSING" => Self::ActivityMissing(message),
            "LOCATION_SERVICES_DISABLED" => Self::LocationServiceDisabled(message),
            "LOCATION_SUBSCRIPTION_ACTIVE" => Self::AlreadySubscribed(message),
            "LOCATION_UPDATE_FAILURE" => Self::PositionUpdate(message),
            _ => Self::Generic(exception),
        }
    }
}

impl From<serde_json::Error> for GeolocatorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidPayload(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type GeolocatorResult<T> = Result<T, GeolocatorError>;
