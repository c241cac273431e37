//! Small enumerations exchanged with the platform as integer codes.

use serde_json::Value;

use crate::error::{GeolocatorError, GeolocatorResult};

/// Location permission granted to the application.
///
/// Variants are ordered from least to most access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocationPermission {
    /// Access is denied; asking again may show a prompt.
    Denied,
    /// Access is denied permanently; only the settings page can change it.
    DeniedForever,
    /// Access is allowed while the application is in use.
    WhileInUse,
    /// Access is allowed in the background too.
    Always,
}

/// Whether the device location service is switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceStatus {
    /// The location service is off.
    Disabled,
    /// The location service is on.
    Enabled,
}

/// The accuracy authorization the user granted (iOS 14+, Android 12+).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationAccuracyStatus {
    /// Approximate location only.
    Reduced,
    /// Precise location.
    Precise,
}

fn int_code(value: &Value, what: &str) -> GeolocatorResult<i64> {
    value
        .as_i64()
        .ok_or_else(|| GeolocatorError::InvalidPayload(format!("expected {what} code, got {value}")))
}

macro_rules! int_coded {
    ($ty:ident, $what:literal, { $($code:literal => $variant:ident),+ $(,)? }) => {
        impl $ty {
            /// The integer code used on the wire.
            #[must_use]
            pub const fn code(self) -> i64 {
                match self {
                    $(Self::$variant => $code,)+
                }
            }

            /// Decodes a wire value holding an integer code.
            ///
            /// # Errors
            /// Returns [`GeolocatorError::InvalidPayload`] for a non-integer
            /// or unknown code.
            pub fn from_value(value: &Value) -> GeolocatorResult<Self> {
                Self::try_from(int_code(value, $what)?)
            }
        }

        impl TryFrom<i64> for $ty {
            type Error = GeolocatorError;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    other => Err(GeolocatorError::InvalidPayload(format!(
                        "unknown {} code {other}",
                        $what
                    ))),
                }
            }
        }
    };
}

int_coded!(LocationPermission, "permission", {
    0 => Denied,
    1 => DeniedForever,
    2 => WhileInUse,
    3 => Always,
});

int_coded!(ServiceStatus, "service status", {
    0 => Disabled,
    1 => Enabled,
});

int_coded!(LocationAccuracyStatus, "accuracy status", {
    0 => Reduced,
    1 => Precise,
});
