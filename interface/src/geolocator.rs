use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::debug;
use serde_json::{Value, json};

use crate::deadline;
use crate::error::{GeolocatorError, GeolocatorResult};
use crate::geodesy;
use crate::models::{
    LocationAccuracyStatus, LocationPermission, LocationSettings, NmeaMessage, Position,
    ServiceStatus,
};
use crate::shared_stream::{Multiplexer, SharedStream};
use crate::transport::{
    METHOD_CHANNEL, NMEA_UPDATES_CHANNEL, POSITION_UPDATES_CHANNEL,
    SERVICE_STATUS_UPDATES_CHANNEL, Transport, method,
};

/// Shared stream of position updates.
pub type PositionStream = SharedStream<Position>;
/// Shared stream of location service status changes.
pub type ServiceStatusStream = SharedStream<ServiceStatus>;
/// Shared stream of NMEA sentences.
pub type NmeaStream = SharedStream<NmeaMessage>;

/// Entry point for every geolocation operation.
///
/// One-shot calls go straight to the transport. Streams are shared: each
/// event kind has a single platform subscription no matter how many
/// listeners attach. Build one `Geolocator` per transport and share it; two
/// instances never share streams.
pub struct Geolocator {
    transport: Arc<dyn Transport>,
    permission_request_pending: AtomicBool,
    positions: Multiplexer<Position>,
    service_status: Multiplexer<ServiceStatus>,
    nmea: Multiplexer<NmeaMessage>,
}

impl fmt::Debug for Geolocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Geolocator")
            .field("transport", &self.transport)
            .field("positions", &self.positions)
            .field("service_status", &self.service_status)
            .field("nmea", &self.nmea)
            .finish_non_exhaustive()
    }
}

/// Clears the in-flight permission flag however the request ends.
struct PermissionRequestGuard<'a>(&'a AtomicBool);

impl Drop for PermissionRequestGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Geolocator {
    /// Creates a geolocator on top of a platform transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            permission_request_pending: AtomicBool::new(false),
            positions: Multiplexer::new(POSITION_UPDATES_CHANNEL, Position::from_value),
            service_status: Multiplexer::new(SERVICE_STATUS_UPDATES_CHANNEL, |value: Value| {
                ServiceStatus::from_value(&value)
            }),
            nmea: Multiplexer::new(NMEA_UPDATES_CHANNEL, NmeaMessage::from_value),
        }
    }

    async fn call(
        &self,
        name: &'static str,
        arguments: Option<Value>,
        limit: Option<Duration>,
    ) -> GeolocatorResult<Value> {
        debug!("invoking {name}");
        let reply = self.transport.invoke(METHOD_CHANNEL, name, arguments);
        deadline::race(name, async { reply.await.map_err(GeolocatorError::from) }, limit).await
    }

    /// Reads the current location permission without prompting.
    ///
    /// # Errors
    /// Returns the mapped platform failure, or
    /// [`GeolocatorError::InvalidPayload`] for an unknown permission code.
    pub async fn check_permission(&self) -> GeolocatorResult<LocationPermission> {
        let reply = self.call(method::CHECK_PERMISSION, None, None).await?;
        LocationPermission::from_value(&reply)
    }

    /// Prompts the user for location permission.
    ///
    /// Only one prompt may be outstanding: a second call made before the
    /// first resolves fails with
    /// [`GeolocatorError::PermissionRequestInProgress`] instead of queuing.
    ///
    /// # Errors
    /// Returns the mapped platform failure, such as
    /// [`GeolocatorError::PermissionDefinitionsNotFound`].
    pub async fn request_permission(&self) -> GeolocatorResult<LocationPermission> {
        if self
            .permission_request_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GeolocatorError::PermissionRequestInProgress(None));
        }
        let _guard = PermissionRequestGuard(&self.permission_request_pending);

        let reply = self.call(method::REQUEST_PERMISSION, None, None).await?;
        LocationPermission::from_value(&reply)
    }

    /// Reports whether the device location service is switched on.
    ///
    /// # Errors
    /// Returns the mapped platform failure.
    pub async fn is_location_service_enabled(&self) -> GeolocatorResult<bool> {
        let reply = self
            .call(method::IS_LOCATION_SERVICE_ENABLED, None, None)
            .await?;
        expect_bool(&reply)
    }

    /// Returns the most recent cached fix, or `None` when the platform has none.
    ///
    /// `force_location_manager` selects the legacy Android provider.
    ///
    /// # Errors
    /// Returns the mapped platform failure, e.g.
    /// [`GeolocatorError::PermissionDenied`].
    pub async fn get_last_known_position(
        &self,
        force_location_manager: bool,
    ) -> GeolocatorResult<Option<Position>> {
        let arguments = json!({ "forceLocationManager": force_location_manager });
        match self
            .call(method::GET_LAST_KNOWN_POSITION, Some(arguments), None)
            .await?
        {
            Value::Null => Ok(None),
            reply => Position::from_value(reply).map(Some),
        }
    }

    /// Acquires a fresh fix.
    ///
    /// When `settings` carries a time limit the call fails with
    /// [`GeolocatorError::Timeout`] once it elapses; a reply arriving later is
    /// dropped.
    ///
    /// # Errors
    /// Returns the mapped platform failure, e.g.
    /// [`GeolocatorError::LocationServiceDisabled`], or a timeout.
    pub async fn get_current_position(
        &self,
        settings: Option<&LocationSettings>,
    ) -> GeolocatorResult<Position> {
        let arguments = settings.map(LocationSettings::to_arguments);
        let limit = settings.and_then(|settings| settings.time_limit);
        let reply = self
            .call(method::GET_CURRENT_POSITION, arguments, limit)
            .await?;
        Position::from_value(reply)
    }

    /// Returns the shared position stream, creating it if none is live.
    ///
    /// `settings` only apply when this call creates the stream; while a stream
    /// is live every caller gets that same stream. A time limit bounds the
    /// wait for each update.
    #[must_use]
    pub fn get_position_stream(&self, settings: Option<&LocationSettings>) -> PositionStream {
        self.positions.stream(
            &self.transport,
            settings.map(LocationSettings::to_arguments),
            settings.and_then(|settings| settings.time_limit),
        )
    }

    /// Returns the shared stream of location service status changes.
    #[must_use]
    pub fn get_service_status_stream(&self) -> ServiceStatusStream {
        self.service_status.stream(&self.transport, None, None)
    }

    /// Returns the shared stream of raw NMEA sentences.
    #[must_use]
    pub fn get_nmea_stream(&self) -> NmeaStream {
        self.nmea.stream(&self.transport, None, None)
    }

    /// Reads whether the user granted precise or approximate location.
    ///
    /// # Errors
    /// Returns the mapped platform failure, or
    /// [`GeolocatorError::InvalidPayload`] for an unknown status code.
    pub async fn get_location_accuracy(&self) -> GeolocatorResult<LocationAccuracyStatus> {
        let reply = self.call(method::GET_LOCATION_ACCURACY, None, None).await?;
        LocationAccuracyStatus::from_value(&reply)
    }

    /// Asks for temporary precise accuracy, explaining why with the usage
    /// description stored under `purpose_key` in the app's plist.
    ///
    /// # Errors
    /// Returns the mapped platform failure, e.g.
    /// [`GeolocatorError::PermissionDefinitionsNotFound`] when the key is
    /// missing.
    pub async fn request_temporary_full_accuracy(
        &self,
        purpose_key: &str,
    ) -> GeolocatorResult<LocationAccuracyStatus> {
        let arguments = json!({ "purposeKey": purpose_key });
        let reply = self
            .call(method::REQUEST_TEMPORARY_FULL_ACCURACY, Some(arguments), None)
            .await?;
        LocationAccuracyStatus::from_value(&reply)
    }

    /// Opens the app's settings page. Returns whether it could be shown.
    ///
    /// # Errors
    /// Returns the mapped platform failure.
    pub async fn open_app_settings(&self) -> GeolocatorResult<bool> {
        let reply = self.call(method::OPEN_APP_SETTINGS, None, None).await?;
        expect_bool(&reply)
    }

    /// Opens the device location settings page. Returns whether it could be
    /// shown.
    ///
    /// # Errors
    /// Returns the mapped platform failure.
    pub async fn open_location_settings(&self) -> GeolocatorResult<bool> {
        let reply = self.call(method::OPEN_LOCATION_SETTINGS, None, None).await?;
        expect_bool(&reply)
    }

    /// See [`geodesy::distance_between`].
    #[must_use]
    pub fn distance_between(
        start_latitude: f64,
        start_longitude: f64,
        end_latitude: f64,
        end_longitude: f64,
    ) -> f64 {
        geodesy::distance_between(start_latitude, start_longitude, end_latitude, end_longitude)
    }

    /// See [`geodesy::bearing_between`].
    #[must_use]
    pub fn bearing_between(
        start_latitude: f64,
        start_longitude: f64,
        end_latitude: f64,
        end_longitude: f64,
    ) -> f64 {
        geodesy::bearing_between(start_latitude, start_longitude, end_latitude, end_longitude)
    }
}

fn expect_bool(value: &Value) -> GeolocatorResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| GeolocatorError::InvalidPayload(format!("expected a bool, got {value}")))
}
