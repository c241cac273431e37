//! Linux location implementation using the GeoClue2 D-Bus service.
//!
//! GeoClue has no permission prompts or accuracy authorization outside of
//! sandboxes, so those calls answer "always" and "precise". A fix is read by
//! creating a GeoClue client, starting it and reading its `Location` object.
//! Update streams keep one client running and poll it for new `Location`
//! objects.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::future::{self, BoxFuture};
use futures::stream;
use futures_timer::Delay;
use geolocator_platform_interface::transport::{
    NMEA_UPDATES_CHANNEL, POSITION_UPDATES_CHANNEL, SERVICE_STATUS_UPDATES_CHANNEL, method,
};
use geolocator_platform_interface::{
    EventStream, LocationAccuracy, PlatformException, Position, Transport, TransportResult,
};
use log::debug;
use serde_json::{Value, json};
use zbus::Connection;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

const SERVICE: &str = "org.freedesktop.GeoClue2";
const MANAGER_PATH: &str = "/org/freedesktop/GeoClue2/Manager";
const MANAGER_INTERFACE: &str = "org.freedesktop.GeoClue2.Manager";
const CLIENT_INTERFACE: &str = "org.freedesktop.GeoClue2.Client";
const LOCATION_INTERFACE: &str = "org.freedesktop.GeoClue2.Location";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const FIX_POLL_INTERVAL: Duration = Duration::from_millis(250);
const SERVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Permission code for "always".
const PERMISSION_ALWAYS: u8 = 3;
/// Accuracy authorization code for "precise".
const ACCURACY_PRECISE: u8 = 1;

type FixCache = Arc<Mutex<Option<Position>>>;

/// Talks to GeoClue2 on the system bus.
///
/// The last fix read by any call or stream is kept and served by
/// `getLastKnownPosition`, since GeoClue itself keeps no history.
#[derive(Debug, Clone)]
pub struct GeoClueTransport {
    desktop_id: String,
    last_fix: FixCache,
}

impl Default for GeoClueTransport {
    fn default() -> Self {
        Self::new("geolocator")
    }
}

impl GeoClueTransport {
    /// Creates a transport that identifies itself to GeoClue as `desktop_id`.
    ///
    /// GeoClue checks the id against its agent configuration, so it should
    /// match the application's `.desktop` file name.
    #[must_use]
    pub fn new(desktop_id: impl Into<String>) -> Self {
        Self {
            desktop_id: desktop_id.into(),
            last_fix: Arc::default(),
        }
    }

    fn current_position(&self, request: Request) -> BoxFuture<'static, TransportResult> {
        Box::pin(current_position(
            self.desktop_id.clone(),
            request,
            Arc::clone(&self.last_fix),
        ))
    }

    fn last_known_position(&self) -> TransportResult {
        let cached = self
            .last_fix
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(cached.map_or(Value::Null, |position| position.to_value()))
    }

    fn position_updates(&self, request: Request) -> EventStream {
        let tracker = Tracker {
            desktop_id: self.desktop_id.clone(),
            request,
            cache: Arc::clone(&self.last_fix),
            client: None,
            last_location: None,
        };
        Box::pin(stream::unfold(Some(tracker), |tracker| async move {
            let mut tracker = tracker?;
            match tracker.next_fix().await {
                Ok(position) => Some((Ok(position.to_value()), Some(tracker))),
                Err(exception) => Some((Err(exception), None)),
            }
        }))
    }
}

impl Transport for GeoClueTransport {
    fn invoke(
        &self,
        _channel: &str,
        name: &str,
        arguments: Option<Value>,
    ) -> BoxFuture<'static, TransportResult> {
        match name {
            method::CHECK_PERMISSION | method::REQUEST_PERMISSION => {
                ready(Ok(json!(PERMISSION_ALWAYS)))
            }
            method::GET_LOCATION_ACCURACY | method::REQUEST_TEMPORARY_FULL_ACCURACY => {
                ready(Ok(json!(ACCURACY_PRECISE)))
            }
            method::IS_LOCATION_SERVICE_ENABLED => Box::pin(async {
                service_enabled()
                    .await
                    .map(|enabled| json!(enabled))
                    .map_err(services_disabled)
            }),
            method::GET_LAST_KNOWN_POSITION => ready(self.last_known_position()),
            method::GET_CURRENT_POSITION => {
                self.current_position(Request::from_arguments(arguments.as_ref()))
            }
            // No portable way to open a settings page from here.
            method::OPEN_APP_SETTINGS | method::OPEN_LOCATION_SETTINGS => ready(Ok(json!(false))),
            other => ready(Err(unsupported(other))),
        }
    }

    fn subscribe(&self, channel: &str, arguments: Option<Value>) -> EventStream {
        match channel {
            POSITION_UPDATES_CHANNEL => {
                self.position_updates(Request::from_arguments(arguments.as_ref()))
            }
            SERVICE_STATUS_UPDATES_CHANNEL => service_status_updates(),
            NMEA_UPDATES_CHANNEL => failed_stream(unsupported("NMEA updates")),
            other => failed_stream(unsupported(other)),
        }
    }
}

/// Client parameters decoded from `LocationSettings` arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Request {
    accuracy_level: u32,
    distance_threshold: u32,
    interval: Duration,
}

impl Request {
    fn from_arguments(arguments: Option<&Value>) -> Self {
        let field = |key: &str| arguments.and_then(|arguments| arguments.get(key));
        let accuracy = field("accuracy")
            .and_then(Value::as_u64)
            .and_then(LocationAccuracy::from_code)
            .unwrap_or_default();
        let distance_threshold = field("distanceFilter")
            .and_then(Value::as_u64)
            .and_then(|meters| u32::try_from(meters).ok())
            .unwrap_or(0);
        let interval = field("timeInterval")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_INTERVAL, Duration::from_millis);

        Self {
            accuracy_level: accuracy_level(accuracy),
            distance_threshold,
            interval,
        }
    }
}

/// Maps onto `GClueAccuracyLevel`.
const fn accuracy_level(accuracy: LocationAccuracy) -> u32 {
    match accuracy {
        LocationAccuracy::Lowest => 1,
        LocationAccuracy::Low | LocationAccuracy::Reduced => 4,
        LocationAccuracy::Medium => 5,
        LocationAccuracy::High => 6,
        LocationAccuracy::Best | LocationAccuracy::BestForNavigation => 8,
    }
}

fn services_disabled(err: zbus::Error) -> PlatformException {
    PlatformException::new(
        "LOCATION_SERVICES_DISABLED",
        format!("GeoClue2 not available: {err}"),
    )
}

fn update_failure(err: zbus::Error) -> PlatformException {
    PlatformException::new(
        "LOCATION_UPDATE_FAILURE",
        format!("Failed to read location: {err}"),
    )
}

fn unsupported(what: &str) -> PlatformException {
    PlatformException::new(
        "UNSUPPORTED_OPERATION",
        format!("{what} is not supported by GeoClue2"),
    )
}

fn ready(result: TransportResult) -> BoxFuture<'static, TransportResult> {
    Box::pin(future::ready(result))
}

fn failed_stream(exception: PlatformException) -> EventStream {
    let event: TransportResult = Err(exception);
    Box::pin(stream::once(future::ready(event)))
}

fn remember(cache: &FixCache, position: &Position) {
    *cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(position.clone());
}

async fn get_property(
    connection: &Connection,
    path: &str,
    interface: &str,
    name: &str,
) -> zbus::Result<OwnedValue> {
    let value: OwnedValue = connection
        .call_method(
            Some(SERVICE),
            path,
            Some(PROPERTIES_INTERFACE),
            "Get",
            &(interface, name),
        )
        .await?
        .body()
        .deserialize()?;
    Ok(value)
}

async fn set_client_property(
    connection: &Connection,
    path: &str,
    name: &str,
    value: zbus::zvariant::Value<'_>,
) -> zbus::Result<()> {
    connection
        .call_method(
            Some(SERVICE),
            path,
            Some(PROPERTIES_INTERFACE),
            "Set",
            &(CLIENT_INTERFACE, name, value),
        )
        .await?;
    Ok(())
}

async fn service_enabled() -> zbus::Result<bool> {
    let connection = Connection::system().await?;
    let level = get_property(
        &connection,
        MANAGER_PATH,
        MANAGER_INTERFACE,
        "AvailableAccuracyLevel",
    )
    .await?;
    Ok(u32::try_from(level)? > 0)
}

async fn current_position(desktop_id: String, request: Request, cache: FixCache) -> TransportResult {
    let client = Client::start(&desktop_id, &request).await?;
    let fix = client.wait_for_fix().await;
    client.stop().await;
    let position = fix?;
    remember(&cache, &position);
    Ok(position.to_value())
}

/// Polls the manager and emits `ServiceStatus` codes when availability changes.
fn service_status_updates() -> EventStream {
    Box::pin(stream::unfold(None, |last: Option<bool>| async move {
        let mut last = last;
        loop {
            if last.is_some() {
                Delay::new(SERVICE_POLL_INTERVAL).await;
            }
            // An unreachable service counts as disabled.
            let enabled = service_enabled().await.unwrap_or(false);
            match last.replace(enabled) {
                Some(previous) if previous != enabled => {
                    debug!("GeoClue2 availability changed: enabled = {enabled}");
                    let status: TransportResult = Ok(json!(u8::from(enabled)));
                    return Some((status, last));
                }
                _ => {}
            }
        }
    }))
}

/// A started GeoClue client. The daemon drops it when the connection closes.
struct Client {
    connection: Connection,
    path: OwnedObjectPath,
}

impl Client {
    async fn start(desktop_id: &str, request: &Request) -> Result<Self, PlatformException> {
        let connection = Connection::system().await.map_err(services_disabled)?;

        let reply: (OwnedObjectPath,) = connection
            .call_method(
                Some(SERVICE),
                MANAGER_PATH,
                Some(MANAGER_INTERFACE),
                "GetClient",
                &(),
            )
            .await
            .map_err(services_disabled)?
            .body()
            .deserialize()
            .map_err(services_disabled)?;
        let path = reply.0;

        set_client_property(&connection, path.as_str(), "DesktopId", desktop_id.into())
            .await
            .map_err(services_disabled)?;
        set_client_property(
            &connection,
            path.as_str(),
            "RequestedAccuracyLevel",
            request.accuracy_level.into(),
        )
        .await
        .map_err(services_disabled)?;
        set_client_property(
            &connection,
            path.as_str(),
            "DistanceThreshold",
            request.distance_threshold.into(),
        )
        .await
        .map_err(services_disabled)?;

        connection
            .call_method(
                Some(SERVICE),
                path.as_str(),
                Some(CLIENT_INTERFACE),
                "Start",
                &(),
            )
            .await
            .map_err(services_disabled)?;
        debug!("started GeoClue2 client {}", path.as_str());

        Ok(Self { connection, path })
    }

    /// The current `Location` object, or `None` before the first fix.
    async fn location(&self) -> zbus::Result<Option<OwnedObjectPath>> {
        let value = get_property(
            &self.connection,
            self.path.as_str(),
            CLIENT_INTERFACE,
            "Location",
        )
        .await?;
        let location = OwnedObjectPath::try_from(value)?;
        Ok((location.as_str() != "/").then_some(location))
    }

    async fn wait_for_fix(&self) -> Result<Position, PlatformException> {
        loop {
            if let Some(location) = self.location().await.map_err(update_failure)? {
                return self.read(&location).await.map_err(update_failure);
            }
            Delay::new(FIX_POLL_INTERVAL).await;
        }
    }

    async fn read(&self, location: &OwnedObjectPath) -> zbus::Result<Position> {
        let property = |name: &'static str| async move {
            let value =
                get_property(&self.connection, location.as_str(), LOCATION_INTERFACE, name)
                    .await?;
            Ok::<f64, zbus::Error>(f64::try_from(value)?)
        };

        let latitude = property("Latitude").await?;
        let longitude = property("Longitude").await?;
        // GeoClue reports unknown altitude as -DBL_MAX and unknown speed or
        // heading as -1.
        let known = |value: f64| if value < 0.0 { 0.0 } else { value };
        let altitude = property("Altitude")
            .await
            .ok()
            .filter(|altitude| *altitude > f64::MIN)
            .unwrap_or(0.0);

        Ok(Position {
            accuracy: property("Accuracy").await.unwrap_or(0.0),
            altitude,
            speed: property("Speed").await.map_or(0.0, known),
            heading: property("Heading").await.map_or(0.0, known),
            ..Position::new(latitude, longitude, now_millis())
        })
    }

    async fn stop(&self) {
        if let Err(err) = self
            .connection
            .call_method(
                Some(SERVICE),
                self.path.as_str(),
                Some(CLIENT_INTERFACE),
                "Stop",
                &(),
            )
            .await
        {
            debug!("failed to stop GeoClue2 client: {err}");
        }
    }
}

/// Drives one client for a position update stream.
struct Tracker {
    desktop_id: String,
    request: Request,
    cache: FixCache,
    client: Option<Client>,
    last_location: Option<OwnedObjectPath>,
}

impl Tracker {
    async fn next_fix(&mut self) -> Result<Position, PlatformException> {
        let first = self.client.is_none();
        let client = match self.client.take() {
            Some(client) => client,
            None => Client::start(&self.desktop_id, &self.request).await?,
        };
        let fix = self.poll(&client, first).await;
        self.client = Some(client);

        let position = fix?;
        remember(&self.cache, &position);
        Ok(position)
    }

    /// Waits until GeoClue publishes a `Location` object not seen before.
    async fn poll(&mut self, client: &Client, first: bool) -> Result<Position, PlatformException> {
        let mut wait = !first;
        loop {
            if wait {
                Delay::new(self.request.interval).await;
            }
            wait = true;

            let Some(location) = client.location().await.map_err(update_failure)? else {
                continue;
            };
            if self.last_location.as_ref() == Some(&location) {
                continue;
            }
            let position = client.read(&location).await.map_err(update_failure)?;
            self.last_location = Some(location);
            return Ok(position);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
