//! Request options sent along with position calls and subscriptions.

use std::time::Duration;

use serde_json::{Map, Value, json};

/// Desired accuracy of position fixes, from coarsest to finest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LocationAccuracy {
    /// Roughly 3 km on iOS, 500 m on Android.
    Lowest,
    /// Roughly 1 km on iOS, 500 m on Android.
    Low,
    /// Roughly 100 m on iOS, 100-500 m on Android.
    Medium,
    /// Roughly 10 m on iOS, 0-100 m on Android.
    High,
    /// The best accuracy the device offers.
    #[default]
    Best,
    /// Best accuracy with additional sensor data, meant for navigation.
    BestForNavigation,
    /// Approximate location even when precise access was granted.
    Reduced,
}

impl LocationAccuracy {
    /// The numeric code the platform expects.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Lowest => 0,
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
            Self::Best => 4,
            Self::BestForNavigation => 5,
            Self::Reduced => 6,
        }
    }

    /// Looks up an accuracy by its numeric code.
    #[must_use]
    pub const fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Lowest,
            1 => Self::Low,
            2 => Self::Medium,
            3 => Self::High,
            4 => Self::Best,
            5 => Self::BestForNavigation,
            6 => Self::Reduced,
            _ => return None,
        })
    }
}

/// Notification shown while an Android foreground service keeps updates alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundNotificationConfig {
    /// Notification title.
    pub title: String,
    /// Notification body.
    pub text: String,
    /// Name of the notification channel.
    pub channel_name: String,
    /// Hold a partial wake lock while updates run.
    pub enable_wake_lock: bool,
    /// Hold a Wi-Fi lock while updates run.
    pub enable_wifi_lock: bool,
    /// Make the notification non-dismissible.
    pub set_ongoing: bool,
}

impl ForegroundNotificationConfig {
    /// Creates a config with the default channel name and no locks.
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            channel_name: "Background Location".to_owned(),
            enable_wake_lock: false,
            enable_wifi_lock: false,
            set_ongoing: false,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "notificationTitle": self.title,
            "notificationText": self.text,
            "notificationChannelName": self.channel_name,
            "enableWakeLock": self.enable_wake_lock,
            "enableWifiLock": self.enable_wifi_lock,
            "setOngoing": self.set_ongoing,
        })
    }
}

/// Options only honored by the Android implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AndroidSettings {
    /// Minimum time between updates.
    pub interval: Option<Duration>,
    /// Use the legacy `LocationManager` instead of the fused provider.
    pub force_location_manager: bool,
    /// Keep updates running from a foreground service.
    pub foreground_notification: Option<ForegroundNotificationConfig>,
    /// Report altitude above mean sea level.
    pub use_msl_altitude: bool,
}

/// Kind of activity the app tracks, used by iOS to pause updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ActivityType {
    /// Unknown activity.
    #[default]
    Other,
    /// Car navigation.
    AutomotiveNavigation,
    /// Walking, running, cycling.
    Fitness,
    /// Boat, train or other non-car navigation.
    OtherNavigation,
    /// Flight.
    Airborne,
}

impl ActivityType {
    const fn code(self) -> u8 {
        match self {
            Self::Other => 0,
            Self::AutomotiveNavigation => 1,
            Self::Fitness => 2,
            Self::OtherNavigation => 3,
            Self::Airborne => 4,
        }
    }
}

/// Options only honored by the iOS and macOS implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppleSettings {
    /// Let the system pause updates when the device stops moving.
    pub pause_location_updates_automatically: bool,
    /// Activity hint for automatic pausing.
    pub activity_type: ActivityType,
    /// Show the blue status bar indicator during background updates.
    pub show_background_location_indicator: bool,
    /// Keep updates running while the app is in the background.
    pub allow_background_location_updates: bool,
}

impl Default for AppleSettings {
    fn default() -> Self {
        Self {
            pause_location_updates_automatically: false,
            activity_type: ActivityType::Other,
            show_background_location_indicator: false,
            allow_background_location_updates: true,
        }
    }
}

/// Platform-specific extras attached to [`LocationSettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlatformSettings {
    /// Only the common options.
    #[default]
    Common,
    /// Android extras.
    Android(AndroidSettings),
    /// Apple extras.
    Apple(AppleSettings),
}

/// Options for position requests and subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationSettings {
    /// Desired accuracy.
    pub accuracy: LocationAccuracy,
    /// Minimum horizontal movement in meters before an update is emitted;
    /// zero disables filtering.
    pub distance_filter: u32,
    /// Maximum time to wait for a reply or the next stream event.
    pub time_limit: Option<Duration>,
    /// Platform-specific extras.
    pub platform: PlatformSettings,
}

impl LocationSettings {
    /// Settings with the given accuracy and defaults elsewhere.
    #[must_use]
    pub fn with_accuracy(accuracy: LocationAccuracy) -> Self {
        Self {
            accuracy,
            ..Self::default()
        }
    }

    /// Sets the time limit.
    #[must_use]
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }

    /// Sets the distance filter in meters.
    #[must_use]
    pub fn distance_filter(mut self, meters: u32) -> Self {
        self.distance_filter = meters;
        self
    }

    /// Attaches Android extras.
    #[must_use]
    pub fn android(mut self, android: AndroidSettings) -> Self {
        self.platform = PlatformSettings::Android(android);
        self
    }

    /// Attaches Apple extras.
    #[must_use]
    pub fn apple(mut self, apple: AppleSettings) -> Self {
        self.platform = PlatformSettings::Apple(apple);
        self
    }

    /// Encodes the settings into the argument map sent to the platform.
    #[must_use]
    pub fn to_arguments(&self) -> Value {
        let mut map = Map::new();
        map.insert("accuracy".into(), json!(self.accuracy.code()));
        map.insert("distanceFilter".into(), json!(self.distance_filter));
        map.insert(
            "timeLimit".into(),
            self.time_limit
                .map_or(Value::Null, |limit| json!(duration_micros(limit))),
        );

        match &self.platform {
            PlatformSettings::Common => {}
            PlatformSettings::Android(android) => {
                map.insert(
                    "forceLocationManager".into(),
                    json!(android.force_location_manager),
                );
                map.insert(
                    "timeInterval".into(),
                    android
                        .interval
                        .map_or(Value::Null, |interval| json!(duration_millis(interval))),
                );
                map.insert(
                    "foregroundNotificationConfig".into(),
                    android
                        .foreground_notification
                        .as_ref()
                        .map_or(Value::Null, ForegroundNotificationConfig::to_value),
                );
                map.insert("useMSLAltitude".into(), json!(android.use_msl_altitude));
            }
            PlatformSettings::Apple(apple) => {
                map.insert(
                    "pauseLocationUpdatesAutomatically".into(),
                    json!(apple.pause_location_updates_automatically),
                );
                map.insert("activityType".into(), json!(apple.activity_type.code()));
                map.insert(
                    "showBackgroundLocationIndicator".into(),
                    json!(apple.show_background_location_indicator),
                );
                map.insert(
                    "allowBackgroundLocationUpdates".into(),
                    json!(apple.allow_background_location_updates),
                );
            }
        }

        Value::Object(map)
    }
}

fn duration_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
