use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::settings::MovementThresholds;

use super::movement::{classify, MovementClass};
use super::sources::{BatterySource, LocationSource, MotionSource};
use super::weather::WeatherLookup;

/// Point-in-time device and environment signals. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub battery_percent: Option<u8>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub movement: MovementClass,
    pub weather_summary: Option<String>,
}

impl TelemetrySnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

pub struct TelemetrySampler {
    battery: Arc<dyn BatterySource>,
    location: Arc<dyn LocationSource>,
    motion: Arc<dyn MotionSource>,
    weather: Option<Arc<dyn WeatherLookup>>,
    thresholds: MovementThresholds,
    location_permitted: bool,
}

impl TelemetrySampler {
    pub fn new(
        battery: Arc<dyn BatterySource>,
        location: Arc<dyn LocationSource>,
        motion: Arc<dyn MotionSource>,
        thresholds: MovementThresholds,
    ) -> Self {
        Self {
            battery,
            location,
            motion,
            weather: None,
            thresholds,
            location_permitted: false,
        }
    }

    pub fn with_weather(mut self, weather: Arc<dyn WeatherLookup>) -> Self {
        self.weather = Some(weather);
        self
    }

    pub fn with_location_permission(mut self, permitted: bool) -> Self {
        self.location_permitted = permitted;
        self
    }

    /// Build a snapshot from cached signals plus at most one weather round trip.
    /// Missing permission, location, or a failed lookup only leave fields empty.
    pub async fn sample(&self) -> TelemetrySnapshot {
        let coordinates = if self.location_permitted {
            self.location.last_known()
        } else {
            debug!("location permission absent; omitting location");
            None
        };

        let movement = self
            .motion
            .current_speed()
            .map(|speed| classify(speed, &self.thresholds))
            .unwrap_or(MovementClass::Unknown);

        let weather_summary = match (coordinates, &self.weather) {
            (Some((lat, lon)), Some(weather)) => match weather.summary(lat, lon).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!("weather lookup failed, continuing without it: {err}");
                    None
                }
            },
            _ => None,
        };

        TelemetrySnapshot {
            timestamp: Utc::now(),
            battery_percent: self.battery.battery_percent(),
            latitude: coordinates.map(|(lat, _)| lat),
            longitude: coordinates.map(|(_, lon)| lon),
            movement,
            weather_summary,
        }
    }
}
