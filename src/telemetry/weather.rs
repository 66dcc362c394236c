use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PipelineError, PipelineResult};

#[async_trait]
pub trait WeatherLookup: Send + Sync {
    /// One round trip; returns a short human-readable summary.
    async fn summary(&self, latitude: f64, longitude: f64) -> PipelineResult<Option<String>>;
}

/// Current conditions from the Open-Meteo forecast API (no key required).
pub struct OpenMeteoWeather {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenMeteoWeather {
    pub fn new(endpoint: impl Into<String>) -> PipelineResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| PipelineError::Other(anyhow::anyhow!("http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Deserialize)]
struct ForecastResponse {
    current_weather: Option<CurrentWeather>,
}

#[derive(Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
    weathercode: i64,
}

fn describe(code: i64) -> &'static str {
    match code {
        0 => "clear sky",
        1..=3 => "partly cloudy",
        45 | 48 => "fog",
        51..=57 => "drizzle",
        61..=67 => "rain",
        71..=77 => "snow",
        80..=82 => "rain showers",
        85 | 86 => "snow showers",
        95..=99 => "thunderstorm",
        _ => "unknown conditions",
    }
}

#[async_trait]
impl WeatherLookup for OpenMeteoWeather {
    async fn summary(&self, latitude: f64, longitude: f64) -> PipelineResult<Option<String>> {
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current_weather", "true".to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PipelineError::transient(format!(
                "weather lookup returned {}",
                response.status()
            )));
        }
        let body: ForecastResponse = response.json().await?;
        Ok(body.current_weather.map(|current| {
            format!(
                "{}, {:.0}°C, wind {:.0} km/h",
                describe(current.weathercode),
                current.temperature,
                current.windspeed
            )
        }))
    }
}
