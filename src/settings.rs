use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryConfig {
    fn upload() -> Self {
        Self {
            max_attempts: 8,
            base_delay_ms: 30_000,
            max_delay_ms: 3_600_000,
        }
    }

    fn generation() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::upload()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub segment_secs: u64,
    /// Relative paths resolve against the data directory.
    pub segment_dir: PathBuf,
    pub extension: String,
    /// Recorder program; `{path}` in `args` is replaced with the segment file path.
    pub program: String,
    pub args: Vec<String>,
    pub microphone_enabled: bool,
    pub auto_restart: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            segment_secs: 300,
            segment_dir: PathBuf::from("segments"),
            extension: "wav".into(),
            program: "arecord".into(),
            args: vec![
                "-q".into(),
                "-f".into(),
                "S16_LE".into(),
                "-r".into(),
                "16000".into(),
                "-c".into(),
                "1".into(),
                "{path}".into(),
            ],
            microphone_enabled: true,
            auto_restart: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NetworkConstraint {
    /// Any reachable network.
    Connected,
    /// Never drain; jobs only accumulate. Useful on metered links.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub endpoint: String,
    /// URL checked before draining; the upload endpoint when unset.
    pub reachability_url: Option<String>,
    pub retry: RetryConfig,
    pub attempt_timeout_secs: u64,
    pub lease_secs: u64,
    pub network: NetworkConstraint,
    pub drain_interval_secs: u64,
    pub max_parallel_destinations: usize,
}

impl UploadSettings {
    pub fn reachability_url(&self) -> &str {
        self.reachability_url.as_deref().unwrap_or(&self.endpoint)
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000/uploads".into(),
            reachability_url: None,
            retry: RetryConfig::upload(),
            attempt_timeout_secs: 120,
            lease_secs: 300,
            network: NetworkConstraint::Connected,
            drain_interval_secs: 60,
            max_parallel_destinations: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub interval_secs: u64,
    pub min_spacing_secs: u64,
    pub max_conversation_turns: usize,
    pub max_transcript_items: usize,
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub system_prompt: String,
    pub reachability_url: String,
    pub retry: RetryConfig,
    pub request_timeout_secs: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            interval_secs: 1_800,
            min_spacing_secs: 900,
            max_conversation_turns: 20,
            max_transcript_items: 30,
            endpoint: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            system_prompt: "You are a proactive personal assistant. Using the recent conversation, \
                            what was overheard, and the device context, offer one short, useful \
                            thought. Reply with null if there is nothing worth saying."
                .into(),
            reachability_url: "https://api.openai.com".into(),
            retry: RetryConfig::generation(),
            request_timeout_secs: 60,
        }
    }
}

/// Four contiguous movement bands in m/s: `[0, idle) [idle, walking) [walking, fast) [fast, ∞)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MovementThresholds {
    pub idle_below: f64,
    pub walking_below: f64,
    pub fast_below: f64,
}

impl Default for MovementThresholds {
    fn default() -> Self {
        Self {
            idle_below: 0.5,
            walking_below: 2.5,
            fast_below: 12.0,
        }
    }
}

impl MovementThresholds {
    pub fn validate(&self) -> Result<()> {
        let ordered = self.idle_below >= 0.0
            && self.idle_below < self.walking_below
            && self.walking_below < self.fast_below
            && self.fast_below.is_finite();
        if !ordered {
            bail!(
                "movement thresholds must satisfy 0 <= idle < walking < fast (got {} / {} / {})",
                self.idle_below,
                self.walking_below,
                self.fast_below
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub movement: MovementThresholds,
    pub location_permitted: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub weather_enabled: bool,
    pub weather_endpoint: String,
    pub battery_path: Option<PathBuf>,
    /// IIO device directory; discovered under `/sys/bus/iio/devices` when unset.
    pub accelerometer_path: Option<PathBuf>,
    pub motion_sample_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            movement: MovementThresholds::default(),
            location_permitted: false,
            latitude: None,
            longitude: None,
            weather_enabled: true,
            weather_endpoint: "https://api.open-meteo.com/v1/forecast".into(),
            battery_path: None,
            accelerometer_path: None,
            motion_sample_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackSettings {
    pub endpoint: String,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:9000/feedback".into(),
        }
    }
}

/// Upper bound on `uploaded_retention_days`; about a century.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub interval_secs: u64,
    pub uploaded_retention_days: i64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            uploaded_retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stable per-device namespace used in upload keys and as the `user` metadata value.
    pub device_namespace: String,
    pub desktop_notifications: bool,
    pub capture: CaptureSettings,
    pub upload: UploadSettings,
    pub generation: GenerationSettings,
    pub telemetry: TelemetrySettings,
    pub feedback: FeedbackSettings,
    pub maintenance: MaintenanceSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            device_namespace: "default-device".into(),
            desktop_notifications: false,
            capture: CaptureSettings::default(),
            upload: UploadSettings::default(),
            generation: GenerationSettings::default(),
            telemetry: TelemetrySettings::default(),
            feedback: FeedbackSettings::default(),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capture.segment_secs == 0 {
            bail!("capture.segment_secs must be greater than zero");
        }
        if self.device_namespace.trim().is_empty() {
            bail!("device_namespace must not be empty");
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.maintenance.uploaded_retention_days) {
            bail!(
                "maintenance.uploaded_retention_days must be between 0 and {MAX_RETENTION_DAYS} (got {})",
                self.maintenance.uploaded_retention_days
            );
        }
        self.telemetry.movement.validate()
    }
}

/// JSON-backed configuration file. Missing files are created with defaults.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<PipelineConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Config at {} is invalid ({err}); using defaults", path.display());
                PipelineConfig::default()
            })
        } else {
            PipelineConfig::default()
        };
        data.validate()
            .with_context(|| format!("invalid config at {}", path.display()))?;

        let store = Self {
            path,
            data: RwLock::new(data),
        };
        if !store.path.exists() {
            store.persist(&store.snapshot())?;
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> PipelineConfig {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn persist(&self, data: &PipelineConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }
}
