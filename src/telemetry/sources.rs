use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::debug;

use super::movement::speed_from_deltas;

const MOTION_WINDOW: usize = 16;

/// Locally cached device signals. Every source may come up empty; none of them fail.
pub trait BatterySource: Send + Sync {
    fn battery_percent(&self) -> Option<u8>;
}

pub trait LocationSource: Send + Sync {
    /// Last known `(latitude, longitude)`.
    fn last_known(&self) -> Option<(f64, f64)>;
}

pub trait MotionSource: Send + Sync {
    /// Accelerometer-derived speed scalar, if a sensor is present.
    fn current_speed(&self) -> Option<f64>;
}

/// Reads `capacity` from the first `/sys/class/power_supply/BAT*` entry.
pub struct SysfsBattery {
    path: Option<PathBuf>,
}

impl SysfsBattery {
    pub fn new(explicit: Option<PathBuf>) -> Self {
        let path = explicit.or_else(|| find_battery(Path::new("/sys/class/power_supply")));
        if path.is_none() {
            debug!("no battery found; battery level will be omitted");
        }
        Self { path }
    }
}

fn find_battery(root: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().starts_with("BAT"))
                .unwrap_or(false)
        })
        .collect();
    entries.sort();
    entries.into_iter().next().map(|dir| dir.join("capacity"))
}

impl BatterySource for SysfsBattery {
    fn battery_percent(&self) -> Option<u8> {
        let raw = std::fs::read_to_string(self.path.as_ref()?).ok()?;
        raw.trim().parse::<u8>().ok().map(|pct| pct.min(100))
    }
}

/// A configured location, for hosts without a positioning service.
pub struct FixedLocation {
    coordinates: Option<(f64, f64)>,
}

impl FixedLocation {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>) -> Self {
        let coordinates = match (latitude, longitude) {
            (Some(lat), Some(lon)) if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) => {
                Some((lat, lon))
            }
            _ => None,
        };
        Self { coordinates }
    }
}

impl LocationSource for FixedLocation {
    fn last_known(&self) -> Option<(f64, f64)> {
        self.coordinates
    }
}

/// Hosts without an accelerometer.
#[derive(Debug, Default)]
pub struct NoMotionSensor;

impl MotionSource for NoMotionSensor {
    fn current_speed(&self) -> Option<f64> {
        None
    }
}

/// Linux IIO accelerometer (`/sys/bus/iio/devices/iio:deviceN`). `poll` stores one magnitude
/// reading; `current_speed` reports the mean change over the newest readings.
pub struct IioAccelerometer {
    device: PathBuf,
    interval: Duration,
    window: Mutex<VecDeque<f64>>,
}

impl IioAccelerometer {
    pub fn new(device: PathBuf, interval: Duration) -> Self {
        Self {
            device,
            interval,
            window: Mutex::new(VecDeque::with_capacity(MOTION_WINDOW)),
        }
    }

    /// Use `explicit` if given, else the first IIO device exposing accelerometer channels.
    pub fn discover(explicit: Option<PathBuf>, interval: Duration) -> Option<Self> {
        let device = explicit.or_else(|| find_accelerometer(Path::new("/sys/bus/iio/devices")));
        match device {
            Some(device) => Some(Self::new(device, interval)),
            None => {
                debug!("no accelerometer found; movement will be unknown");
                None
            }
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take one reading. Returns `false` when the device could not be read.
    pub fn poll(&self) -> bool {
        let Some(magnitude) = self.read_magnitude() else {
            return false;
        };
        let Ok(mut window) = self.window.lock() else {
            return false;
        };
        if window.len() == MOTION_WINDOW {
            window.pop_front();
        }
        window.push_back(magnitude);
        true
    }

    fn read_magnitude(&self) -> Option<f64> {
        let scale = read_f64(&self.device.join("in_accel_scale")).unwrap_or(1.0);
        let mut sum = 0.0;
        for axis in ["x", "y", "z"] {
            let raw = read_f64(&self.device.join(format!("in_accel_{axis}_raw")))?;
            sum += (raw * scale).powi(2);
        }
        Some(sum.sqrt())
    }
}

impl MotionSource for IioAccelerometer {
    fn current_speed(&self) -> Option<f64> {
        let window = self.window.lock().ok()?;
        let magnitudes: Vec<f64> = window.iter().copied().collect();
        speed_from_deltas(&magnitudes, self.interval.as_secs_f64())
    }
}

fn find_accelerometer(root: &Path) -> Option<PathBuf> {
    let mut devices: Vec<PathBuf> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.join("in_accel_x_raw").is_file())
        .collect();
    devices.sort();
    devices.into_iter().next()
}

fn read_f64(path: &Path) -> Option<f64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}
