mod movement;
mod sampler;
mod sources;
mod weather;

pub use movement::{classify, speed_from_deltas, MovementClass};
pub use sampler::{TelemetrySampler, TelemetrySnapshot};
pub use sources::{
    BatterySource, FixedLocation, IioAccelerometer, LocationSource, MotionSource, NoMotionSensor,
    SysfsBattery,
};
pub use weather::{OpenMeteoWeather, WeatherLookup};
