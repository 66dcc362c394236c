//! Logger setup plus conditional logging macros gated by a module-level `ENABLE_LOGS` flag.
//!
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//!
//! log_info!("segment {id} queued");
//! ```

/// Initialize `env_logger` once for the process.
///
/// `RUST_LOG` wins when set. Otherwise the default level is `info`, or `debug`
/// when `THOUGHTSTREAM_DEBUG` is `1`/`true`.
pub fn init_logging() {
    let debug_mode = std::env::var("THOUGHTSTREAM_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let default_level = if debug_mode {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level);
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }

    // A second init (tests, embedding hosts) is not an error.
    let _ = builder.try_init();
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_gated {
    ($level:ident, $($arg:tt)*) => {
        if ENABLE_LOGS {
            log::$level!($($arg)*);
        }
    };
}

/// `log::debug!` when the calling module sets `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => { $crate::__log_gated!(debug, $($arg)*) };
}

/// `log::info!` when the calling module sets `ENABLE_LOGS`.
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => { $crate::__log_gated!(info, $($arg)*) };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => { $crate::__log_gated!(warn, $($arg)*) };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => { $crate::__log_gated!(error, $($arg)*) };
}
