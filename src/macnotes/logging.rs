//! Logger bootstrap for the `notes` binary.
//!
//! Logs go to stderr. The level is `warn` by default and `debug` with `--debug`;
//! `RUST_LOG` overrides both. Initialization happens at most once per process.

use flexi_logger::{Logger, LoggerHandle};
use log::debug;
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<(&'static str, LoggerHandle)> = OnceCell::new();

pub const DEFAULT_LEVEL: &str = "warn";
pub const DEBUG_LEVEL: &str = "debug";

pub fn level_for(debug: bool) -> &'static str {
    if debug {
        DEBUG_LEVEL
    } else {
        DEFAULT_LEVEL
    }
}

/// Start logging at `level`. Repeated calls are no-ops as long as the level matches.
pub fn init_logging(level: &'static str) -> Result<(), String> {
    if let Some((active, _)) = LOGGER.get() {
        if *active != level {
            return Err(format!(
                "logging already initialized with level `{}`; refusing to switch to `{}`",
                active, level
            ));
        }
        return Ok(());
    }

    LOGGER.get_or_try_init(|| -> Result<_, String> {
        let handle = Logger::try_with_env_or_str(level)
            .map_err(|err| format!("invalid log level `{level}`: {err}"))?
            .log_to_stderr()
            .format(flexi_logger::default_format)
            .start()
            .map_err(|err| format!("failed to start logger: {err}"))?;
        debug!(
            "event=app_start version={} level={}",
            env!("CARGO_PKG_VERSION"),
            level
        );
        Ok((level, handle))
    })?;
    Ok(())
}
