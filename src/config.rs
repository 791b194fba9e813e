//! Simulator configuration.
//!
//! Values are passed to every simulator at construction time so several
//! instances with different settings can coexist in one process. They can
//! be built from defaults, from environment variables, or from a JSON file:
//! - `STREAMSTATE_DIFF_BUFFER_LIMIT` — Binance diffs buffered per symbol
//!   before the REST snapshot arrives
//! - `STREAMSTATE_BINANCE_PRICE_PRECISION` — decimals in replayed prices
//! - `STREAMSTATE_BINANCE_QUANTITY_PRECISION` — decimals in replayed sizes

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::StreamStateError;

/// Default number of Binance diffs buffered per symbol.
pub const DEFAULT_DIFF_BUFFER_LIMIT: usize = 100;

/// Default decimal places Binance uses for prices and quantities.
pub const DEFAULT_BINANCE_PRECISION: u32 = 8;

const ENV_DIFF_BUFFER_LIMIT: &str = "STREAMSTATE_DIFF_BUFFER_LIMIT";
const ENV_BINANCE_PRICE_PRECISION: &str = "STREAMSTATE_BINANCE_PRICE_PRECISION";
const ENV_BINANCE_QUANTITY_PRECISION: &str = "STREAMSTATE_BINANCE_QUANTITY_PRECISION";

/// Settings shared by every simulator implementation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Maximum Binance diffs held while waiting for the REST depth.
    pub diff_buffer_limit: usize,
    /// Decimal places used for prices in Binance replay lines.
    pub binance_price_precision: u32,
    /// Decimal places used for quantities in Binance replay lines.
    pub binance_quantity_precision: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            diff_buffer_limit: DEFAULT_DIFF_BUFFER_LIMIT,
            binance_price_precision: DEFAULT_BINANCE_PRECISION,
            binance_quantity_precision: DEFAULT_BINANCE_PRECISION,
        }
    }
}

impl SimulatorConfig {
    /// Builds a configuration from environment variables, falling back to
    /// defaults for every variable that is unset or empty.
    ///
    /// # Errors
    ///
    /// Returns [`StreamStateError::Config`] if a variable is set to a value
    /// that cannot be parsed.
    pub fn from_env() -> crate::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            diff_buffer_limit: parsed_var(ENV_DIFF_BUFFER_LIMIT)?
                .unwrap_or(defaults.diff_buffer_limit),
            binance_price_precision: parsed_var(ENV_BINANCE_PRICE_PRECISION)?
                .unwrap_or(defaults.binance_price_precision),
            binance_quantity_precision: parsed_var(ENV_BINANCE_QUANTITY_PRECISION)?
                .unwrap_or(defaults.binance_quantity_precision),
        })
    }

    /// Loads the configuration from a JSON file. Missing fields keep their
    /// default values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            StreamStateError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        Ok(config)
    }
}

/// Returns the value of an environment variable if it exists and is non-empty.
fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: FromStr>(name: &str) -> crate::Result<Option<T>> {
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| StreamStateError::Config(format!("{name} has invalid value '{raw}'"))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Helper that temporarily sets env vars, runs `f`, then restores originals.
    ///
    /// Holds [`ENV_LOCK`] for the duration so env tests never interleave.
    fn with_env<F: FnOnce()>(vars: &[(&str, Option<&str>)], f: F) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let originals: Vec<(&str, Option<String>)> = vars
            .iter()
            .map(|(k, _)| (*k, std::env::var(k).ok()))
            .collect();

        for (k, v) in vars {
            // SAFETY: serialized by ENV_LOCK; no other test reads these vars.
            unsafe {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }

        f();

        for (k, original) in originals {
            // SAFETY: restoring original values, same context as above.
            unsafe {
                match original {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    #[test]
    fn defaults_without_env_vars() {
        with_env(
            &[
                (ENV_DIFF_BUFFER_LIMIT, None),
                (ENV_BINANCE_PRICE_PRECISION, None),
                (ENV_BINANCE_QUANTITY_PRECISION, None),
            ],
            || {
                let config = SimulatorConfig::from_env().unwrap();
                assert_eq!(config, SimulatorConfig::default());
                assert_eq!(config.diff_buffer_limit, 100);
            },
        );
    }

    #[test]
    fn reads_overrides_and_treats_empty_as_absent() {
        with_env(
            &[
                (ENV_DIFF_BUFFER_LIMIT, Some("250")),
                (ENV_BINANCE_PRICE_PRECISION, Some("2")),
                (ENV_BINANCE_QUANTITY_PRECISION, Some("")),
            ],
            || {
                let config = SimulatorConfig::from_env().unwrap();
                assert_eq!(config.diff_buffer_limit, 250);
                assert_eq!(config.binance_price_precision, 2);
                assert_eq!(config.binance_quantity_precision, DEFAULT_BINANCE_PRECISION);
            },
        );
    }

    #[test]
    fn rejects_unparseable_values() {
        with_env(
            &[
                (ENV_DIFF_BUFFER_LIMIT, Some("lots")),
                (ENV_BINANCE_PRICE_PRECISION, None),
                (ENV_BINANCE_QUANTITY_PRECISION, None),
            ],
            || {
                let err = SimulatorConfig::from_env().unwrap_err();
                assert!(err.to_string().contains(ENV_DIFF_BUFFER_LIMIT));
            },
        );
    }

    #[test]
    fn loads_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"diff_buffer_limit": 5}}"#).unwrap();

        let config = SimulatorConfig::load(file.path()).unwrap();
        assert_eq!(config.diff_buffer_limit, 5);
        assert_eq!(config.binance_price_precision, DEFAULT_BINANCE_PRECISION);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = SimulatorConfig::load(Path::new("/nonexistent/streamstate.json")).unwrap_err();
        assert!(matches!(err, StreamStateError::Config(_)));
    }
}
