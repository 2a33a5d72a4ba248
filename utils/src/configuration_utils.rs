use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

/// A value that can be read out of an environment variable, falling back to a default
/// when the variable is unset or does not parse.
pub trait ParsableConfigValue: Sized {
    fn parse_user_value(value: &str) -> Option<Self>;

    /// Parse `value` if present; otherwise (or on a parse failure) return `default`.
    fn parse(variable_name: &str, value: Option<String>, default: Self) -> Self {
        let Some(v) = value else {
            return default;
        };

        match Self::parse_user_value(&v) {
            Some(parsed) => {
                info!("Config: {variable_name} set to {v} from environment.");
                parsed
            },
            None => {
                warn!("Configuration value {v} for {variable_name} cannot be parsed into correct type; reverting to default.");
                default
            },
        }
    }
}

impl ParsableConfigValue for usize {
    fn parse_user_value(value: &str) -> Option<Self> {
        usize::from_str(value.trim()).ok()
    }
}

impl ParsableConfigValue for String {
    fn parse_user_value(value: &str) -> Option<Self> {
        Some(value.to_owned())
    }
}

/// Durations accept humantime syntax ("500ms", "2m 30s") or a bare number of seconds.
impl ParsableConfigValue for Duration {
    fn parse_user_value(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(secs) = u64::from_str(value) {
            return Some(Duration::from_secs(secs));
        }
        humantime::parse_duration(value).ok()
    }
}
