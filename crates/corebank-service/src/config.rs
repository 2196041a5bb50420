use corebank_aml::RuleDefinition;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unrecognized configuration key '{0}'")]
    UnknownKey(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Platform configuration. The recognized key set is closed; anything else
/// is rejected instead of silently ignored.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub saga_step_timeout_secs: i64,
    pub saga_recovery_interval_secs: u64,
    pub saga_stuck_threshold_secs: i64,
    pub aml_flag_threshold: u8,
    pub aml_rules: Option<Vec<RuleDefinition>>,
    pub swift_fee_fixed_minor: i64,
    pub swift_fee_percentage_bps: i64,
    pub ratelimit_default_rpm: u32,
    pub ratelimit_auth_rpm: u32,
    pub auth_failed_attempts_lock: u32,
    pub otp_ttl_secs: i64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            saga_step_timeout_secs: 30,
            saga_recovery_interval_secs: 60,
            saga_stuck_threshold_secs: 3_600,
            aml_flag_threshold: 30,
            aml_rules: None,
            swift_fee_fixed_minor: 2_500,
            swift_fee_percentage_bps: 10,
            ratelimit_default_rpm: 100,
            ratelimit_auth_rpm: 10,
            auth_failed_attempts_lock: 5,
            otp_ttl_secs: 300,
        }
    }
}

impl PlatformConfig {
    /// Apply `key=value` overrides on top of the defaults.
    pub fn from_overrides<'a, I>(overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut config = Self::default();
        for (key, value) in overrides {
            config.apply(key, value)?;
        }
        Ok(config)
    }

    pub fn apply(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        match key {
            "saga.step_timeout" => {
                self.saga_step_timeout_secs =
                    value.parse().map_err(|_| invalid("expected seconds"))?;
            }
            "saga.recovery_interval" => {
                self.saga_recovery_interval_secs =
                    value.parse().map_err(|_| invalid("expected seconds"))?;
            }
            "saga.stuck_threshold" => {
                self.saga_stuck_threshold_secs =
                    value.parse().map_err(|_| invalid("expected seconds"))?;
            }
            "aml.flag_threshold" => {
                self.aml_flag_threshold =
                    value.parse().map_err(|_| invalid("expected 0..=100"))?;
            }
            "aml.rules" => {
                let rules: Vec<RuleDefinition> = serde_json::from_str(value)
                    .map_err(|e| invalid(&format!("expected a JSON rule array: {e}")))?;
                self.aml_rules = Some(rules);
            }
            "swift.fees.fixed" => {
                self.swift_fee_fixed_minor =
                    value.parse().map_err(|_| invalid("expected minor units"))?;
            }
            "swift.fees.percentage" => {
                self.swift_fee_percentage_bps =
                    value.parse().map_err(|_| invalid("expected basis points"))?;
            }
            "ratelimit.default_rpm" => {
                self.ratelimit_default_rpm =
                    value.parse().map_err(|_| invalid("expected requests/min"))?;
            }
            "ratelimit.auth_rpm" => {
                self.ratelimit_auth_rpm =
                    value.parse().map_err(|_| invalid("expected requests/min"))?;
            }
            "auth.failed_attempts_lock" => {
                self.auth_failed_attempts_lock =
                    value.parse().map_err(|_| invalid("expected a count"))?;
            }
            "otp.ttl" => {
                self.otp_ttl_secs = value.parse().map_err(|_| invalid("expected seconds"))?;
            }
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = PlatformConfig::default();
        assert_eq!(config.aml_flag_threshold, 30);
        assert_eq!(config.ratelimit_default_rpm, 100);
        assert_eq!(config.ratelimit_auth_rpm, 10);
        assert_eq!(config.auth_failed_attempts_lock, 5);
        assert_eq!(config.otp_ttl_secs, 300);
        assert_eq!(config.saga_stuck_threshold_secs, 3_600);
    }

    #[test]
    fn overrides_apply_and_unknown_keys_fail() {
        let config = PlatformConfig::from_overrides(vec![
            ("aml.flag_threshold", "40"),
            ("swift.fees.fixed", "1000"),
        ])
        .unwrap();
        assert_eq!(config.aml_flag_threshold, 40);
        assert_eq!(config.swift_fee_fixed_minor, 1_000);

        let err = PlatformConfig::from_overrides(vec![("aml.flag_treshold", "40")]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey(_)));
    }

    #[test]
    fn malformed_values_are_invalid() {
        let err = PlatformConfig::from_overrides(vec![("otp.ttl", "five minutes")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
