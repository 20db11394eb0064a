use std::collections::HashSet;

use npcspawn_utils::error::ConfigError;

use super::{BackendProfile, Config, MAX_DELAY_CEILING_SECS};

impl Config {
    /// Validate configuration values
    ///
    /// Tier chains may reference names that match no profile; the router logs
    /// and skips those at resolution time so a stale name never blocks startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(timeout) = self.defaults.timeout_secs {
            if timeout == 0 || timeout > 3600 {
                return Err(invalid("defaults.timeout_secs", "must be between 1 and 3600"));
            }
        }

        if let Some(max_tokens) = self.defaults.max_tokens {
            if max_tokens == 0 {
                return Err(invalid("defaults.max_tokens", "must be greater than 0"));
            }
        }

        if let Some(temperature) = self.defaults.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(invalid("defaults.temperature", "must be between 0.0 and 2.0"));
            }
        }

        if self.rate_limit.base_delay_secs == 0 {
            return Err(invalid("rate_limit.base_delay_secs", "must be greater than 0"));
        }
        if self.rate_limit.max_delay_secs < self.rate_limit.base_delay_secs {
            return Err(invalid(
                "rate_limit.max_delay_secs",
                "must be at least rate_limit.base_delay_secs",
            ));
        }
        if self.rate_limit.max_delay_secs > MAX_DELAY_CEILING_SECS {
            return Err(invalid(
                "rate_limit.max_delay_secs",
                &format!("must be at most {MAX_DELAY_CEILING_SECS}"),
            ));
        }

        validate_profile("default_backend", &self.default_backend)?;

        // Rate-limit state is keyed by name, so the default backend counts too
        let mut seen = HashSet::from([self.default_backend.name.as_str()]);
        for (index, profile) in self.profiles.iter().enumerate() {
            validate_profile(&format!("profiles[{index}]"), profile)?;
            if !seen.insert(profile.name.as_str()) {
                return Err(ConfigError::DuplicateProfile {
                    name: profile.name.clone(),
                });
            }
        }

        for (tier, names) in &self.tiers {
            if names.iter().any(|n| n.trim().is_empty()) {
                return Err(invalid(
                    &format!("tiers.{tier}"),
                    "profile names must not be empty",
                ));
            }
        }

        Ok(())
    }
}

fn validate_profile(key: &str, profile: &BackendProfile) -> Result<(), ConfigError> {
    if profile.name.trim().is_empty() {
        return Err(invalid(&format!("{key}.name"), "must not be empty"));
    }
    if let Some(url) = &profile.base_url {
        if !is_http_url(url) {
            return Err(invalid(
                &format!("{key}.base_url"),
                "must start with http:// or https://",
            ));
        }
    }
    if let Some(proxy) = &profile.proxy {
        if !is_http_url(proxy) {
            return Err(invalid(
                &format!("{key}.proxy"),
                "must start with http:// or https://",
            ));
        }
    }
    if let Some(temperature) = profile.temperature {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(invalid(
                &format!("{key}.temperature"),
                "must be between 0.0 and 2.0",
            ));
        }
    }
    if profile.max_tokens == Some(0) {
        return Err(invalid(&format!("{key}.max_tokens"), "must be greater than 0"));
    }
    Ok(())
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}
