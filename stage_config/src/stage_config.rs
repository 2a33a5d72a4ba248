use crate::groups;

/// Primary configuration struct containing all config sections
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    pub client: groups::client::ConfigValues,
    pub location: groups::location::ConfigValues,
    pub batch: groups::batch::ConfigValues,
    pub log: groups::log::ConfigValues,
}

impl StageConfig {
    /// Create a new StageConfig with default values and environment variable overrides applied.
    /// This is equivalent to `StageConfig::default().with_env_overrides()`.
    pub fn new() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment variable overrides to all configuration sections.
    /// Environment variables follow the pattern: TAPESTAGE_{GROUP_NAME}_{FIELD_NAME}
    pub fn with_env_overrides(mut self) -> Self {
        self.client.apply_env_overrides();
        self.location.apply_env_overrides();
        self.batch.apply_env_overrides();
        self.log.apply_env_overrides();
        self
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serial_test::serial;
    use utils::EnvVarGuard;

    use super::*;

    #[test]
    #[serial]
    fn test_defaults() {
        let config = StageConfig::default();
        assert_eq!(config.client.endpoint, "https://fndca.fnal.gov:3880/api/v1/namespace");
        assert!(config.client.credential_path.is_empty());
        assert_eq!(config.location.tape_scheme, "enstore");
        assert_eq!(config.batch.progress_announce_threshold, 50);
        assert_eq!(config.batch.cache_list_path, "cache_list.txt");
    }

    #[test]
    #[serial]
    fn test_env_override() {
        let _g1 = EnvVarGuard::set("TAPESTAGE_CLIENT_MAX_CONCURRENT_REQUESTS", "4");
        let _g2 = EnvVarGuard::set("TAPESTAGE_CLIENT_REQUEST_TIMEOUT", "45s");
        let _g3 = EnvVarGuard::set("TAPESTAGE_BATCH_CACHE_LIST_PATH", "/tmp/out.txt");

        let config = StageConfig::new();
        assert_eq!(config.client.max_concurrent_requests, 4);
        assert_eq!(config.client.request_timeout, Duration::from_secs(45));
        assert_eq!(config.batch.cache_list_path, "/tmp/out.txt");
    }

    #[test]
    #[serial]
    fn test_unparsable_override_keeps_default() {
        let _g = EnvVarGuard::set("TAPESTAGE_CLIENT_RETRY_MAX_ATTEMPTS", "lots");
        let config = StageConfig::new();
        assert_eq!(config.client.retry_max_attempts, 3);
    }

    #[test]
    #[serial]
    fn test_credential_path_alias() {
        let _primary = EnvVarGuard::remove("TAPESTAGE_CLIENT_CREDENTIAL_PATH");
        let _alias = EnvVarGuard::set("X509_USER_PROXY", "/tmp/x509up_u4242");
        assert_eq!(StageConfig::new().client.credential_path, "/tmp/x509up_u4242");

        // The primary name wins over the alias.
        let _primary = EnvVarGuard::set("TAPESTAGE_CLIENT_CREDENTIAL_PATH", "/etc/proxy.pem");
        assert_eq!(StageConfig::new().client.credential_path, "/etc/proxy.pem");
    }
}
