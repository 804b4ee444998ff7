use std::collections::HashSet;

use serde::Deserialize;
use tanggap_domain::engine::EngineConfig;
use tanggap_domain::gateway::ReadRetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub log_level: String,
    pub staff_group: String,
    pub page_chunk_size: usize,
    pub read_retry_attempts: u32,
    pub read_retry_base_ms: u64,
    pub read_retry_max_ms: u64,
    pub notification_dedupe_capacity: usize,
    pub subject_id: String,
    /// Comma separated group claims of the configured subject.
    pub subject_groups: String,
    pub push_id_only: bool,
    pub queue_poll_interval_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = Self::builder()?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    fn builder() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError>
    {
        config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("log_level", "info")?
            .set_default("staff_group", "Admin")?
            .set_default("page_chunk_size", 25)?
            .set_default("read_retry_attempts", 3)?
            .set_default("read_retry_base_ms", 100)?
            .set_default("read_retry_max_ms", 2000)?
            .set_default("notification_dedupe_capacity", 1024)?
            .set_default("subject_id", "local-member")?
            .set_default("subject_groups", "")?
            .set_default("push_id_only", false)?
            .set_default("queue_poll_interval_ms", 30000)
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn subject_group_set(&self) -> HashSet<String> {
        self.subject_groups
            .split(',')
            .map(str::trim)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            staff_group: self.staff_group.clone(),
            page_chunk_size: self.page_chunk_size.max(1),
            read_retry: ReadRetryPolicy {
                attempts: self.read_retry_attempts.max(1),
                base_ms: self.read_retry_base_ms,
                max_ms: self.read_retry_max_ms.max(self.read_retry_base_ms),
            },
            notification_dedupe_capacity: self.notification_dedupe_capacity.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> AppConfig {
        AppConfig::builder()
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_deserialize_into_engine_config() {
        let config = defaults();
        let engine = config.engine_config();

        assert!(!config.is_production());
        assert_eq!(engine.staff_group, "Admin");
        assert_eq!(engine.page_chunk_size, 25);
        assert_eq!(engine.read_retry.attempts, 3);
        assert!(config.subject_group_set().is_empty());
    }

    #[test]
    fn group_claims_are_split_and_trimmed() {
        let config = AppConfig {
            subject_groups: " Admin, ,ops ".into(),
            ..defaults()
        };
        let groups = config.subject_group_set();
        assert_eq!(groups.len(), 2);
        assert!(groups.contains("Admin"));
        assert!(groups.contains("ops"));
    }

    #[test]
    fn degenerate_values_are_clamped() {
        let config = AppConfig {
            page_chunk_size: 0,
            read_retry_attempts: 0,
            read_retry_base_ms: 500,
            read_retry_max_ms: 10,
            ..defaults()
        };
        let engine = config.engine_config();
        assert_eq!(engine.page_chunk_size, 1);
        assert_eq!(engine.read_retry.attempts, 1);
        assert_eq!(engine.read_retry.max_ms, 500);
    }
}
