mod aliases;
pub use aliases::ENVIRONMENT_NAME_ALIASES;

pub mod macros;
pub mod stage_config;

pub mod groups;

// Re-exported for use inside the config_group macro
pub use utils::configuration_utils::ParsableConfigValue;
pub use stage_config::StageConfig;

pub type ClientConfig = groups::client::ConfigValues;
pub type LocationConfig = groups::location::ConfigValues;
pub type BatchConfig = groups::batch::ConfigValues;
pub type LogConfig = groups::log::ConfigValues;
