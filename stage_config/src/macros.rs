/// Macro to create a configuration value group struct.
///
/// Usage:
/// ```ignore
/// use stage_config::config_group;
///
/// config_group!({
///     ref request_timeout: Duration = Duration::from_secs(120);
///     ref endpoint: String = "https://localhost:3880/api/v1/namespace".to_string();
/// });
/// ```
///
/// This creates a `ConfigValueGroup` struct with the specified fields. Defaults come from the
/// declared expressions; `apply_env_overrides` then reads `TAPESTAGE_{GROUP}_{FIELD}`, where the
/// group name is the last segment of the declaring module's path.
#[macro_export]
macro_rules! config_group {
    ({
        $(
            $(#[$meta:meta])*
            ref $name:ident : $type:ty = $value:expr;
        )+
    }) => {
        #[allow(unused_imports)]
        use $crate::ParsableConfigValue;

        /// Name of this configuration struct, accessible for macro generation
        pub const CONFIG_VALUES_NAME: &str = "ConfigValueGroup";

        /// ConfigValueGroup struct containing all configurable values
        #[derive(Debug, Clone)]
        pub struct ConfigValueGroup {
            $(
                $(#[$meta])*
                #[allow(non_snake_case)]
                pub $name: $type,
            )+
        }

        impl Default for ConfigValueGroup {
            /// Create a new instance with default values only (no environment variable overrides).
            fn default() -> Self {
                Self {
                    $(
                        $name: {
                            let v: $type = $value;
                            v
                        },
                    )+
                }
            }
        }

        impl AsRef<ConfigValueGroup> for ConfigValueGroup {
            fn as_ref(&self) -> &ConfigValueGroup {
                self
            }
        }

        impl ConfigValueGroup {
            /// Create a new instance with default values only (no environment variable overrides).
            /// This is an alias for `Default::default()`.
            pub fn new() -> Self {
                Self::default()
            }

            /// Apply environment variable overrides to this configuration group.
            ///
            /// In module `stage_config::groups::client`, the env var for `endpoint` is
            /// `TAPESTAGE_CLIENT_ENDPOINT`.
            pub fn apply_env_overrides(&mut self) {
                $(
                    {
                    const ENV_VAR_NAME: &str = const_str::concat!(
                        "TAPESTAGE_",
                        const_str::convert_ascii_case!(upper, konst::string::rsplit_once(module_path!(), "::").unwrap().1),
                        "_",
                        const_str::convert_ascii_case!(upper, stringify!($name)));

                    let mut maybe_env_value = std::env::var(ENV_VAR_NAME).ok();

                    if maybe_env_value.is_none() {
                        for &(primary_name, alias_name) in $crate::ENVIRONMENT_NAME_ALIASES {
                            if primary_name == ENV_VAR_NAME {
                                let alt_env_value = std::env::var(alias_name).ok();
                                if alt_env_value.is_some() {
                                    maybe_env_value = alt_env_value;
                                    break;
                                }
                            }
                        }
                    }

                    let default_value: $type = $value;
                    self.$name = <$type>::parse(stringify!($name), maybe_env_value, default_value);
                }
                )+
            }
        }

        /// Type alias for easier reference in config aggregation macros
        pub type ConfigValues = ConfigValueGroup;
    };
}
