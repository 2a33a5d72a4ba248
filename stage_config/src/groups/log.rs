crate::config_group!({

    /// Default tracing filter directive, used when `RUST_LOG` is not set.
    ///
    /// Use the environment variable `TAPESTAGE_LOG_FILTER` to set this value.
    ref filter: String = "warn".to_string();
});
