crate::config_group!({

    /// Comma-separated data-transfer door prefixes that are stripped from raw references.
    ///
    /// Use the environment variable `TAPESTAGE_LOCATION_PROTOCOL_PREFIXES` to set this value.
    ref protocol_prefixes: String = "root://fndca1.fnal.gov:1094".to_string();

    /// Comma-separated `alias=canonical` mount rewrites.
    ///
    /// Use the environment variable `TAPESTAGE_LOCATION_MOUNT_ALIASES` to set this value.
    ref mount_aliases: String = "/pnfs/uboone=/pnfs/fnal.gov/usr/uboone".to_string();

    /// Scheme tag of tape-archive locations, as in `enstore:/path/to/dir(VOLUME)`.
    ///
    /// Use the environment variable `TAPESTAGE_LOCATION_TAPE_SCHEME` to set this value.
    ref tape_scheme: String = "enstore".to_string();

    /// Local mount under which files are managed by the storage backend.
    /// Local files outside it are treated as always cached.
    ///
    /// Use the environment variable `TAPESTAGE_LOCATION_MANAGED_ROOT` to set this value.
    ref managed_root: String = "/pnfs".to_string();
});
