crate::config_group!({

    /// Batches smaller than this print no progress announcements.
    ///
    /// Use the environment variable `TAPESTAGE_BATCH_PROGRESS_ANNOUNCE_THRESHOLD` to set this value.
    ref progress_announce_threshold: usize = 50;

    /// Where status-mode batches write the newline-delimited list of cached files.
    /// The file is overwritten on every run.
    ///
    /// Use the environment variable `TAPESTAGE_BATCH_CACHE_LIST_PATH` to set this value.
    ref cache_list_path: String = "cache_list.txt".to_string();
});
