use std::time::Duration;

crate::config_group!({

    /// Base URL of the storage backend's REST namespace API. Canonical paths are appended to it.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_ENDPOINT` to set this value.
    ref endpoint: String = "https://fndca.fnal.gov:3880/api/v1/namespace".to_string();

    /// PEM file holding the client certificate chain and its private key (an X.509 proxy).
    /// When empty, `/tmp/x509up_u{uid}` for the current user is used.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_CREDENTIAL_PATH` (or `X509_USER_PROXY`)
    /// to set this value.
    ref credential_path: String = String::new();

    /// Directory of PEM trust anchors added on top of the system certificate bundle.
    /// A missing directory is not an error.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_CA_DIRECTORY` (or `X509_CERT_DIR`)
    /// to set this value.
    ref ca_directory: String = "/etc/grid-security/certificates".to_string();

    /// Timeout for establishing a connection (including the TLS handshake).
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_CONNECT_TIMEOUT` to set this value.
    ref connect_timeout: Duration = Duration::from_secs(30);

    /// Timeout for a whole request, from send to the last byte of the response body.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_REQUEST_TIMEOUT` to set this value.
    ref request_timeout: Duration = Duration::from_secs(120);

    /// Number of retries for transient failures of status queries. Prestage requests are never retried.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_RETRY_MAX_ATTEMPTS` to set this value.
    ref retry_max_attempts: usize = 3;

    /// Base delay for the exponential backoff between retries.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_RETRY_BASE_DELAY` to set this value.
    ref retry_base_delay: Duration = Duration::from_millis(500);

    /// Maximum number of backend requests in flight during a batch.
    ///
    /// Use the environment variable `TAPESTAGE_CLIENT_MAX_CONCURRENT_REQUESTS` to set this value.
    ref max_concurrent_requests: usize = 16;
});
