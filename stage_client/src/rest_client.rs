use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE};
use lazy_static::lazy_static;
use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use stage_config::ClientConfig;
use tracing::{error, event, info};

use crate::error::{Result, StageClientError};
use crate::http_client::{self, Api, load_identity, resolve_credential_path};
use crate::interface::{Locality, PrestageDispatcher, PrestageOutcome, ResidencyProbe, ResidencyState};
use crate::location::StorageLocation;
use crate::retry_wrapper::RetryWrapper;
use crate::INFORMATION_LOG_LEVEL;

pub const USER_AGENT: &str = concat!("cache_status/", env!("CARGO_PKG_VERSION"));

const PRESTAGE_SUCCESS: &str = "success";
const PRESTAGE_TARGET: &str = "disk+tape";

lazy_static! {
    static ref FN_CALL_ID: AtomicU64 = AtomicU64::new(1);
}

/// Namespace entry as returned by `GET {endpoint}/{path}?qos=true&locality=true`.
///
/// `currentQos` is also present in the reply but can say "tape" for a file that is online,
/// so it is not read at all.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceEntry {
    file_locality: Option<String>,
    target_qos: Option<String>,
}

#[derive(Debug, Serialize)]
struct QosTransition {
    action: &'static str,
    target: &'static str,
}

#[derive(Debug, Deserialize)]
struct QosTransitionReply {
    status: Option<String>,
}

/// Residency probe and prestage dispatcher backed by the storage system's REST namespace API.
///
/// All calls share one HTTP client, so connections (and their TLS sessions) are reused across
/// a whole batch.
pub struct RestClient {
    endpoint: Url,
    http_client: Arc<ClientWithMiddleware>,
    retry_max_attempts: usize,
    retry_base_delay: Duration,
    credential_error: Option<String>,
}

impl RestClient {
    /// Builds a client authenticating with the configured X.509 credential.
    ///
    /// An unusable credential does not fail construction: the problem is logged once and every
    /// call then fails with [`StageClientError::CredentialMissing`], so a batch still reports each
    /// file.
    pub fn new(config: &ClientConfig) -> Result<Arc<Self>> {
        let credential_path = resolve_credential_path(&config.credential_path);

        match load_identity(&credential_path) {
            Ok(identity) => {
                info!(credential = %credential_path.display(), "Loaded client credential");
                let client = http_client::build_auth_http_client(config, identity, USER_AGENT)?;
                Self::with_http_client(config, client, None)
            },
            Err(e) => {
                error!(credential = %credential_path.display(), "Client credential unusable: {e}");
                let client = http_client::build_http_client(config, USER_AGENT)?;
                Self::with_http_client(config, client, Some(e.to_string()))
            },
        }
    }

    /// Builds a client that presents no client certificate.
    pub fn without_credentials(config: &ClientConfig) -> Result<Arc<Self>> {
        let client = http_client::build_http_client(config, USER_AGENT)?;
        Self::with_http_client(config, client, None)
    }

    fn with_http_client(
        config: &ClientConfig,
        http_client: ClientWithMiddleware,
        credential_error: Option<String>,
    ) -> Result<Arc<Self>> {
        let endpoint = Url::parse(config.endpoint.trim())
            .map_err(|e| StageClientError::configuration(format!("invalid endpoint '{}': {e}", config.endpoint)))?;
        if endpoint.cannot_be_a_base() {
            return Err(StageClientError::configuration(format!("endpoint '{endpoint}' cannot take a path")));
        }

        Ok(Arc::new(Self {
            endpoint,
            http_client: Arc::new(http_client),
            retry_max_attempts: config.retry_max_attempts,
            retry_base_delay: config.retry_base_delay,
            credential_error,
        }))
    }

    fn location_url(&self, location: &StorageLocation) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| StageClientError::configuration(format!("endpoint '{}' cannot take a path", self.endpoint)))?
            .pop_if_empty()
            .extend(location.as_str().split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn check_credential(&self) -> Result<()> {
        match &self.credential_error {
            Some(msg) => Err(StageClientError::CredentialMissing(msg.clone())),
            None => Ok(()),
        }
    }
}

/// Reports a 404 against the location rather than the URL it was requested at.
fn name_missing_file(err: StageClientError, location: &StorageLocation) -> StageClientError {
    match err {
        StageClientError::FileNotFound(_) => StageClientError::FileNotFound(location.to_string()),
        e => e,
    }
}

#[async_trait::async_trait]
impl ResidencyProbe for RestClient {
    async fn query_residency(&self, location: &StorageLocation) -> Result<ResidencyState> {
        self.check_credential()?;

        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        let mut url = self.location_url(location)?;
        url.query_pairs_mut().append_pair("qos", "true").append_pair("locality", "true");

        event!(INFORMATION_LOG_LEVEL, call_id, %location, "Starting query_residency API call");

        let client = self.http_client.clone();
        let api_tag = "namespace::query_residency";

        let result: Result<NamespaceEntry> = RetryWrapper::new(api_tag)
            .with_max_attempts(self.retry_max_attempts)
            .with_base_delay(self.retry_base_delay)
            .run_and_extract_json(move || {
                client
                    .get(url.clone())
                    .header(ACCEPT, "application/json")
                    .with_extension(Api(api_tag))
                    .send()
            })
            .await;

        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                let e = name_missing_file(e, location);
                event!(INFORMATION_LOG_LEVEL, call_id, %location, error = %e, "Completed query_residency API call");
                return Err(e);
            },
        };

        let Some(file_locality) = entry.file_locality else {
            event!(INFORMATION_LOG_LEVEL, call_id, %location, result = "no_locality", "Completed query_residency API call");
            return Err(StageClientError::BackendMalformedResponse(format!("no fileLocality reported for {location}")));
        };

        let state = ResidencyState::new(Locality::from_backend(&file_locality), entry.target_qos);

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            %location,
            locality = %state.locality,
            target_qos = state.target_qos.as_deref().unwrap_or(""),
            "Completed query_residency API call",
        );

        Ok(state)
    }
}

#[async_trait::async_trait]
impl PrestageDispatcher for RestClient {
    async fn request_prestage(&self, location: &StorageLocation) -> PrestageOutcome {
        if let Err(e) = self.check_credential() {
            return PrestageOutcome::Failed(e);
        }

        let url = match self.location_url(location) {
            Ok(url) => url,
            Err(e) => return PrestageOutcome::Failed(e),
        };

        let call_id = FN_CALL_ID.fetch_add(1, Ordering::Relaxed);
        event!(INFORMATION_LOG_LEVEL, call_id, %location, "Starting request_prestage API call");

        let client = self.http_client.clone();
        let api_tag = "namespace::request_prestage";
        let body = QosTransition {
            action: "qos",
            target: PRESTAGE_TARGET,
        };

        // Each request may enqueue work on the backend; never repeated here.
        let result: Result<QosTransitionReply> = RetryWrapper::new(api_tag)
            .with_max_attempts(0)
            .run_and_extract_json(move || {
                client
                    .post(url.clone())
                    .header(ACCEPT, "application/json")
                    .header(CONTENT_TYPE, "application/json")
                    .json(&body)
                    .with_extension(Api(api_tag))
                    .send()
            })
            .await;

        let outcome = match result {
            Ok(QosTransitionReply { status }) if status.as_deref() == Some(PRESTAGE_SUCCESS) => PrestageOutcome::Accepted,
            Ok(QosTransitionReply { status }) => PrestageOutcome::Rejected { status },
            Err(e) => PrestageOutcome::Failed(name_missing_file(e, location)),
        };

        event!(
            INFORMATION_LOG_LEVEL,
            call_id,
            %location,
            succeeded = outcome.succeeded(),
            "Completed request_prestage API call",
        );

        outcome
    }
}
