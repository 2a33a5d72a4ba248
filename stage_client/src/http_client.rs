use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use http::Extensions;
use reqwest::{Certificate, Identity, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use stage_config::ClientConfig;
use tracing::{debug, info};

use crate::error::{Result, StageClientError, error_chain};

const PEM_CERT_MARKER: &[u8] = b"-----BEGIN CERTIFICATE-----";

/// Request extension naming the API call; picked up by [`RequestLogger`].
#[derive(Clone, Copy, Debug)]
pub struct Api(pub &'static str);

/// Logs the outcome and latency of every request sent through the client.
pub struct RequestLogger;

#[async_trait::async_trait]
impl Middleware for RequestLogger {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let api = extensions.get::<Api>().map(|a| a.0).unwrap_or("unknown");
        let method = req.method().clone();
        let start = Instant::now();

        let result = next.run(req, extensions).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(resp) => debug!(api, %method, status = resp.status().as_u16(), elapsed_ms, "Request completed"),
            Err(e) => debug!(api, %method, elapsed_ms, error = %e, "Request failed"),
        }
        result
    }
}

/// The credential file to use: the configured path, or the per-user proxy location
/// `/tmp/x509up_u{uid}` when none is configured.
pub fn resolve_credential_path(configured: &str) -> PathBuf {
    if configured.trim().is_empty() {
        PathBuf::from(format!("/tmp/x509up_u{}", nix::unistd::getuid()))
    } else {
        PathBuf::from(configured.trim())
    }
}

/// Reads a PEM file holding both the client certificate chain and its private key.
pub fn load_identity(path: &Path) -> Result<Identity> {
    let pem = fs::read(path)
        .map_err(|e| StageClientError::CredentialMissing(format!("cannot read {}: {e}", path.display())))?;

    Identity::from_pem(&pem).map_err(|e| {
        StageClientError::CredentialMissing(format!(
            "{} does not hold a usable certificate and key: {}",
            path.display(),
            error_chain(&e)
        ))
    })
}

/// Loads the PEM trust anchors in `dir`: `*.pem` files and OpenSSL hash links (`*.0`, `*.1`, ...).
/// Unreadable or unparsable entries are skipped, and a missing directory yields no anchors.
pub fn load_trust_anchors(dir: &Path) -> Vec<Certificate> {
    let Ok(entries) = fs::read_dir(dir) else {
        debug!(dir = %dir.display(), "No CA directory; using system trust anchors only");
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut anchors = Vec::new();

    for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
        let is_anchor = path.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
            ext == "pem" || (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_digit()))
        });
        if !is_anchor {
            continue;
        }

        // Hash links point at the .pem files; load each certificate once.
        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if !seen.insert(canonical) {
            continue;
        }

        let pem = match fs::read(&path) {
            Ok(pem) => pem,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Skipping unreadable trust anchor");
                continue;
            },
        };

        // Certificate::from_pem defers parsing to client construction; reject non-PEM content here.
        if !pem.windows(PEM_CERT_MARKER.len()).any(|w| w == PEM_CERT_MARKER) {
            debug!(path = %path.display(), "Skipping trust anchor without a PEM certificate");
            continue;
        }

        match Certificate::from_pem(&pem) {
            Ok(cert) => anchors.push(cert),
            Err(e) => debug!(path = %path.display(), error = %e, "Skipping unparsable trust anchor"),
        }
    }

    info!(dir = %dir.display(), count = anchors.len(), "Loaded trust anchors");
    anchors
}

fn base_builder(config: &ClientConfig, user_agent: &str) -> reqwest::ClientBuilder {
    let mut builder = reqwest::Client::builder()
        .use_rustls_tls()
        .user_agent(user_agent)
        .connect_timeout(config.connect_timeout)
        .timeout(config.request_timeout)
        .pool_max_idle_per_host(config.max_concurrent_requests.max(1));

    for cert in load_trust_anchors(Path::new(&config.ca_directory)) {
        builder = builder.add_root_certificate(cert);
    }
    builder
}

fn finish(builder: reqwest::ClientBuilder) -> Result<ClientWithMiddleware> {
    let client = builder
        .build()
        .map_err(|e| StageClientError::configuration(format!("cannot build HTTP client: {}", error_chain(&e))))?;
    Ok(ClientBuilder::new(client).with(RequestLogger).build())
}

/// Builds a client that presents `identity` during the TLS handshake. One client is meant to
/// serve a whole batch so that connections, and their handshakes, are reused.
pub fn build_auth_http_client(config: &ClientConfig, identity: Identity, user_agent: &str) -> Result<ClientWithMiddleware> {
    finish(base_builder(config, user_agent).identity(identity))
}

/// Builds a client without client credentials.
pub fn build_http_client(config: &ClientConfig, user_agent: &str) -> Result<ClientWithMiddleware> {
    finish(base_builder(config, user_agent))
}
