//! HTTP clients for upstream data sources.
//!
//! Most data sources share the default client. A data source gets its own
//! client when it carries settings that cannot be shared: a request timeout,
//! client certificates, or a proxy override.

use std::time::Duration;

use reqwest::{Certificate, Client, ClientBuilder, Identity, Proxy};

use fieldgate_core::config::GatewayConfig;
use fieldgate_planner::datasource::DataSourceConfiguration;

use crate::error::{FetchError, Result};

pub fn requires_dedicated_client(ds: &DataSourceConfiguration) -> bool {
    if ds.id.is_empty() {
        return false;
    }
    ds.request_timeout_secs > 0
        || ds.http.mtls.is_some()
        || (ds.kind.uses_http_proxy() && ds.http.proxy_url.is_some())
}

fn apply_proxy(builder: ClientBuilder, proxy_url: Option<&str>) -> Result<ClientBuilder> {
    match proxy_url {
        None => Ok(builder),
        Some("") => Ok(builder.no_proxy()),
        Some(url) => {
            let proxy = Proxy::all(url)
                .map_err(|e| FetchError::InvalidInput(format!("proxy url '{url}': {e}")))?;
            Ok(builder.proxy(proxy))
        }
    }
}

/// The client shared by data sources without dedicated settings.
pub fn default_client(cfg: &GatewayConfig) -> Result<Client> {
    let builder = Client::builder().timeout(Duration::from_secs(cfg.http_timeout_secs));
    let builder = apply_proxy(builder, cfg.http_proxy_url.as_deref())?;
    Ok(builder.build()?)
}

/// Client used to talk to local engine processes; never proxied.
pub fn engine_client() -> Result<Client> {
    Ok(Client::builder().no_proxy().build()?)
}

pub fn dedicated_client(cfg: &GatewayConfig, ds: &DataSourceConfiguration) -> Result<Client> {
    let timeout = if ds.request_timeout_secs > 0 {
        ds.request_timeout_secs
    } else {
        cfg.http_timeout_secs
    };
    let mut builder = Client::builder().timeout(Duration::from_secs(timeout));

    builder = if ds.kind.uses_http_proxy() {
        let proxy = ds.http.proxy_url.as_deref().or(cfg.http_proxy_url.as_deref());
        apply_proxy(builder, proxy)?
    } else {
        builder.no_proxy()
    };

    if let Some(mtls) = &ds.http.mtls {
        let mut pem = mtls.key.clone().into_bytes();
        pem.push(b'\n');
        pem.extend_from_slice(mtls.cert.as_bytes());
        let invalid = |what: &str, e: reqwest::Error| {
            FetchError::InvalidInput(format!("{what} certificate for '{}': {e}", ds.id))
        };
        let identity = Identity::from_pem(&pem).map_err(|e| invalid("client", e))?;
        let root = Certificate::from_pem(mtls.cert.as_bytes()).map_err(|e| invalid("root", e))?;
        builder = builder
            .identity(identity)
            .add_root_certificate(root)
            .tls_built_in_root_certs(false)
            .danger_accept_invalid_certs(mtls.insecure_skip_verify);
    }

    tracing::debug!(
        id = %ds.id,
        timeout_secs = timeout,
        mtls = ds.http.mtls.is_some(),
        "built dedicated http client"
    );
    Ok(builder.build()?)
}

/// Dedicated client when the data source needs one, else a clone of `shared`.
pub fn client_for(
    cfg: &GatewayConfig,
    ds: &DataSourceConfiguration,
    shared: &Client,
) -> Result<Client> {
    if requires_dedicated_client(ds) {
        dedicated_client(cfg, ds)
    } else {
        Ok(shared.clone())
    }
}
