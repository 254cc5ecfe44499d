//! Env-var driven server configuration, following `control-plane::main`'s
//! `std::env::var(...).context(...)` style (spec.md §6 "Environment
//! variables": server listen address, database path/URL, default executor
//! type, anonymous-access flag).

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};
use gowe_core::ExecutorType;

/// Server-wide configuration assembled once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address the HTTP server binds to (`GOWE_LISTEN_ADDR`, default
    /// `0.0.0.0:8080`).
    pub listen_addr: SocketAddr,
    /// Postgres connection string (`DATABASE_URL`). When unset, the server
    /// runs against `gowe_store::memory::InMemoryStore` instead — useful
    /// for local development and the integration test suite.
    pub database_url: Option<String>,
    /// Executor type assumed for a step that declares no hint
    /// (`GOWE_DEFAULT_EXECUTOR_TYPE`, default `local`).
    pub default_executor_type: ExecutorType,
    /// When `true`, requests are served without checking any identity —
    /// GoWe ships no auth subsystem of its own (`GOWE_ANONYMOUS_ACCESS`,
    /// default `true`).
    pub anonymous_access: bool,
    /// Optional path prefix every `/api/v1/...` route is nested under
    /// (ambient, mirrors `control-plane::main`'s `API_PREFIX`).
    pub api_prefix: String,
    /// Origins allowed to make cross-origin requests (ambient, mirrors
    /// `control-plane::main`'s `CORS_ALLOWED_ORIGINS`).
    pub cors_allowed_origins: Vec<String>,
    /// BV-BRC JSON-RPC application-service endpoint the `bvbrc` executor
    /// submits to (`GOWE_BVBRC_ENDPOINT`).
    pub bvbrc_endpoint: String,
    /// OAuth token forwarded on BV-BRC calls, if configured
    /// (`GOWE_BVBRC_TOKEN`).
    pub bvbrc_token: Option<String>,
    /// Retry budget assigned to every Task of a submission that does not
    /// specify its own (`GOWE_DEFAULT_MAX_RETRIES`, default 0 — spec.md
    /// names `max_retries` as a Task attribute but leaves its source
    /// unspecified; submissions may override it per-request).
    pub default_max_retries: u32,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("GOWE_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("GOWE_LISTEN_ADDR is not a valid socket address")?;

        let database_url = std::env::var("DATABASE_URL").ok();

        let default_executor_type = std::env::var("GOWE_DEFAULT_EXECUTOR_TYPE")
            .ok()
            .map(|v| ExecutorType::from_str(&v))
            .transpose()
            .context("GOWE_DEFAULT_EXECUTOR_TYPE is not a known executor type")?
            .unwrap_or(ExecutorType::Local);

        let anonymous_access = std::env::var("GOWE_ANONYMOUS_ACCESS")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(true);

        let api_prefix = std::env::var("GOWE_API_PREFIX").unwrap_or_else(|_| "/api".to_string());

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let bvbrc_endpoint = std::env::var("GOWE_BVBRC_ENDPOINT")
            .unwrap_or_else(|_| "https://p3.theseed.org/services/app_service".to_string());
        let bvbrc_token = std::env::var("GOWE_BVBRC_TOKEN").ok();

        let default_max_retries = std::env::var("GOWE_DEFAULT_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);

        Ok(ApiConfig {
            listen_addr,
            database_url,
            default_executor_type,
            anonymous_access,
            api_prefix,
            cors_allowed_origins,
            bvbrc_endpoint,
            bvbrc_token,
            default_max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use gowe_core::ExecutorType;

    #[test]
    fn unset_default_executor_type_falls_back_to_local() {
        let parsed: Option<ExecutorType> = None::<&str>.map(|v| v.parse().unwrap());
        assert_eq!(parsed.unwrap_or(ExecutorType::Local), ExecutorType::Local);
    }
}
