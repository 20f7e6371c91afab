use std::env;
use std::time::Duration;
use anyhow::{bail, Context, Result};

/// Default bucket, named after the project the gateway fronts
pub const DEFAULT_BUCKET: &str = "api-gateway-proxy-to-s3-bucket";

/// Which object store the proxy talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Memory,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageBackend::S3),
            "memory" => Ok(StorageBackend::Memory),
            other => bail!("STORAGE_BACKEND must be one of: s3, memory, got '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub service_host: String,
    pub service_port: u16,
    pub stage_name: String,
    pub bucket_name: String,
    pub storage_backend: StorageBackend,
    pub aws_region: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_force_path_style: bool,
    pub delegated_role_arn: Option<String>,
    /// Let the s3 backend sign with the ambient credential chain when no role
    /// is configured. Intended for local S3-compatible endpoints.
    pub allow_ambient_credentials: bool,
    pub role_session_name: String,
    pub storage_timeout: Duration,
    pub max_body_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let service_host = var("SERVICE_HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let service_port = var("SERVICE_PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("SERVICE_PORT must be a valid port number (0-65535)")?;

        let stage_name = var("STAGE_NAME")
            .unwrap_or_else(|| "v1".to_string())
            .trim_matches('/')
            .to_string();
        if stage_name.contains('/') {
            bail!("STAGE_NAME must be a single path segment, got '{}'", stage_name);
        }

        let bucket_name = var("BUCKET_NAME").unwrap_or_else(|| DEFAULT_BUCKET.to_string());

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(value) => StorageBackend::parse(&value)?,
            None => StorageBackend::S3,
        };

        let s3_force_path_style = match var("S3_FORCE_PATH_STYLE") {
            Some(value) => value
                .parse::<bool>()
                .context("S3_FORCE_PATH_STYLE must be 'true' or 'false'")?,
            None => false,
        };

        let delegated_role_arn = var("DELEGATED_ROLE_ARN");

        let allow_ambient_credentials = match var("ALLOW_AMBIENT_CREDENTIALS") {
            Some(value) => value
                .parse::<bool>()
                .context("ALLOW_AMBIENT_CREDENTIALS must be 'true' or 'false'")?,
            None => false,
        };

        let role_session_name =
            var("ROLE_SESSION_NAME").unwrap_or_else(|| "s3-proxy-gateway".to_string());

        let storage_timeout_ms = var("STORAGE_TIMEOUT_MS")
            .unwrap_or_else(|| "29000".to_string())
            .parse::<u64>()
            .context("STORAGE_TIMEOUT_MS must be a whole number of milliseconds")?;
        if storage_timeout_ms == 0 {
            bail!("STORAGE_TIMEOUT_MS must be greater than zero");
        }

        let max_body_bytes = var("MAX_BODY_BYTES")
            .unwrap_or_else(|| "10485760".to_string())
            .parse::<usize>()
            .context("MAX_BODY_BYTES must be a whole number of bytes")?;

        if storage_backend == StorageBackend::S3
            && delegated_role_arn.is_none()
            && !allow_ambient_credentials
        {
            bail!(
                "DELEGATED_ROLE_ARN must be set for the s3 backend \
                 (set ALLOW_AMBIENT_CREDENTIALS=true to use the ambient credential chain)"
            );
        }

        Ok(Config {
            service_host,
            service_port,
            stage_name,
            bucket_name,
            storage_backend,
            aws_region: var("AWS_REGION"),
            s3_endpoint_url: var("S3_ENDPOINT_URL"),
            s3_force_path_style,
            delegated_role_arn,
            allow_ambient_credentials,
            role_session_name,
            storage_timeout: Duration::from_millis(storage_timeout_ms),
            max_body_bytes,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service_host, self.service_port)
    }

    pub fn log_startup(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  Storage backend: {:?}", self.storage_backend);
        tracing::info!("  Bucket: {}", self.bucket_name);
        tracing::info!("  Region: {}", self.aws_region.as_deref().unwrap_or("SDK default"));
        tracing::info!(
            "  S3 endpoint: {}",
            self.s3_endpoint_url.as_deref().unwrap_or("AWS default")
        );
        match &self.delegated_role_arn {
            Some(role_arn) => tracing::info!("  Delegated role: {}", role_arn),
            None if self.allow_ambient_credentials => {
                tracing::warn!("  Delegated role: none (ambient credentials allowed)")
            }
            None => tracing::info!("  Delegated role: none"),
        }
        tracing::info!("  Storage timeout: {:?}", self.storage_timeout);
        tracing::info!("  Stage: /{}", self.stage_name);
        tracing::info!("  Service listening on: {}", self.bind_address());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_config_with_all_vars() {
        let config = config_from(&[
            ("SERVICE_HOST", "127.0.0.1"),
            ("SERVICE_PORT", "8080"),
            ("STAGE_NAME", "/prod/"),
            ("BUCKET_NAME", "photos"),
            ("STORAGE_BACKEND", "memory"),
            ("AWS_REGION", "eu-west-1"),
            ("S3_ENDPOINT_URL", "http://localhost:9000"),
            ("S3_FORCE_PATH_STYLE", "true"),
            ("DELEGATED_ROLE_ARN", "arn:aws:iam::123456789012:role/proxy"),
            ("ROLE_SESSION_NAME", "gateway"),
            ("STORAGE_TIMEOUT_MS", "500"),
            ("MAX_BODY_BYTES", "1024"),
        ])
        .unwrap();

        assert_eq!(config.service_host, "127.0.0.1");
        assert_eq!(config.service_port, 8080);
        assert_eq!(config.stage_name, "prod");
        assert_eq!(config.bucket_name, "photos");
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.aws_region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.s3_endpoint_url.as_deref(), Some("http://localhost:9000"));
        assert!(config.s3_force_path_style);
        assert_eq!(
            config.delegated_role_arn.as_deref(),
            Some("arn:aws:iam::123456789012:role/proxy")
        );
        assert_eq!(config.role_session_name, "gateway");
        assert_eq!(config.storage_timeout, Duration::from_millis(500));
        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
    }

    #[test]
    fn test_config_with_defaults() {
        let config =
            config_from(&[("DELEGATED_ROLE_ARN", "arn:aws:iam::123456789012:role/proxy")]).unwrap();

        assert_eq!(config.service_host, "0.0.0.0");
        assert_eq!(config.service_port, 3000);
        assert_eq!(config.stage_name, "v1");
        assert_eq!(config.bucket_name, DEFAULT_BUCKET);
        assert_eq!(config.storage_backend, StorageBackend::S3);
        assert_eq!(config.aws_region, None);
        assert!(!config.allow_ambient_credentials);
        assert!(!config.s3_force_path_style);
        assert_eq!(config.storage_timeout, Duration::from_secs(29));
        assert_eq!(config.max_body_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = config_from(&[
            ("STORAGE_BACKEND", "memory"),
            ("S3_ENDPOINT_URL", ""),
            ("BUCKET_NAME", "  "),
        ])
        .unwrap();

        assert_eq!(config.s3_endpoint_url, None);
        assert_eq!(config.bucket_name, DEFAULT_BUCKET);
    }

    #[test]
    fn test_invalid_port() {
        let error = config_from(&[("SERVICE_PORT", "not-a-number")]).unwrap_err();
        assert!(error.to_string().contains("SERVICE_PORT"));
    }

    #[test]
    fn test_port_out_of_range() {
        assert!(config_from(&[("SERVICE_PORT", "99999")]).is_err());
    }

    #[test]
    fn test_invalid_backend() {
        let error = config_from(&[("STORAGE_BACKEND", "gcs")]).unwrap_err();
        assert!(error.to_string().contains("STORAGE_BACKEND"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let error = config_from(&[("STORAGE_TIMEOUT_MS", "0")]).unwrap_err();
        assert!(error.to_string().contains("STORAGE_TIMEOUT_MS"));
    }

    #[test]
    fn test_s3_backend_requires_delegated_role() {
        let error = config_from(&[]).unwrap_err();
        assert!(error.to_string().contains("DELEGATED_ROLE_ARN"));

        let error = config_from(&[("DELEGATED_ROLE_ARN", "")]).unwrap_err();
        assert!(error.to_string().contains("DELEGATED_ROLE_ARN"));
    }

    #[test]
    fn test_ambient_credentials_opt_out() {
        let config = config_from(&[
            ("ALLOW_AMBIENT_CREDENTIALS", "true"),
            ("S3_ENDPOINT_URL", "http://localhost:9000"),
        ])
        .unwrap();

        assert_eq!(config.storage_backend, StorageBackend::S3);
        assert_eq!(config.delegated_role_arn, None);
        assert!(config.allow_ambient_credentials);

        let error = config_from(&[("ALLOW_AMBIENT_CREDENTIALS", "false")]).unwrap_err();
        assert!(error.to_string().contains("DELEGATED_ROLE_ARN"));
    }

    #[test]
    fn test_invalid_ambient_credentials_flag() {
        let error = config_from(&[("ALLOW_AMBIENT_CREDENTIALS", "yes")]).unwrap_err();
        assert!(error.to_string().contains("ALLOW_AMBIENT_CREDENTIALS"));
    }

    #[test]
    fn test_memory_backend_needs_no_role() {
        let config = config_from(&[("STORAGE_BACKEND", "memory")]).unwrap();

        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.delegated_role_arn, None);
    }

    #[test]
    fn test_log_startup_for_each_credential_mode() {
        let configs = [
            config_from(&[("DELEGATED_ROLE_ARN", "arn:aws:iam::123456789012:role/proxy")]),
            config_from(&[("ALLOW_AMBIENT_CREDENTIALS", "true")]),
            config_from(&[("STORAGE_BACKEND", "memory")]),
        ];

        for config in configs {
            config.unwrap().log_startup();
        }
    }

    #[test]
    fn test_nested_stage_rejected() {
        assert!(config_from(&[("STAGE_NAME", "a/b")]).is_err());
    }
}
