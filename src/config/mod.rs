use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cli::Args;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("backend URL '{0}' must use http or https")]
    UnsupportedScheme(String),
    #[error("stream buffer must hold at least one event")]
    EmptyStreamBuffer,
}

/// Settings shared by the HTTP backend and the session controller.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub password: Option<String>,
    pub request_timeout: Duration,
    pub stream_buffer: usize,
    pub stream_idle_timeout: Duration,
    pub max_coalesced_events: usize,
    pub refetch_after_edit: bool,
}

impl ClientConfig {
    /// Default settings against `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            password: None,
            request_timeout: Duration::from_secs(30),
            stream_buffer: 64,
            stream_idle_timeout: Duration::from_secs(120),
            max_coalesced_events: 32,
            refetch_after_edit: true,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let base_url = parse_base_url(&args.base_url)?;
        if args.stream_buffer == 0 {
            return Err(ConfigError::EmptyStreamBuffer);
        }
        Ok(Self {
            base_url,
            password: args.password.clone().filter(|p| !p.is_empty()),
            request_timeout: Duration::from_secs(args.request_timeout_secs),
            stream_buffer: args.stream_buffer,
            stream_idle_timeout: Duration::from_secs(args.stream_idle_timeout_secs),
            max_coalesced_events: args.max_coalesced_events,
            refetch_after_edit: args.refetch_after_edit,
        })
    }

    pub fn with_refetch_after_edit(mut self, refetch: bool) -> Self {
        self.refetch_after_edit = refetch;
        self
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle_timeout = idle;
        self
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConfigError::UnsupportedScheme(raw.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["branch-chat"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn builds_from_arguments() {
        let config = ClientConfig::from_args(
            &args(
                &[
                    "--base-url",
                    "http://chat.local:8080/app",
                    "--request-timeout-secs",
                    "5",
                    "--refetch-after-edit",
                    "false",
                    "--stream-idle-timeout-secs",
                    "45",
                ]
            )
        ).unwrap();
        assert_eq!(config.base_url.as_str(), "http://chat.local:8080/app");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert!(!config.refetch_after_edit);
        assert_eq!(config.stream_idle_timeout, Duration::from_secs(45));
    }

    #[test]
    fn rejects_bad_urls_and_buffers() {
        assert!(
            matches!(
                ClientConfig::from_args(&args(&["--base-url", "not a url"])),
                Err(ConfigError::InvalidUrl { .. })
            )
        );
        assert!(
            matches!(
                ClientConfig::from_args(&args(&["--base-url", "ftp://host"])),
                Err(ConfigError::UnsupportedScheme(_))
            )
        );
        assert!(
            matches!(
                ClientConfig::from_args(
                    &args(&["--base-url", "http://localhost", "--stream-buffer", "0"])
                ),
                Err(ConfigError::EmptyStreamBuffer)
            )
        );
    }
}
