//! Outbound sync with the remote library service. The trait is the
//! boundary; commands never see HTTP. Failures abort the whole operation
//! at the call site — there is no partial retry.

use crate::config::Config;
use crate::errors::{RemoteError, Result};
use std::time::Duration;
use tracing::info;

/// Opaque sink/source for library XML.
pub trait Publisher {
    /// Push a library document to the remote instance.
    fn upload(&self, library_xml: &str) -> Result<()>;
    /// Fetch the remote rendition of a component's library.
    fn pull(&self, component_ref: &str) -> Result<String>;
}

#[derive(Debug)]
pub struct HttpPublisher {
    client: reqwest::blocking::Client,
    base_url: String,
    api_token: String,
}

impl HttpPublisher {
    pub fn new(config: &Config) -> Result<Self> {
        if config.remote_url.is_empty() {
            return Err(crate::errors::ThreatsmithError::Config(
                "remote_url is not configured".to_string(),
            ));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.remote_url.trim_end_matches('/').to_string(),
            api_token: config.remote_api_token.clone(),
        })
    }

    fn check(&self, response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RemoteError::Authentication(status.to_string()).into());
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(RemoteError::HttpStatus {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        Ok(response)
    }
}

impl Publisher for HttpPublisher {
    fn upload(&self, library_xml: &str) -> Result<()> {
        info!(url = %self.base_url, "uploading library");
        let response = self
            .client
            .post(format!("{}/api/v2/libraries/import", self.base_url))
            .header("api-token", &self.api_token)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(library_xml.to_string())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout
                } else {
                    RemoteError::Network(e.to_string())
                }
            })?;
        self.check(response)?;
        Ok(())
    }

    fn pull(&self, component_ref: &str) -> Result<String> {
        info!(url = %self.base_url, component_ref, "pulling library");
        let response = self
            .client
            .get(format!(
                "{}/api/v2/libraries?filter='referenceId'='{}'",
                self.base_url, component_ref
            ))
            .header("api-token", &self.api_token)
            .header(reqwest::header::ACCEPT, "application/xml")
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    RemoteError::Timeout
                } else {
                    RemoteError::Network(e.to_string())
                }
            })?;
        let response = self.check(response)?;
        response
            .text()
            .map_err(|e| RemoteError::Parse(e.to_string()).into())
    }
}
