/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::collections::BTreeMap;

use anyhow::Context;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("cannot encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("backend {url} unreachable: {source}")]
    Unreachable { url: String, source: reqwest::Error },
    #[error("backend {url} rejected message: status {status}")]
    Rejected {
        url: String,
        status: u16,
        body: String,
    },
}

/// Static configuration of one fan-out target, as read from the config
/// file or injected by a service discovery collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetConfig {
    pub id: String,
    pub imei_pattern: String,
    pub backend: String,
    pub skip_tls: bool,
    pub headers: BTreeMap<String, String>,
}

/// An installed target: its config plus the compiled IMEI pattern and
/// the HTTP client honoring the TLS setting. Immutable once built;
/// reconfiguration replaces the whole table.
pub(crate) struct Target {
    pub(crate) config: TargetConfig,
    pattern: Regex,
    url: Url,
    client: reqwest::Client,
}

impl Target {
    pub(crate) fn build(config: TargetConfig) -> anyhow::Result<Self> {
        let pattern = Regex::new(&config.imei_pattern)
            .context(format!("cannot compile pattern {:?}", config.imei_pattern))?;
        let url = Url::parse(&config.backend)
            .context(format!("invalid backend url {:?}", config.backend))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .context(format!("invalid header name {name:?}"))?;
            let value = HeaderValue::from_str(value)
                .context(format!("invalid value for header {name:?}"))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.skip_tls)
            .default_headers(headers)
            .build()
            .context("cannot build http client")?;

        Ok(Target {
            config,
            pattern,
            url,
            client,
        })
    }

    pub(crate) fn matches(&self, imei: &str) -> bool {
        self.pattern.is_match(imei)
    }

    /// POST the serialized bucket. 2xx is success, everything else is
    /// a rejection carrying status and response body.
    pub(crate) async fn deliver(&self, body: &[u8]) -> Result<(), DeliveryError> {
        let rsp = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|source| DeliveryError::Unreachable {
                url: self.config.backend.clone(),
                source,
            })?;

        let status = rsp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = rsp.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected {
            url: self.config.backend.clone(),
            status: status.as_u16(),
            body,
        })
    }
}
