//! Client side of the label save contract.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::labels::LabelDocument;

/// Path of the save endpoint on the persistence service.
pub const SAVE_LABEL_PATH: &str = "/save-label";

/// Status and plaintext body of the service's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

#[derive(Error, Debug)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Delivers a label document to the persistence service.
pub trait LabelTransport {
    fn post(
        &self,
        document: &LabelDocument,
    ) -> impl Future<Output = Result<TransportReply, TransportError>> + Send;
}

/// Posts documents as JSON to `<base>/save-label`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}{SAVE_LABEL_PATH}", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl LabelTransport for HttpTransport {
    fn post(
        &self,
        document: &LabelDocument,
    ) -> impl Future<Output = Result<TransportReply, TransportError>> + Send {
        let request = self.client.post(&self.endpoint).json(document);
        let endpoint = self.endpoint.clone();
        async move {
            debug!(%endpoint, "posting label document");
            let response = request
                .send()
                .await
                .map_err(|e| TransportError(format!("POST {endpoint} failed: {e}")))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError(format!("failed to read reply from {endpoint}: {e}")))?;
            Ok(TransportReply { status, body })
        }
    }
}
