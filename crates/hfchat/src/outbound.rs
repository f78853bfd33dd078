//! Bridges `http::Request` values built by providers onto a reqwest client.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{Request, Response};
use reqwest::Client;
use std::pin::Pin;
use std::time::Duration;

use crate::error::{GenerationFailure, LLMError, status_error};

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LLMError>> + Send>>;

/// HTTP transport owned by one adapter. The timeout covers each request from
/// connect until the body has been fully read.
#[derive(Debug, Clone)]
pub struct Outbound {
    client: Client,
}

impl Outbound {
    pub fn new(timeout: Duration) -> Result<Self, LLMError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LLMError::ConfigurationError(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn to_reqwest(&self, req: Request<Vec<u8>>) -> Result<reqwest::RequestBuilder, LLMError> {
        let method = req
            .method()
            .as_str()
            .parse::<reqwest::Method>()
            .map_err(|e| LLMError::InvalidRequest(e.to_string()))?;

        let mut rb = self.client.request(method, req.uri().to_string());
        for (name, value) in req.headers().iter() {
            rb = rb.header(name.as_str(), value.as_bytes());
        }
        Ok(rb.body(req.into_body()))
    }

    /// Sends the request and buffers the whole response. Non-success statuses
    /// are returned as responses so the provider can read the error body.
    pub async fn call(&self, req: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, LLMError> {
        let resp = self.to_reqwest(req)?.send().await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await?.to_vec();
        log::trace!("Received response: {} ({} bytes)", status, bytes.len());

        let mut builder = Response::builder().status(status.as_u16());
        for (name, value) in headers.iter() {
            builder = builder.header(name.as_str(), value.as_bytes());
        }
        builder.body(bytes).map_err(|e| {
            LLMError::GenerationFailure(GenerationFailure::Http(e.to_string()))
        })
    }

    /// Sends the request and hands back the body as it arrives. A
    /// non-success status is read in full and turned into an error.
    pub async fn call_stream(&self, req: Request<Vec<u8>>) -> Result<ByteStream, LLMError> {
        let resp = self.to_reqwest(req)?.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.bytes().await?;
            return Err(status_error(status.as_u16(), &body));
        }

        Ok(Box::pin(resp.bytes_stream().map(|res| res.map_err(LLMError::from))))
    }
}
