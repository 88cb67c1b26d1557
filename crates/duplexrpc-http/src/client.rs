//! HTTP JSON-RPC client backed by `reqwest`.
//!
//! Stateless: every call is one POST. A single request always carries id `0`;
//! a batch carries ids `0..n-1` in request order.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;

use duplexrpc_core::error::{BatchItemError, TransportError};
use duplexrpc_core::request::{JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION};
use duplexrpc_core::slot::ResultSlot;
use duplexrpc_core::transport::RpcTransport;
use duplexrpc_core::RawValue;

/// Configuration for `HttpClient`.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Deadline for the whole POST round trip.
    pub request_timeout: Duration,
    /// Headers attached to every POST (credentials, API keys...). Not inspected.
    pub headers: Vec<(String, String)>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(3),
            headers: Vec::new(),
        }
    }
}

impl HttpClientConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// HTTP JSON-RPC client.
pub struct HttpClient {
    url: String,
    http: reqwest::Client,
    request_timeout: Duration,
}

impl HttpClient {
    /// Create a new client for the given JSON-RPC endpoint URL.
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, TransportError> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .default_headers(header_map(&config.headers)?)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(Self {
            url,
            http,
            request_timeout: config.request_timeout,
        })
    }

    /// Create with default configuration.
    pub fn default_for(url: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(url, HttpClientConfig::default())
    }

    /// Call `method` with id `0` and decode its result into `T`.
    ///
    /// A protocol error is returned as [`TransportError::Rpc`] and `T` is
    /// never decoded; a result that does not fit `T` is
    /// [`TransportError::Deserialization`].
    pub async fn request<P, T>(&self, method: &str, params: &P) -> Result<T, TransportError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = JsonRpcRequest::with_params(0, method, params)?;
        self.send(&req).await?.decode()
    }

    /// POST one request envelope and return the response envelope untouched.
    pub async fn send(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        tracing::debug!(url = %self.url, method = %req.method, id = req.id, "http request");
        let body = self.post(req).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Send `requests` as one JSON array and decode each result into the slot
    /// whose index equals the response's echoed id.
    ///
    /// Request ids are overwritten with `0..n-1`. The returned list holds one
    /// entry per failed position and is empty when every slot was filled; a
    /// partially failed batch still fills every slot that succeeded. The outer
    /// `Err` is reserved for failures of the POST itself.
    pub async fn batch_request(
        &self,
        mut requests: Vec<JsonRpcRequest>,
        results: &mut [&mut dyn ResultSlot],
    ) -> Result<Vec<BatchItemError>, TransportError> {
        if requests.is_empty() {
            return Ok(vec![]);
        }

        for (i, req) in requests.iter_mut().enumerate() {
            req.id = i as RequestId;
            req.jsonrpc = JSONRPC_VERSION.into();
        }

        tracing::debug!(url = %self.url, size = requests.len(), "http batch request");
        let body = self.post(&requests).await?;
        let responses: Vec<JsonRpcResponse> = serde_json::from_slice(&body)?;

        Ok(distribute(requests.len(), responses, results))
    }

    async fn post<B: Serialize + ?Sized>(&self, body: &B) -> Result<Vec<u8>, TransportError> {
        let resp = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.http_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!("HTTP {status}: {body}")));
        }

        resp.bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| self.http_error(e))
    }

    fn http_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout {
                ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

/// Match batch responses to output slots by echoed id.
fn distribute(
    requested: usize,
    responses: Vec<JsonRpcResponse>,
    results: &mut [&mut dyn ResultSlot],
) -> Vec<BatchItemError> {
    let mut errors = Vec::new();
    let mut answered = vec![false; requested];

    for resp in responses {
        let index = match resp.id {
            Some(id) if (id as usize) < requested && !answered[id as usize] => id as usize,
            id => {
                let error = match resp.error {
                    Some(err) => TransportError::Rpc(err),
                    None => TransportError::UnknownId { id },
                };
                errors.push(BatchItemError { index: None, error });
                continue;
            }
        };
        answered[index] = true;

        let Some(slot) = results.get_mut(index) else {
            errors.push(BatchItemError {
                index: Some(index),
                error: TransportError::MissingSlot { index },
            });
            continue;
        };

        let outcome = resp
            .into_result()
            .and_then(|raw| slot.fill(&raw).map_err(TransportError::Deserialization));
        if let Err(error) = outcome {
            errors.push(BatchItemError {
                index: Some(index),
                error,
            });
        }
    }

    for (index, seen) in answered.into_iter().enumerate() {
        if !seen {
            errors.push(BatchItemError {
                index: Some(index),
                error: TransportError::MissingResponse {
                    id: index as RequestId,
                },
            });
        }
    }

    errors.sort_by_key(|e| e.index);
    errors
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

#[async_trait]
impl RpcTransport for HttpClient {
    async fn send_raw(
        &self,
        method: &str,
        params: Option<Box<RawValue>>,
    ) -> Result<JsonRpcResponse, TransportError> {
        self.send(&JsonRpcRequest::new(0, method, params)).await
    }

    fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responses(body: &str) -> Vec<JsonRpcResponse> {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn distribute_reordered_responses_by_id() {
        let resps = responses(
            r#"[{"id":1,"jsonrpc":"2.0","result":"b"},{"id":0,"jsonrpc":"2.0","result":"a"}]"#,
        );
        let mut a: Option<String> = None;
        let mut b: Option<String> = None;
        let errors = distribute(2, resps, &mut [&mut a, &mut b]);
        assert!(errors.is_empty());
        assert_eq!(a.as_deref(), Some("a"));
        assert_eq!(b.as_deref(), Some("b"));
    }

    #[test]
    fn distribute_reports_missing_response() {
        let resps = responses(r#"[{"id":0,"jsonrpc":"2.0","result":1}]"#);
        let mut a: Option<u32> = None;
        let mut b: Option<u32> = None;
        let errors = distribute(2, resps, &mut [&mut a, &mut b]);
        assert_eq!(a, Some(1));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, Some(1));
        assert!(matches!(errors[0].error, TransportError::MissingResponse { id: 1 }));
    }

    #[test]
    fn distribute_unknown_and_duplicate_ids() {
        let resps = responses(
            r#"[{"id":0,"jsonrpc":"2.0","result":1},{"id":0,"jsonrpc":"2.0","result":2},{"id":9,"jsonrpc":"2.0","result":3}]"#,
        );
        let mut a: Option<u32> = None;
        let errors = distribute(1, resps, &mut [&mut a]);
        assert_eq!(a, Some(1));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.index.is_none()));
        assert!(matches!(errors[0].error, TransportError::UnknownId { id: Some(0) }));
        assert!(matches!(errors[1].error, TransportError::UnknownId { id: Some(9) }));
    }

    #[test]
    fn distribute_null_id_error_keeps_message() {
        let resps = responses(
            r#"[{"id":null,"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid Request"}}]"#,
        );
        let mut a: Option<u32> = None;
        let errors = distribute(1, resps, &mut [&mut a]);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].index, None);
        assert_eq!(errors[0].error.rpc_error().unwrap().message, "Invalid Request");
        assert_eq!(errors[1].index, Some(0));
        assert!(matches!(errors[1].error, TransportError::MissingResponse { id: 0 }));
    }

    #[test]
    fn invalid_url_rejected() {
        assert!(matches!(
            HttpClient::default_for("not a url"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn invalid_header_rejected() {
        let config = HttpClientConfig::default().with_header("bad header", "x");
        assert!(matches!(
            HttpClient::new("http://127.0.0.1:1", config),
            Err(TransportError::InvalidHeader(_))
        ));
    }
}
