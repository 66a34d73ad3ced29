use reqwest::{Client, Method};
use url::Url;

use pledge_core::Deferred;
use pledge_engine::LoopHandle;

use crate::types::{FetchConfig, FetchError, FetchRequest, FetchResponse};

/// Issues requests on a loop's I/O tier and settles a `Deferred` with the
/// outcome on the loop thread.
#[derive(Clone)]
pub struct Fetcher {
    handle: LoopHandle,
    client: Client,
}

impl Fetcher {
    pub fn new(handle: LoopHandle, config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .map_err(|err| FetchError::Client {
                detail: err.to_string(),
            })?;
        Ok(Self { handle, client })
    }

    /// Start `request` and return its eventual response.
    ///
    /// An unparsable URL still rejects through a microtask, never inline.
    pub fn fetch(&self, request: FetchRequest) -> Deferred<FetchResponse, FetchError> {
        Deferred::new(&self.handle, |resolve, reject| {
            let url = match Url::parse(&request.url) {
                Ok(url) => url,
                Err(err) => {
                    tracing::warn!(url = %request.url, %err, "Rejecting request with invalid URL");
                    reject(FetchError::InvalidUrl {
                        url: request.url.clone(),
                        detail: err.to_string(),
                    });
                    return;
                }
            };
            tracing::debug!(%url, method = %request.method, "Starting request");
            let work = send(self.client.clone(), request.method.clone(), url);
            self.handle
                .spawn_io(work, move |outcome: Result<FetchResponse, FetchError>| {
                    match outcome {
                        Ok(response) => resolve(response),
                        Err(error) => reject(error),
                    }
                });
        })
    }
}

/// One-shot helper: build a client from `config` and issue `request`.
pub fn fetch(
    handle: &LoopHandle,
    config: &FetchConfig,
    request: FetchRequest,
) -> Deferred<FetchResponse, FetchError> {
    match Fetcher::new(handle.clone(), config) {
        Ok(fetcher) => fetcher.fetch(request),
        Err(error) => Deferred::rejected(handle, error),
    }
}

async fn send(client: Client, method: Method, url: Url) -> Result<FetchResponse, FetchError> {
    let response = client
        .request(method, url)
        .send()
        .await
        .map_err(transport)?;

    let status = response.status().as_u16();
    let final_url = response.url().to_string();
    if status >= 400 {
        tracing::warn!(status, url = %final_url, "Request failed");
        return Err(FetchError::Status { status });
    }

    let bytes = response.bytes().await.map_err(transport)?;
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).map_err(|err| FetchError::Decode {
            detail: err.to_string(),
        })?
    };
    tracing::debug!(status, url = %final_url, bytes = bytes.len(), "Request completed");

    Ok(FetchResponse {
        status,
        url: final_url,
        body,
    })
}

fn transport(err: reqwest::Error) -> FetchError {
    tracing::warn!(%err, "Transport failure");
    FetchError::Transport {
        detail: err.to_string(),
    }
}
