use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use soulful_core::models::Collection;
use soulful_core::remote::{Document, RemoteError, RemoteStore, Subscription, TimeRange};

use crate::server::{ErrorResponse, WatchResponse};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const WATCH_TIMEOUT: Duration = Duration::from_secs(40);

/// Client for a document store started with `soulful serve`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Option<String>,
    api_key: Option<String>,
    rt: Handle,
}

impl HttpRemote {
    /// A client for the store at `base_url`. With no URL every call reports
    /// the remote as unavailable.
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("soulful-cli/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            api_key: api_key.map(str::to_string),
            rt: Handle::try_current().context("HTTP remote requires a tokio runtime")?,
        })
    }

    fn base(&self) -> Result<&str, RemoteError> {
        self.base_url
            .as_deref()
            .ok_or_else(|| RemoteError::Unavailable("no remote store configured".to_string()))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn transport(err: &reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(format!("could not reach remote store: {err}"))
}

/// Turn a non-success response into the classified error it carries.
async fn check(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if let Ok(err) = serde_json::from_str::<ErrorResponse>(&body) {
        return Err(RemoteError::classify(&err.code, &err.message));
    }
    Err(match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT | StatusCode::BAD_GATEWAY => {
            RemoteError::Unavailable(format!("remote store returned {status}"))
        }
        _ => RemoteError::Unknown {
            code: status.as_str().to_string(),
            message: body,
        },
    })
}

async fn parse<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteError> {
    resp.json().await.map_err(|e| RemoteError::Unknown {
        code: "data-loss".to_string(),
        message: format!("unreadable response from remote store: {e}"),
    })
}

async fn watch_once(request: RequestBuilder) -> Result<WatchResponse, RemoteError> {
    let resp = request
        .timeout(WATCH_TIMEOUT)
        .send()
        .await
        .map_err(|e| transport(&e))?;
    parse(check(resp).await?).await
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn create(&self, collection: Collection, data: Value) -> Result<String, RemoteError> {
        let url = format!("{}/v1/docs/{}", self.base()?, collection.name());
        let resp = self
            .authorize(self.client.post(&url).json(&data))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        let created: Value = parse(check(resp).await?).await?;
        created
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::Unknown {
                code: "data-loss".to_string(),
                message: "create response carried no id".to_string(),
            })
    }

    async fn list(
        &self,
        collection: Collection,
        user_id: &str,
        range: Option<TimeRange>,
    ) -> Result<Vec<Document>, RemoteError> {
        let url = format!("{}/v1/docs/{}", self.base()?, collection.name());
        let mut query = vec![("userId", user_id.to_string())];
        if let Some(range) = range {
            query.push(("start", range.start.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
            query.push(("end", range.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)));
        }
        let resp = self
            .authorize(self.client.get(&url).query(&query))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        parse(check(resp).await?).await
    }

    /// Long-polls the watch endpoint on the runtime, delivering a snapshot
    /// whenever the collection version moves. Stops after the first error.
    fn subscribe(&self, collection: Collection, user_id: &str) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = match self.base() {
            Ok(base) => format!("{base}/v1/watch/{}", collection.name()),
            Err(e) => {
                let _ = tx.send(Err(e));
                return Subscription::new(rx, || {});
            }
        };

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let user_id = user_id.to_string();
        let task = self.rt.spawn(async move {
            let mut seen: Option<u64> = None;
            loop {
                let mut query = vec![("userId", user_id.clone())];
                if let Some(version) = seen {
                    query.push(("after", version.to_string()));
                }
                let mut request = client.get(&url).query(&query);
                if let Some(ref key) = api_key {
                    request = request.bearer_auth(key);
                }

                match watch_once(request).await {
                    Ok(update) => {
                        if seen == Some(update.version) {
                            continue;
                        }
                        seen = Some(update.version);
                        if tx.send(Ok(update.documents)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(%collection, error = %e, "watch stopped");
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        Subscription::new(rx, move || task.abort())
    }

    async fn delete(
        &self,
        collection: Collection,
        user_id: &str,
        id: &str,
    ) -> Result<(), RemoteError> {
        let url = format!("{}/v1/docs/{}/{id}", self.base()?, collection.name());
        let resp = self
            .authorize(self.client.delete(&url).query(&[("userId", user_id)]))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| transport(&e))?;
        check(resp).await?;
        Ok(())
    }
}
