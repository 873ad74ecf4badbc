use std::sync::RwLock;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ConversationStore, MemoryRelay, RelayError, Subscription};
use crate::conversation::DocumentKey;

/// Relay reachable over HTTP
///
/// Documents are written with `POST /sendMessage`. When a write expects a reply, the server holds
/// the request until the counterparty answers and returns the answered document; it's then
/// published to local subscribers. Subscriptions therefore only observe documents this client
/// wrote or received in response.
pub struct HttpRelay {
    /// HTTP client (backed by [reqwest])
    http_client: HttpClient,
    /// API endpoint
    base_url: Url,
    token: RwLock<Option<String>>,
    observed: MemoryRelay,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageReq<'a> {
    collection: &'static str,
    doc_id: &'a str,
    data: &'a serde_json::Value,
    expect_response: bool,
}

/// Every API response is wrapped into `{response, error}`
#[derive(Deserialize)]
pub(crate) struct ApiResponse<T> {
    response: Option<T>,
    error: Option<String>,
}

impl HttpRelay {
    pub fn new(http_client: HttpClient, base_url: Url) -> Self {
        Self {
            http_client,
            base_url,
            token: RwLock::new(None),
            observed: MemoryRelay::new(),
        }
    }

    fn token(&self) -> Result<String, RelayError> {
        self.token
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(RelayError::Unauthorized)
    }
}

#[async_trait]
impl ConversationStore for HttpRelay {
    async fn write(
        &self,
        key: &DocumentKey,
        document: serde_json::Value,
        expect_reply: bool,
    ) -> Result<(), RelayError> {
        let token = self.token()?;
        let req = SendMessageReq {
            collection: key.collection.as_str(),
            doc_id: &key.id,
            data: &document,
            expect_response: expect_reply,
        };
        self.observed.put(key, document.clone());

        let reply: Option<serde_json::Value> = post(
            &self.http_client,
            &self.base_url,
            "sendMessage",
            Some(&token),
            &req,
        )
        .await?;
        match reply {
            Some(reply) if !reply.is_null() => {
                tracing::trace!(%key, "relay replied with updated document");
                self.observed.put(key, reply)
            }
            _ => (),
        }
        Ok(())
    }

    async fn read(&self, key: &DocumentKey) -> Result<Option<serde_json::Value>, RelayError> {
        Ok(self.observed.get(key))
    }

    async fn subscribe(&self, key: &DocumentKey) -> Result<Subscription, RelayError> {
        self.observed.subscribe(key).await
    }

    fn authorize(&self, token: &str) {
        *self
            .token
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.to_owned());
    }
}

/// Posts JSON to the API method and unwraps `{response, error}` envelope
pub(crate) async fn post<Req, Resp>(
    http_client: &HttpClient,
    base_url: &Url,
    method: &'static str,
    bearer_token: Option<&str>,
    body: &Req,
) -> Result<Option<Resp>, RelayError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let url = base_url
        .join(method)
        .map_err(|err| RelayError::BuildApiUrl { method, err })?;
    let mut request = http_client.post(url).json(body);
    if let Some(token) = bearer_token {
        request = request.bearer_auth(token);
    }
    let response = request.send().await.map_err(RelayError::SendRequest)?;

    let status = response.status();
    let result: ApiResponse<Resp> = response
        .json()
        .await
        .map_err(RelayError::ReceiveAndParse)?;
    if result.error.is_none() != status.is_success() {
        return Err(RelayError::Confused {
            status,
            response_err: result.error,
        });
    }
    if let Some(description) = result.error {
        return Err(RelayError::ServerReturnedError {
            status,
            description,
        });
    }
    Ok(result.response)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::ApiResponse;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Token {
        token: String,
    }

    #[test]
    fn response_fields_are_optional() {
        let ok: ApiResponse<Token> =
            serde_json::from_value(json!({ "response": { "token": "t" } })).unwrap();
        assert_eq!(
            ok.response,
            Some(Token {
                token: "t".into()
            })
        );
        assert_eq!(ok.error, None);

        let failed: ApiResponse<Token> =
            serde_json::from_value(json!({ "error": "unauthorized" })).unwrap();
        assert_eq!(failed.response, None);
        assert_eq!(failed.error.as_deref(), Some("unauthorized"));
    }
}
