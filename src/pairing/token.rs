use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::relay::RelayError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTokenRequest {
    #[serde(alias = "pairingId")]
    pub session_id: String,
    /// Ed25519 signature over the session id, hex encoded
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTokenResponse {
    pub token: String,
    /// Counterparty encryption key, hex encoded
    #[serde(alias = "appPublicKey")]
    pub counterparty_public_key: String,
    /// Unix time in milliseconds
    pub token_expiration: u64,
    #[serde(alias = "deviceName")]
    pub device_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub token: String,
    /// Ed25519 signature over the token, hex encoded
    pub signed_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub token: String,
    pub token_expiration: u64,
}

/// Issues bearer tokens in exchange for pairing proofs
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn get_token(&self, req: &GetTokenRequest) -> Result<GetTokenResponse, RelayError>;
    async fn refresh_token(
        &self,
        req: &RefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, RelayError>;
}

#[async_trait]
impl<T: TokenEndpoint + ?Sized> TokenEndpoint for std::sync::Arc<T> {
    async fn get_token(&self, req: &GetTokenRequest) -> Result<GetTokenResponse, RelayError> {
        (**self).get_token(req).await
    }

    async fn refresh_token(
        &self,
        req: &RefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, RelayError> {
        (**self).refresh_token(req).await
    }
}

#[cfg(feature = "http")]
pub use self::http::HttpTokenEndpoint;

#[cfg(feature = "http")]
mod http {
    use async_trait::async_trait;
    use reqwest::{Client as HttpClient, Url};

    use super::*;
    use crate::relay::http::post;

    /// Token endpoint reachable over HTTP
    #[derive(Debug, Clone)]
    pub struct HttpTokenEndpoint {
        http_client: HttpClient,
        base_url: Url,
    }

    impl HttpTokenEndpoint {
        pub fn new(http_client: HttpClient, base_url: Url) -> Self {
            Self {
                http_client,
                base_url,
            }
        }
    }

    #[async_trait]
    impl TokenEndpoint for HttpTokenEndpoint {
        async fn get_token(&self, req: &GetTokenRequest) -> Result<GetTokenResponse, RelayError> {
            post(&self.http_client, &self.base_url, "getToken", None, req)
                .await?
                .ok_or(RelayError::EmptyResponse("getToken"))
        }

        async fn refresh_token(
            &self,
            req: &RefreshTokenRequest,
        ) -> Result<RefreshTokenResponse, RelayError> {
            post(
                &self.http_client,
                &self.base_url,
                "refreshToken",
                Some(&req.token),
                req,
            )
            .await?
            .ok_or(RelayError::EmptyResponse("refreshToken"))
        }
    }
}
