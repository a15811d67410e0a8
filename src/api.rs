use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::store::WireMessage;
use crate::state::UserId;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned {status}: {detail}")]
    Status { status: u16, detail: String },
}

/// User record as the server returns it. `private_key` is only present on
/// self-lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    pub nickname: String,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    text: &'a str,
    public_key: &'a str,
}

#[derive(Deserialize)]
struct EncryptResponse {
    encrypted_text: String,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    encrypted_text: &'a str,
    private_key: &'a str,
}

#[derive(Deserialize)]
struct DecryptResponse {
    decrypted_text: String,
}

#[derive(Serialize)]
struct CreateUserRequest<'a> {
    nickname: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// Thin typed wrapper over the HTTP API. Cheap to clone; all methods are
/// plain request/response with no retry policy of their own.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn checked(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let detail = match resp.json::<ErrorBody>().await {
            Ok(body) => body.detail,
            Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
        };
        Err(ApiError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, ApiError> {
        let resp = self.http.get(format!("{}/users", self.base)).send().await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    pub async fn user_by_id(&self, id: UserId) -> Result<UserRecord, ApiError> {
        let resp = self
            .http
            .get(format!("{}/users/{id}", self.base))
            .send()
            .await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// `None` on any non-success status: an unknown nickname triggers the
    /// account-create flow rather than an error.
    pub async fn user_by_nickname(&self, nickname: &str) -> Result<Option<UserRecord>, ApiError> {
        let resp = self
            .http
            .get(format!("{}/users/by-nickname/{nickname}", self.base))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        Ok(Some(resp.json().await?))
    }

    pub async fn create_user(&self, nickname: &str) -> Result<UserRecord, ApiError> {
        let resp = self
            .http
            .post(format!("{}/users/create", self.base))
            .json(&CreateUserRequest { nickname })
            .send()
            .await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    /// All messages involving `identity_id`, both directions, unfiltered by
    /// peer. The store filters per conversation.
    pub async fn messages_for(&self, identity_id: UserId) -> Result<Vec<WireMessage>, ApiError> {
        let resp = self
            .http
            .get(format!("{}/messages/{identity_id}", self.base))
            .send()
            .await?;
        Ok(Self::checked(resp).await?.json().await?)
    }

    pub async fn encrypt(&self, text: &str, public_key: &str) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(format!("{}/encrypt", self.base))
            .json(&EncryptRequest { text, public_key })
            .send()
            .await?;
        let body: EncryptResponse = Self::checked(resp).await?.json().await?;
        Ok(body.encrypted_text)
    }

    pub async fn decrypt(&self, encrypted_text: &str, private_key: &str) -> Result<String, ApiError> {
        let resp = self
            .http
            .post(format!("{}/decrypt", self.base))
            .json(&DecryptRequest {
                encrypted_text,
                private_key,
            })
            .send()
            .await?;
        let body: DecryptResponse = Self::checked(resp).await?.json().await?;
        Ok(body.decrypted_text)
    }
}
