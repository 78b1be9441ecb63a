//! Telegram login: widget data verification and the bot's signed login
//! links.

use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tick3t_common::config::TelegramSettings;
use tick3t_common::Tick3tError;
use tracing::{debug, info};

/// Login data older than this is rejected.
pub const MAX_AUTH_AGE_SECS: u64 = 86_400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelegramError {
    #[error("Telegram auth data too old")]
    Stale,
    #[error("invalid Telegram hash")]
    InvalidHash,
    #[error("invalid login token: {0}")]
    InvalidToken(String),
    #[error("invalid login URL: {0}")]
    InvalidLoginUrl(String),
}

impl From<TelegramError> for Tick3tError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::InvalidLoginUrl(msg) => Tick3tError::Config(msg),
            _ => Tick3tError::NotAuthenticated,
        }
    }
}

/// Fields sent by the Telegram login widget (and embedded in bot tokens).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramAuthData {
    pub id: u64,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Unix seconds.
    pub auth_date: u64,
    pub hash: String,
}

impl TelegramAuthData {
    /// Sorted `key=value` lines, excluding `hash`.
    pub fn data_check_string(&self) -> String {
        let mut pairs = vec![
            format!("auth_date={}", self.auth_date),
            format!("first_name={}", self.first_name),
            format!("id={}", self.id),
        ];
        if let Some(ref last_name) = self.last_name {
            pairs.push(format!("last_name={last_name}"));
        }
        if let Some(ref photo_url) = self.photo_url {
            pairs.push(format!("photo_url={photo_url}"));
        }
        if let Some(ref username) = self.username {
            pairs.push(format!("username={username}"));
        }
        pairs.sort();
        pairs.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelegramUser {
    pub id: u64,
    pub display_name: String,
    pub username: Option<String>,
    pub photo_url: Option<String>,
}

pub struct TelegramAuthProvider {
    bot_token: String,
}

impl TelegramAuthProvider {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
        }
    }

    /// HMAC-SHA256 over the data-check string, keyed by `SHA256(bot_token)`.
    fn keyed_mac(&self, data: &TelegramAuthData) -> Hmac<Sha256> {
        let secret_key = Sha256::digest(self.bot_token.as_bytes());
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&secret_key)
            .expect("HMAC can take key of any size");
        mac.update(data.data_check_string().as_bytes());
        mac
    }

    pub fn compute_hash(&self, data: &TelegramAuthData) -> String {
        hex::encode(self.keyed_mac(data).finalize().into_bytes())
    }

    pub fn verify(&self, data: &TelegramAuthData) -> Result<TelegramUser, TelegramError> {
        self.verify_at(data, Utc::now().timestamp().max(0) as u64)
    }

    pub fn verify_at(&self, data: &TelegramAuthData, now: u64) -> Result<TelegramUser, TelegramError> {
        if now.saturating_sub(data.auth_date) > MAX_AUTH_AGE_SECS {
            return Err(TelegramError::Stale);
        }

        let claimed = hex::decode(&data.hash).map_err(|_| TelegramError::InvalidHash)?;
        self.keyed_mac(data)
            .verify_slice(&claimed)
            .map_err(|_| TelegramError::InvalidHash)?;

        let display_name = match data.last_name.as_deref().filter(|s| !s.is_empty()) {
            Some(last_name) => format!("{} {}", data.first_name, last_name),
            None => data.first_name.clone(),
        };
        info!(provider = "telegram", id = data.id, "Telegram authentication successful");

        Ok(TelegramUser {
            id: data.id,
            display_name,
            username: data.username.clone(),
            photo_url: data.photo_url.clone(),
        })
    }
}

/// The user a `/start` command came from.
#[derive(Debug, Clone)]
pub struct TelegramLogin {
    pub chat_id: i64,
    pub user_id: u64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginLink {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginClaims {
    #[serde(flatten)]
    data: TelegramAuthData,
    iat: i64,
    exp: i64,
}

/// Issues the bot's one-click login links: the user's Telegram data, hashed
/// like widget data and wrapped in an HS256 JWT keyed by the bot token.
pub struct TelegramLoginIssuer {
    provider: TelegramAuthProvider,
    login_url: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TelegramLoginIssuer {
    pub fn new(settings: &TelegramSettings) -> Self {
        Self {
            provider: TelegramAuthProvider::new(settings.bot_token.clone()),
            login_url: settings.login_url.clone(),
            encoding_key: EncodingKey::from_secret(settings.bot_token.as_bytes()),
            decoding_key: DecodingKey::from_secret(settings.bot_token.as_bytes()),
        }
    }

    pub fn issue(&self, login: &TelegramLogin) -> Result<LoginLink, TelegramError> {
        self.issue_at(login, Utc::now().timestamp().max(0) as u64)
    }

    fn issue_at(&self, login: &TelegramLogin, now: u64) -> Result<LoginLink, TelegramError> {
        let mut data = TelegramAuthData {
            id: login.user_id,
            first_name: login.first_name.clone(),
            last_name: login.last_name.clone(),
            username: login.username.clone(),
            photo_url: None,
            auth_date: now,
            hash: String::new(),
        };
        data.hash = self.provider.compute_hash(&data);

        let claims = LoginClaims {
            data,
            iat: now as i64,
            exp: (now + MAX_AUTH_AGE_SECS) as i64,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TelegramError::InvalidToken(format!("JWT encode failed: {e}")))?;

        let cid = base64::engine::general_purpose::STANDARD.encode(login.chat_id.to_string());
        let url = reqwest::Url::parse_with_params(
            &self.login_url,
            &[("telegramAuthToken", token.as_str()), ("cid", cid.as_str())],
        )
        .map_err(|e| TelegramError::InvalidLoginUrl(e.to_string()))?;

        debug!(chat_id = login.chat_id, user_id = login.user_id, "issued Telegram login link");
        Ok(LoginLink {
            url: url.to_string(),
            token,
        })
    }

    /// Decode a login token and re-check the embedded Telegram hash.
    pub fn verify_token(&self, token: &str) -> Result<TelegramUser, TelegramError> {
        let validation = Validation::new(Algorithm::HS256);
        let claims = decode::<LoginClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| TelegramError::InvalidToken(e.to_string()))?
            .claims;
        self.provider.verify(&claims.data)
    }

    /// Chat id carried in the `cid` query parameter.
    pub fn decode_chat_id(cid: &str) -> Option<i64> {
        let raw = base64::engine::general_purpose::STANDARD.decode(cid).ok()?;
        String::from_utf8(raw).ok()?.parse().ok()
    }
}
