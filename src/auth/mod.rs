use axum::http::{header, HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;

pub const COOKIE_NAME: &str = "jwt";
pub const BCRYPT_COST: u32 = 12;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(id: Uuid, expires_in_secs: i64) -> Self {
        let now = Utc::now();
        Self {
            id,
            exp: (now + Duration::seconds(expires_in_secs)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token: {0}")]
    Invalid(String),
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => JwtError::Expired,
            _ => JwtError::Invalid(e.to_string()),
        })
}

/// Signs a token for `user_id` with the configured lifetime
pub fn sign_token(user_id: Uuid, security: &SecurityConfig) -> Result<String, JwtError> {
    generate_jwt(&Claims::new(user_id, security.jwt_expires_in_secs), &security.jwt_secret)
}

// Cookies

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `Set-Cookie` value carrying a freshly issued token
pub fn token_cookie(token: &str, security: &SecurityConfig) -> String {
    let expires = Utc::now() + Duration::days(security.jwt_cookie_expires_days);
    let mut cookie = format!(
        "{}={}; Expires={}; Path=/; HttpOnly; SameSite=Lax",
        COOKIE_NAME,
        token,
        http_date(expires)
    );
    if security.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Overwrites the token cookie with an already-expired placeholder
pub fn logout_cookie(security: &SecurityConfig) -> String {
    let mut cookie = format!(
        "{}=loggedout; Expires={}; Max-Age=0; Path=/; HttpOnly; SameSite=Lax",
        COOKIE_NAME,
        http_date(DateTime::<Utc>::UNIX_EPOCH)
    );
    if security.secure_cookies {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn set_cookie_header(value: &str) -> Option<(header::HeaderName, HeaderValue)> {
    HeaderValue::from_str(value).ok().map(|v| (header::SET_COOKIE, v))
}

/// Bearer token from `Authorization`, falling back to the `jwt` cookie
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    bearer.or_else(|| token_from_cookies(headers))
}

fn token_from_cookies(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty() && value != "loggedout")
}

// Passwords

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Password worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Hashes on the blocking pool; bcrypt at cost 12 takes a noticeable slice of CPU.
pub async fn hash_password(password: &str) -> Result<String, PasswordError> {
    hash_password_with_cost(password, BCRYPT_COST).await
}

pub async fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, PasswordError> {
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
    Ok(hash)
}

pub async fn verify_password(password: &str, hash: &str) -> Result<bool, PasswordError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await??;
    Ok(ok)
}

// Password reset tokens

/// Raw token goes to the user; only the digest is stored.
#[derive(Debug, Clone)]
pub struct ResetToken {
    pub raw: String,
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let raw = to_hex(&bytes);
        Self {
            digest: digest_token(&raw),
            raw,
            expires_at: Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
        }
    }
}

pub fn digest_token(raw: &str) -> String {
    to_hex(&Sha256::digest(raw.as_bytes()))
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
