//! Wire types for login and renewal
//!
//! Both endpoints answer inside the standard `{code, message, data}`
//! envelope; these types describe `data`. Debug output redacts tokens.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// Credentials posted to the login endpoint.
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Body posted to the renewal endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewRequest<'a> {
    pub refresh_token: &'a str,
}

/// Fresh token pair returned by the renewal endpoint.
///
/// Older backends name the access token `token`, newer ones `accessToken`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    #[serde(alias = "accessToken")]
    pub token: String,
    pub refresh_token: String,
}

/// Login result: token pair plus the principal it was issued to.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub token: String,
    pub refresh_token: String,
    pub user: Identity,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}
