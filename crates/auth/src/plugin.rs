//! Pluggable authentication and authorization.
//!
//! An [`ExecAuthPlugin`] checks and refreshes bearer tokens found in call
//! metadata; an [`ExecAuthzPlugin`] decides whether a resolved account may
//! use the Exec API at all.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tonic::metadata::MetadataMap;

use crate::account::{AccountInfo, AuthTokens};

/// What a client needs to start a login flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginDetails {
    pub auth_type: String,
    pub device_code: String,
    pub verification_uri_complete: String,
    pub expires_in: u64,
    pub interval: u64,
}

#[async_trait]
pub trait ExecAuthPlugin: Send + Sync + 'static {
    /// Validate the tokens carried in `metadata`.
    ///
    /// Returns whether they are valid and, if known, the account they
    /// belong to.
    async fn validate_tokens_in_metadata(&self, metadata: &MetadataMap) -> (bool, Option<AccountInfo>);

    /// Exchange the refresh token carried in `metadata` for a new pair.
    async fn refresh_tokens(&self, metadata: &MetadataMap) -> (Option<AuthTokens>, Option<AccountInfo>);

    async fn get_login_details(&self) -> Option<LoginDetails>;

    /// Complete a login flow started with [`get_login_details`](Self::get_login_details).
    async fn get_auth_tokens(&self, device_code: &str) -> Option<AuthTokens>;
}

#[async_trait]
pub trait ExecAuthzPlugin: Send + Sync + 'static {
    async fn verify_user_authorization(&self, account: &AccountInfo) -> bool;
}

/// Authorizes every authenticated account.
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl ExecAuthzPlugin for AllowAll {
    async fn verify_user_authorization(&self, _account: &AccountInfo) -> bool {
        true
    }
}

/// Authorizes accounts whose id is listed.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    allowed: HashSet<String>,
}

impl AllowList {
    pub fn new<I, S>(flwr_aids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: flwr_aids.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ExecAuthzPlugin for AllowList {
    async fn verify_user_authorization(&self, account: &AccountInfo) -> bool {
        account
            .flwr_aid
            .as_ref()
            .is_some_and(|aid| self.allowed.contains(aid))
    }
}

/// Token table held in memory.
///
/// Accounts are registered up front with [`issue`](Self::issue) or through
/// a device-code login. Refreshing rotates both tokens; the old pair stops
/// working.
#[derive(Default)]
pub struct StaticTokenAuth {
    access: Mutex<HashMap<String, AccountInfo>>,
    refresh: Mutex<HashMap<String, AccountInfo>>,
    pending_logins: Mutex<HashMap<String, AccountInfo>>,
    counter: AtomicU64,
}

impl StaticTokenAuth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token pair for `account`.
    pub fn issue(&self, account: AccountInfo) -> AuthTokens {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let tokens = AuthTokens::new(format!("access-{n}"), format!("refresh-{n}"));
        self.access
            .lock()
            .insert(tokens.access_token.clone(), account.clone());
        self.refresh
            .lock()
            .insert(tokens.refresh_token.clone(), account);
        tokens
    }

    /// Invalidate an access token, as after its expiry.
    pub fn expire(&self, access_token: &str) {
        self.access.lock().remove(access_token);
    }

    /// Register a pending device-code login completing as `account`.
    pub fn start_login(&self, device_code: impl Into<String>, account: AccountInfo) {
        self.pending_logins.lock().insert(device_code.into(), account);
    }
}

#[async_trait]
impl ExecAuthPlugin for StaticTokenAuth {
    async fn validate_tokens_in_metadata(&self, metadata: &MetadataMap) -> (bool, Option<AccountInfo>) {
        let Some(tokens) = AuthTokens::from_metadata(metadata) else {
            return (false, None);
        };
        match self.access.lock().get(&tokens.access_token) {
            Some(account) => (true, Some(account.clone())),
            None => (false, None),
        }
    }

    async fn refresh_tokens(&self, metadata: &MetadataMap) -> (Option<AuthTokens>, Option<AccountInfo>) {
        let Some(tokens) = AuthTokens::from_metadata(metadata) else {
            return (None, None);
        };
        let Some(account) = self.refresh.lock().remove(&tokens.refresh_token) else {
            return (None, None);
        };
        self.access.lock().remove(&tokens.access_token);
        (Some(self.issue(account.clone())), Some(account))
    }

    async fn get_login_details(&self) -> Option<LoginDetails> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Some(LoginDetails {
            auth_type: "static".to_string(),
            device_code: format!("device-{n}"),
            verification_uri_complete: format!("loopback://login/device-{n}"),
            expires_in: 600,
            interval: 5,
        })
    }

    async fn get_auth_tokens(&self, device_code: &str) -> Option<AuthTokens> {
        let account = self.pending_logins.lock().remove(device_code)?;
        Some(self.issue(account))
    }
}
