//! Caller identity and bearer tokens.

use corelib::constants::{ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use serde::{Deserialize, Serialize};
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

/// Identity of the account behind a privileged call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Stable account id issued by the identity provider.
    pub flwr_aid: Option<String>,
    pub account_name: Option<String>,
}

impl AccountInfo {
    pub fn new(flwr_aid: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            flwr_aid: Some(flwr_aid.into()),
            account_name: Some(account_name.into()),
        }
    }
}

/// Access/refresh token pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthTokens").finish_non_exhaustive()
    }
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Read both tokens from call metadata; `None` unless both are present
    /// and valid ASCII.
    pub fn from_metadata(metadata: &MetadataMap) -> Option<Self> {
        let access = metadata.get(ACCESS_TOKEN_KEY)?.to_str().ok()?;
        let refresh = metadata.get(REFRESH_TOKEN_KEY)?.to_str().ok()?;
        Some(Self::new(access, refresh))
    }

    /// Write both tokens into `metadata`, replacing existing ones.
    ///
    /// Returns `false` if a token is not a valid metadata value; nothing is
    /// written in that case.
    pub fn insert_into(&self, metadata: &mut MetadataMap) -> bool {
        let (Ok(access), Ok(refresh)) = (
            AsciiMetadataValue::try_from(self.access_token.as_str()),
            AsciiMetadataValue::try_from(self.refresh_token.as_str()),
        ) else {
            return false;
        };
        metadata.insert(ACCESS_TOKEN_KEY, access);
        metadata.insert(REFRESH_TOKEN_KEY, refresh);
        true
    }
}
