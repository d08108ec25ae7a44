//! The privileged Exec API surface.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::account::{AccountInfo, AuthTokens};
use crate::plugin::LoginDetails;

#[derive(Clone, Debug, PartialEq)]
pub enum ExecRequest {
    StartRun {
        fab_hash: String,
        override_config: BTreeMap<String, String>,
    },
    StreamLogs {
        run_id: u64,
        after_timestamp: f64,
    },
    GetLoginDetails,
    GetAuthTokens {
        device_code: String,
    },
}

impl ExecRequest {
    /// Requests that start or complete a login and so cannot carry tokens.
    pub fn is_login_flow(&self) -> bool {
        matches!(self, ExecRequest::GetLoginDetails | ExecRequest::GetAuthTokens { .. })
    }

    /// RPC method name, for logs and metrics.
    pub fn method(&self) -> &'static str {
        match self {
            ExecRequest::StartRun { .. } => "StartRun",
            ExecRequest::StreamLogs { .. } => "StreamLogs",
            ExecRequest::GetLoginDetails => "GetLoginDetails",
            ExecRequest::GetAuthTokens { .. } => "GetAuthTokens",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExecReply {
    RunStarted { run_id: u64 },
    Logs { log_output: String, latest_timestamp: f64 },
    LoginDetails(LoginDetails),
    AuthTokens(AuthTokens),
}

/// A handler's reply plus the metadata sent back with it.
#[derive(Debug)]
pub struct ExecResponse {
    pub body: ExecReply,
    pub metadata: MetadataMap,
}

impl ExecResponse {
    pub fn new(body: ExecReply) -> Self {
        Self {
            body,
            metadata: MetadataMap::new(),
        }
    }
}

/// Per-call context handed to the handler.
#[derive(Debug, Default)]
pub struct CallContext {
    /// Inbound call metadata.
    pub metadata: MetadataMap,
    /// Set by the interceptor once the caller is authenticated.
    pub account: Option<AccountInfo>,
}

impl CallContext {
    pub fn new(metadata: MetadataMap) -> Self {
        Self {
            metadata,
            account: None,
        }
    }
}

#[async_trait]
pub trait ExecService: Send + Sync + 'static {
    async fn call(&self, request: ExecRequest, context: CallContext) -> Result<ExecResponse, Status>;
}
