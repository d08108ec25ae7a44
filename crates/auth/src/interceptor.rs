//! Authentication gate in front of an [`ExecService`].
//!
//! # Decision per call
//!
//! 1. Login-flow requests pass through unauthenticated
//! 2. Valid tokens: resolve the account, check authorization, call the handler
//! 3. Otherwise try a refresh: on new tokens resolve and authorize as in 2,
//!    call the handler and attach the new tokens to the response metadata,
//!    or to the error status if the handler fails
//! 4. Neither: abort with `Unauthenticated`
//!
//! Every call is judged on its own; nothing is retried and no identity
//! outlives the call.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::metadata::MetadataMap;
use tonic::{Code, Status};
use tracing::{debug, warn};

use crate::account::{AccountInfo, AuthTokens};
use crate::plugin::{ExecAuthPlugin, ExecAuthzPlugin};
use crate::service::{CallContext, ExecRequest, ExecResponse, ExecService};

/// Reasons a call is aborted before reaching the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InterceptError {
    #[error("Tokens validated, but user info not found")]
    ValidatedWithoutAccount,

    #[error("Tokens refreshed, but user info not found")]
    RefreshedWithoutAccount,

    #[error("User not authorized. Please contact the SuperLink administrator.")]
    NotAuthorized,

    #[error("Access denied")]
    AccessDenied,
}

impl InterceptError {
    pub fn code(&self) -> Code {
        match self {
            InterceptError::NotAuthorized => Code::PermissionDenied,
            _ => Code::Unauthenticated,
        }
    }
}

impl From<InterceptError> for Status {
    fn from(err: InterceptError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}

/// Wraps `S`, authenticating every call before forwarding it.
pub struct AuthInterceptor<S> {
    inner: S,
    auth: Arc<dyn ExecAuthPlugin>,
    authz: Arc<dyn ExecAuthzPlugin>,
}

impl<S: ExecService> AuthInterceptor<S> {
    pub fn new(inner: S, auth: Arc<dyn ExecAuthPlugin>, authz: Arc<dyn ExecAuthzPlugin>) -> Self {
        Self { inner, auth, authz }
    }

    async fn authorize(
        &self,
        account: Option<AccountInfo>,
        missing: InterceptError,
    ) -> Result<AccountInfo, InterceptError> {
        let account = account.ok_or(missing)?;
        if self.authz.verify_user_authorization(&account).await {
            Ok(account)
        } else {
            Err(InterceptError::NotAuthorized)
        }
    }

    async fn admit(
        &self,
        request: &ExecRequest,
        context: &CallContext,
    ) -> Result<Admission, InterceptError> {
        let (valid, account) = self.auth.validate_tokens_in_metadata(&context.metadata).await;
        if valid {
            let account = self
                .authorize(account, InterceptError::ValidatedWithoutAccount)
                .await?;
            return Ok(Admission {
                account,
                refreshed: None,
            });
        }

        let (tokens, account) = self.auth.refresh_tokens(&context.metadata).await;
        if let Some(tokens) = tokens {
            let account = self
                .authorize(account, InterceptError::RefreshedWithoutAccount)
                .await?;
            debug!(method = request.method(), "tokens refreshed");
            return Ok(Admission {
                account,
                refreshed: Some(tokens),
            });
        }

        Err(InterceptError::AccessDenied)
    }
}

struct Admission {
    account: AccountInfo,
    refreshed: Option<AuthTokens>,
}

#[async_trait]
impl<S: ExecService> ExecService for AuthInterceptor<S> {
    async fn call(&self, request: ExecRequest, mut context: CallContext) -> Result<ExecResponse, Status> {
        if request.is_login_flow() {
            return self.inner.call(request, context).await;
        }

        let admission = match self.admit(&request, &context).await {
            Ok(admission) => admission,
            Err(err) => {
                warn!(method = request.method(), %err, "call rejected");
                metrics::counter!("exec_auth_rejections_total", "method" => request.method())
                    .increment(1);
                return Err(err.into());
            }
        };

        context.account = Some(admission.account);
        // The refresh already rotated the pair, so the caller gets the new
        // tokens whatever the handler returns.
        match self.inner.call(request, context).await {
            Ok(mut response) => {
                attach(admission.refreshed.as_ref(), &mut response.metadata);
                Ok(response)
            }
            Err(mut status) => {
                attach(admission.refreshed.as_ref(), status.metadata_mut());
                Err(status)
            }
        }
    }
}

fn attach(tokens: Option<&AuthTokens>, metadata: &mut MetadataMap) {
    if let Some(tokens) = tokens {
        if !tokens.insert_into(metadata) {
            warn!("refreshed tokens are not valid metadata, not attached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = Status::from(InterceptError::NotAuthorized);
        assert_eq!(status.code(), Code::PermissionDenied);
        assert_eq!(
            status.message(),
            "User not authorized. Please contact the SuperLink administrator."
        );

        for err in [
            InterceptError::ValidatedWithoutAccount,
            InterceptError::RefreshedWithoutAccount,
            InterceptError::AccessDenied,
        ] {
            assert_eq!(Status::from(err).code(), Code::Unauthenticated);
        }
    }
}
