//! Authentication and authorization for the privileged Exec API.
//!
//! This crate provides:
//! - Account identity and bearer token types carried in call metadata
//! - Pluggable authentication and authorization traits
//! - The [`ExecService`] surface gated by the [`AuthInterceptor`]
//!
//! The caller's identity is never ambient: the interceptor resolves it and
//! passes it to the handler inside the [`CallContext`].

pub mod account;
pub mod interceptor;
pub mod plugin;
pub mod service;

pub use account::{AccountInfo, AuthTokens};
pub use interceptor::{AuthInterceptor, InterceptError};
pub use plugin::{AllowAll, AllowList, ExecAuthPlugin, ExecAuthzPlugin, LoginDetails, StaticTokenAuth};
pub use service::{CallContext, ExecReply, ExecRequest, ExecResponse, ExecService};
