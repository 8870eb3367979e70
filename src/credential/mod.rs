//! Kiro 凭证管理模块
//!
//! 提供凭证文档加载、Token 刷新和多租户凭证缓存

mod creds_file;
mod fingerprint;
mod store;
mod tenant_cache;

pub use creds_file::{
    expand_home, load_credential_document, try_load_credential_document, CredentialDocument,
};
pub use fingerprint::{fingerprint_for, kiro_headers, machine_fingerprint, refresh_user_agent};
pub use store::{
    CredentialStore, KiroCredential, TokenSource, DEFAULT_EXPIRES_IN, EXPIRY_MARGIN_SECS,
    REFRESH_BASE_DELAY, REFRESH_MAX_ATTEMPTS,
};
pub use tenant_cache::{TenantCache, TenantTemplate, TENANT_CACHE_CAPACITY};
