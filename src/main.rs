use anyhow::Context;
use kirogate_lib::backends::KiroBackend;
use kirogate_lib::credential::{
    try_load_credential_document, CredentialStore, KiroCredential, TenantCache, TenantTemplate,
};
use kirogate_lib::logger::{init_logging, mask_token};
use kirogate_lib::server::{self, AppState};
use kirogate_lib::Settings;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env();
    init_logging(&settings.log_level);

    if let Err(e) = settings.validate() {
        tracing::error!("[CONFIG] {}", e);
        std::process::exit(1);
    }

    let mut credential = KiroCredential::new(
        settings.refresh_token.clone().unwrap_or_default(),
        settings.profile_arn.clone(),
        &settings.region,
    );
    if let Some(source) = &settings.kiro_creds_file {
        if let Some(doc) = try_load_credential_document(source).await {
            credential.apply_document(&doc);
            tracing::info!("[CONFIG] 已从 {} 加载凭证", source);
        }
    }
    if credential.refresh_token.is_empty() {
        anyhow::bail!("no refresh token available from REFRESH_TOKEN or KIRO_CREDS_FILE");
    }

    tracing::info!(
        "[CONFIG] region={} refresh_token={} profile_arn={}",
        credential.region,
        mask_token(&credential.refresh_token),
        credential.profile_arn.as_deref().unwrap_or("-")
    );

    let template = TenantTemplate {
        region: credential.region.clone(),
        profile_arn: credential.profile_arn.clone(),
        threshold: settings.token_refresh_threshold(),
        refresh_url: None,
    };
    let default_store = CredentialStore::new(credential, settings.token_refresh_threshold());
    let tenants = TenantCache::new(Arc::new(default_store), template);

    let port = settings.port;
    let state = AppState::new(settings, tenants, Arc::new(KiroBackend::new()));
    server::serve(state, port)
        .await
        .with_context(|| format!("server on port {port} stopped"))?;
    Ok(())
}
