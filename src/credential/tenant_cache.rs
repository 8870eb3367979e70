//! 租户凭证缓存
//!
//! API Key 为 `proxy:refresh` 形式时，以 refresh token 为键为每个租户维护独立的
//! `CredentialStore`。容量固定，超出时按插入顺序淘汰最早的条目（命中不调整顺序）。
//! 默认租户单独持有，不进入缓存，也不参与淘汰。

use crate::credential::store::{CredentialStore, KiroCredential, TokenSource};
use crate::logger::mask_token;
use indexmap::IndexMap;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

pub const TENANT_CACHE_CAPACITY: usize = 100;

/// 新租户凭证的公共参数
#[derive(Debug, Clone)]
pub struct TenantTemplate {
    pub region: String,
    pub profile_arn: Option<String>,
    pub threshold: Duration,
    /// 测试时覆盖刷新端点
    pub refresh_url: Option<String>,
}

pub struct TenantCache {
    default: Arc<dyn TokenSource>,
    entries: Mutex<IndexMap<String, Arc<CredentialStore>>>,
    capacity: usize,
    template: TenantTemplate,
    client: Client,
}

impl TenantCache {
    pub fn new(default: Arc<dyn TokenSource>, template: TenantTemplate) -> Self {
        Self::with_capacity(default, template, TENANT_CACHE_CAPACITY)
    }

    pub fn with_capacity(
        default: Arc<dyn TokenSource>,
        template: TenantTemplate,
        capacity: usize,
    ) -> Self {
        Self {
            default,
            entries: Mutex::new(IndexMap::new()),
            capacity: capacity.max(1),
            template,
            client: Client::new(),
        }
    }

    /// 按租户解析 Token 来源；`None` 返回默认租户
    pub fn resolve(&self, tenant_refresh: Option<&str>) -> Arc<dyn TokenSource> {
        match tenant_refresh {
            Some(refresh) => self.get_or_create(refresh),
            None => self.default.clone(),
        }
    }

    pub fn default_source(&self) -> Arc<dyn TokenSource> {
        self.default.clone()
    }

    /// 获取或创建租户凭证
    pub fn get_or_create(&self, refresh_token: &str) -> Arc<CredentialStore> {
        let mut entries = self.entries.lock();
        if let Some(store) = entries.get(refresh_token) {
            return store.clone();
        }

        if entries.len() >= self.capacity {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                tracing::info!(
                    "[TENANT_CACHE] 缓存已满 ({}), 淘汰最早的租户: {}",
                    self.capacity,
                    mask_token(&evicted)
                );
            }
        }

        let credential = KiroCredential::new(
            refresh_token,
            self.template.profile_arn.clone(),
            &self.template.region,
        );
        let mut store =
            CredentialStore::with_client(credential, self.template.threshold, self.client.clone());
        if let Some(url) = &self.template.refresh_url {
            store = store.with_refresh_url(url.clone());
        }
        let store = Arc::new(store);
        entries.insert(refresh_token.to_string(), store.clone());
        tracing::info!(
            "[TENANT_CACHE] 新建租户凭证: {} (共 {} 个)",
            mask_token(refresh_token),
            entries.len()
        );
        store
    }

    pub fn contains(&self, refresh_token: &str) -> bool {
        self.entries.lock().contains_key(refresh_token)
    }

    pub fn remove(&self, refresh_token: &str) -> bool {
        self.entries.lock().shift_remove(refresh_token).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        tracing::info!("[TENANT_CACHE] 已清空");
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> TenantTemplate {
        TenantTemplate {
            region: "us-east-1".to_string(),
            profile_arn: Some("arn:env".to_string()),
            threshold: Duration::from_secs(600),
            refresh_url: None,
        }
    }

    fn default_store() -> Arc<dyn TokenSource> {
        Arc::new(CredentialStore::new(
            KiroCredential::new("rt-default", None, "us-east-1"),
            Duration::from_secs(600),
        ))
    }

    #[test]
    fn test_hit_returns_same_store() {
        let cache = TenantCache::new(default_store(), template());
        let a = cache.get_or_create("tenant-a");
        let again = cache.get_or_create("tenant-a");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_insertion_order_eviction() {
        let cache = TenantCache::with_capacity(default_store(), template(), 3);
        cache.get_or_create("a");
        cache.get_or_create("b");
        cache.get_or_create("c");
        // 命中不改变顺序
        cache.get_or_create("a");
        cache.get_or_create("d");

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(cache.contains("d"));
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TenantCache::new(default_store(), template());
        cache.get_or_create("a");
        cache.get_or_create("b");
        assert!(cache.remove("a"));
        assert!(!cache.remove("a"));
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_default_and_tenant() {
        let default = default_store();
        let cache = TenantCache::new(default.clone(), template());

        assert!(Arc::ptr_eq(&cache.resolve(None), &default));
        assert!(cache.is_empty());

        let tenant = cache.resolve(Some("rt-tenant"));
        assert_eq!(tenant.region(), "us-east-1");
        assert_eq!(tenant.profile_arn().await.as_deref(), Some("arn:env"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_default_looking_secret_gets_own_store() {
        let default = default_store();
        let cache = TenantCache::new(default.clone(), template());

        let tenant = cache.resolve(Some("__default__"));
        assert!(!Arc::ptr_eq(&tenant, &default));
        assert!(cache.contains("__default__"));
        assert_eq!(cache.len(), 1);
    }
}
