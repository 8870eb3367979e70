//! 凭证文档加载
//!
//! `KIRO_CREDS_FILE` 可以是本地路径（支持 `~/` 前缀）或 `http(s)://` URL，
//! 内容为 `{refreshToken, accessToken, profileArn, region, expiresAt}`，所有字段可选。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// RFC3339 时间串
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

impl CredentialDocument {
    /// 解析 `expiresAt`，格式错误时返回 None
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.expires_at.as_deref()?;
        match DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!("[KIRO_AUTH] expiresAt 格式无效 '{}': {}", raw, e);
                None
            }
        }
    }
}

/// 展开 `~/` 前缀
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn is_url(source: &str) -> bool {
    url::Url::parse(source)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// 从文件或 URL 读取凭证文档
pub async fn load_credential_document(
    source: &str,
) -> Result<CredentialDocument, Box<dyn std::error::Error + Send + Sync>> {
    if is_url(source) {
        let doc = reqwest::get(source)
            .await?
            .error_for_status()?
            .json::<CredentialDocument>()
            .await?;
        tracing::info!("[KIRO_AUTH] 凭证已从 URL 加载: {}", source);
        Ok(doc)
    } else {
        let path = expand_home(source);
        let content = tokio::fs::read_to_string(&path).await?;
        let doc: CredentialDocument = serde_json::from_str(&content)?;
        tracing::info!("[KIRO_AUTH] 凭证已从文件加载: {:?}", path);
        Ok(doc)
    }
}

/// 读取凭证文档，失败时记录错误并返回 None
pub async fn try_load_credential_document(source: &str) -> Option<CredentialDocument> {
    match load_credential_document(source).await {
        Ok(doc) => {
            tracing::info!(
                "[KIRO_AUTH] 凭证文档: has_refresh={}, has_access={}, region={:?}",
                doc.refresh_token.is_some(),
                doc.access_token.is_some(),
                doc.region
            );
            Some(doc)
        }
        Err(e) => {
            tracing::error!("[KIRO_AUTH] 加载凭证失败 {}: {}", source, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"refreshToken":"rt-file","accessToken":"at-file","profileArn":"arn:aws:x","region":"eu-west-1","expiresAt":"2030-01-01T00:00:00Z"}}"#
        )
        .unwrap();

        let doc = load_credential_document(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(doc.refresh_token.as_deref(), Some("rt-file"));
        assert_eq!(doc.access_token.as_deref(), Some("at-file"));
        assert_eq!(doc.region.as_deref(), Some("eu-west-1"));
        assert_eq!(
            doc.expires_at().unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_partial_document_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"refreshToken":"only"}}"#).unwrap();
        let doc = try_load_credential_document(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(doc.refresh_token.as_deref(), Some("only"));
        assert!(doc.profile_arn.is_none());
        assert!(doc.expires_at().is_none());

        assert!(try_load_credential_document("/definitely/not/here.json")
            .await
            .is_none());
    }

    #[test]
    fn test_bad_expiry_is_ignored() {
        let doc = CredentialDocument {
            expires_at: Some("tomorrow".to_string()),
            ..Default::default()
        };
        assert!(doc.expires_at().is_none());
    }

    #[test]
    fn test_url_detection() {
        assert!(is_url("https://example.com/creds.json"));
        assert!(is_url("http://127.0.0.1:9000/c"));
        assert!(!is_url("/etc/kiro/creds.json"));
        assert!(!is_url("~/creds.json"));
        assert!(!is_url("C:\\creds.json"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path.json"), PathBuf::from("/abs/path.json"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/creds.json"), home.join("creds.json"));
        }
    }
}
