/// Supabase 向けの認証ヘッダーを組み立てるヘルパー。
///
/// Edge Function と PostgREST の両方が `Authorization: Bearer` と `apikey` を要求するため、
/// 1 つの `reqwest::Client` のデフォルトヘッダーとして設定して使い回す。
use anyhow::{Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// `apikey` ヘッダーの名前。
pub(crate) const API_KEY_HEADER: &str = "apikey";

/// サービスキーから認証済みのデフォルトヘッダーを構築する。
///
/// # Errors
/// キーにヘッダー値として使えない文字が含まれる場合はエラーを返す。
pub(crate) fn build_service_headers(service_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    add_bearer_auth(&mut headers, service_key)?;

    let mut api_key =
        HeaderValue::from_str(service_key).context("service key is not a valid header value")?;
    api_key.set_sensitive(true);
    headers.insert(HeaderName::from_static(API_KEY_HEADER), api_key);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}

/// `Authorization: Bearer <token>` を既存の HeaderMap に追加する。
///
/// # Errors
/// トークンにヘッダー値として使えない文字が含まれる場合はエラーを返す。
pub(crate) fn add_bearer_auth(headers: &mut HeaderMap, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .context("bearer token is not a valid header value")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_service_headers_sets_bearer_and_apikey() {
        let headers = build_service_headers("secret").expect("headers should build");

        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer secret"
        );
        assert_eq!(
            headers.get(API_KEY_HEADER).unwrap().to_str().unwrap(),
            "secret"
        );
        assert_eq!(
            headers.get(CONTENT_TYPE).unwrap().to_str().unwrap(),
            "application/json"
        );
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn build_service_headers_rejects_newlines() {
        assert!(build_service_headers("bad\nkey").is_err());
    }

    #[test]
    fn add_bearer_auth_adds_to_existing_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Custom", HeaderValue::from_static("value"));

        add_bearer_auth(&mut headers, "token").expect("header should be added");

        assert_eq!(headers.len(), 2);
        assert_eq!(
            headers.get(AUTHORIZATION).unwrap().to_str().unwrap(),
            "Bearer token"
        );
    }
}
