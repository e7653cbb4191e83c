//! Firebase Auth REST client (identitytoolkit.googleapis.com).
//!
//! Covers exactly what the chat client needs: signUp, signInWithPassword,
//! profile update, and account lookup. Provider error messages are passed
//! through verbatim so the UI can show them directly.

use serde::Deserialize;
use serde_json::json;

const DEFAULT_AUTH_BASE: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, thiserror::Error)]
pub enum AuthApiError {
    #[error("auth request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Message from the provider's error body (e.g. "EMAIL_EXISTS"),
    /// surfaced to the user as-is.
    #[error("{0}")]
    Api(String),
}

/// Result of signUp / signInWithPassword: the identity plus the session
/// token used for subsequent account calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub local_id: String,
    pub email: String,
    pub id_token: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Client for the identitytoolkit accounts endpoints.
#[derive(Clone)]
pub struct AuthClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AuthClient {
    /// `emulator_host` (host:port) redirects calls to the local auth
    /// emulator; otherwise the hosted endpoint is used.
    pub fn new(api_key: impl Into<String>, emulator_host: Option<&str>) -> Self {
        let base_url = match emulator_host {
            Some(host) => format!("http://{}/identitytoolkit.googleapis.com/v1", host),
            None => DEFAULT_AUTH_BASE.to_string(),
        };
        Self {
            base_url,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/accounts:{}?key={}", self.base_url, method, self.api_key)
    }

    /// POST accounts:signUp — register a new email/password account.
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SessionInfo, AuthApiError> {
        let body = json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });
        self.post(&self.endpoint("signUp"), &body).await
    }

    /// POST accounts:signInWithPassword — authenticate an existing account.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionInfo, AuthApiError> {
        let body = json!({
            "email": email,
            "password": password,
            "returnSecureToken": true,
        });
        self.post(&self.endpoint("signInWithPassword"), &body).await
    }

    /// POST accounts:update — set the display name on the session's account.
    pub async fn update_display_name(
        &self,
        id_token: &str,
        display_name: &str,
    ) -> Result<(), AuthApiError> {
        let body = json!({
            "idToken": id_token,
            "displayName": display_name,
            "returnSecureToken": false,
        });
        let _: serde_json::Value = self.post(&self.endpoint("update"), &body).await?;
        Ok(())
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, AuthApiError> {
        let res = self.client.post(url).json(body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AuthApiError::Api(parse_error_message(status.as_u16(), &body)));
        }
        Ok(res.json().await?)
    }
}

/// Pull the provider's message out of an error body
/// (`{"error":{"message":"EMAIL_EXISTS"}}`), falling back to status + body.
fn parse_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| format!("{} {}", status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_is_extracted_verbatim() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_EXISTS"}}"#;
        assert_eq!(parse_error_message(400, body), "EMAIL_EXISTS");
    }

    #[test]
    fn unparseable_error_falls_back_to_status_and_body() {
        assert_eq!(parse_error_message(502, "Bad Gateway"), "502 Bad Gateway");
    }

    #[test]
    fn emulator_host_rewrites_the_base_url() {
        let client = AuthClient::new("k", Some("127.0.0.1:9099"));
        assert!(client
            .endpoint("signUp")
            .starts_with("http://127.0.0.1:9099/identitytoolkit.googleapis.com/v1/accounts:signUp"));
        let hosted = AuthClient::new("k", None);
        assert!(hosted
            .endpoint("update")
            .starts_with("https://identitytoolkit.googleapis.com/v1/accounts:update"));
    }

    #[test]
    fn session_info_parses_an_optional_display_name() {
        let with_name: SessionInfo = serde_json::from_str(
            r#"{"localId":"u1","email":"a@example.com","idToken":"t","displayName":"Alice"}"#,
        )
        .unwrap();
        assert_eq!(with_name.display_name.as_deref(), Some("Alice"));
        let without: SessionInfo = serde_json::from_str(
            r#"{"localId":"u1","email":"a@example.com","idToken":"t"}"#,
        )
        .unwrap();
        assert!(without.display_name.is_none());
    }
}
