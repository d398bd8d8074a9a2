use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::NotifyError;

/// One outbound email, ready for the provider. The dedupe key travels with
/// the request so even a duplicate dispatch call downstream is a no-op at
/// the provider boundary.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub category: String,
    pub dedupe_key: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DispatchReceipt {
    pub provider_message_id: Option<String>,
}

/// Black-box email dispatch. Implementations classify every failure as
/// transient or permanent; they never panic past this boundary.
#[allow(async_fn_in_trait)]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<DispatchReceipt, NotifyError>;
}

/// HTTP provider speaking a Resend-style JSON API.
pub struct HttpEmailProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    from: String,
}

#[derive(Debug, Deserialize)]
struct ProviderResponse {
    id: Option<String>,
}

impl HttpEmailProvider {
    pub fn new(endpoint: String, api_key: String, from: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            api_key,
            from,
        }
    }
}

impl EmailProvider for HttpEmailProvider {
    async fn send(&self, email: &OutboundEmail) -> Result<DispatchReceipt, NotifyError> {
        let payload = serde_json::json!({
            "from": self.from,
            "to": [email.to],
            "subject": email.subject,
            "html": email.html,
            "text": email.text,
            "headers": { "X-Entity-Ref-ID": email.dedupe_key },
            "tags": [
                { "name": "category", "value": email.category },
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::TransientDispatch(format!("provider unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let body: ProviderResponse = response.json().await.unwrap_or(ProviderResponse { id: None });
            debug!("Email dispatched, provider id {:?}", body.id);
            return Ok(DispatchReceipt {
                provider_message_id: body.id,
            });
        }

        let detail = response.text().await.unwrap_or_default();
        // 429 and server-side errors are worth retrying; anything else is a
        // rejection of this request and will fail the same way again.
        if status.is_server_error() || status.as_u16() == 429 {
            Err(NotifyError::TransientDispatch(format!(
                "provider returned {status}: {detail}"
            )))
        } else {
            Err(NotifyError::PermanentDispatch(format!(
                "provider rejected send ({status}): {detail}"
            )))
        }
    }
}
