//! Webhooks fired on breaker transitions.
//!
//! Side effects run on their own task after the state change is committed;
//! a failing webhook is logged and never affects the breaker.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::Deserialize;
use thiserror::Error;

use crate::resilience::circuit_breaker::fallback::FallbackBody;
use crate::resilience::SpecError;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SideEffectError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawWebhook {
    #[serde(rename = "URL")]
    url: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    form: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    body: FallbackBody,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "Type", content = "Action", rename_all = "lowercase")]
enum RawSideEffect {
    Webhook(RawWebhook),
}

#[derive(Debug, Clone)]
pub struct Webhook {
    url: url::Url,
    method: Method,
    headers: Vec<(String, String)>,
    form: Vec<(String, String)>,
    body: Vec<u8>,
    /// Set when the body shape implies a type and no header names one.
    content_type: Option<&'static str>,
}

impl Webhook {
    pub fn from_json(field: &'static str, value: &serde_json::Value) -> Result<Self, SpecError> {
        let RawSideEffect::Webhook(raw) = RawSideEffect::deserialize(value)?;
        let url = url::Url::parse(&raw.url)
            .map_err(|e| SpecError::Invalid(format!("{}: bad URL: {}", field, e)))?;
        let method = if raw.method.is_empty() {
            Method::POST
        } else {
            Method::from_bytes(raw.method.to_ascii_uppercase().as_bytes())
                .map_err(|_| SpecError::Invalid(format!("{}: bad method {:?}", field, raw.method)))?
        };
        if !raw.form.is_empty() && !raw.body.is_empty() {
            return Err(SpecError::Invalid(format!(
                "{}: Form and Body are mutually exclusive",
                field
            )));
        }
        let has_body = !raw.body.is_empty();
        let (body, implied_type) = raw.body.encode()?;
        let headers = flatten_values(raw.headers);
        let names_type = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        Ok(Self {
            url,
            method,
            headers,
            form: flatten_values(raw.form),
            body,
            content_type: (has_body && !names_type).then_some(implied_type),
        })
    }

    pub async fn exec(&self, client: &reqwest::Client) -> Result<(), SideEffectError> {
        let mut request = client
            .request(self.method.clone(), self.url.clone())
            .timeout(WEBHOOK_TIMEOUT);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !self.form.is_empty() {
            request = request.form(&self.form);
        } else if !self.body.is_empty() {
            if let Some(content_type) = self.content_type {
                request = request.header(CONTENT_TYPE, content_type);
            }
            request = request.body(self.body.clone());
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SideEffectError::Status(response.status()));
        }
        Ok(())
    }
}

fn flatten_values(map: BTreeMap<String, Vec<String>>) -> Vec<(String, String)> {
    map.into_iter()
        .flat_map(|(k, vs)| vs.into_iter().map(move |v| (k.clone(), v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_webhook() {
        let hook = Webhook::from_json(
            "OnTripped",
            &json!({
                "Type": "webhook",
                "Action": {
                    "URL": "http://localhost:9999/alerts",
                    "Method": "put",
                    "Headers": {"X-Token": ["a", "b"]},
                    "Form": {"state": ["tripped"]}
                }
            }),
        )
        .unwrap();
        assert_eq!(hook.method, Method::PUT);
        assert_eq!(hook.headers.len(), 2);
        assert_eq!(hook.form, vec![("state".to_string(), "tripped".to_string())]);
    }

    fn hook_with_body(body: serde_json::Value) -> Webhook {
        Webhook::from_json(
            "OnTripped",
            &json!({"Type": "webhook", "Action": {"URL": "http://x/", "Body": body}}),
        )
        .unwrap()
    }

    #[test]
    fn test_webhook_body_shapes() {
        let text = hook_with_body(json!("tripped"));
        assert_eq!(text.body, b"tripped");
        assert_eq!(text.content_type, Some("text/plain; charset=utf-8"));

        let bytes = hook_with_body(json!([104, 105]));
        assert_eq!(bytes.body, b"hi");
        assert_eq!(bytes.content_type, Some("application/octet-stream"));

        let object = hook_with_body(json!({"state": "tripped"}));
        let sent: serde_json::Value = serde_json::from_slice(&object.body).unwrap();
        assert_eq!(sent, json!({"state": "tripped"}));
        assert_eq!(object.content_type, Some("application/json"));
    }

    #[test]
    fn test_webhook_header_content_type_wins() {
        let hook = Webhook::from_json(
            "OnStandby",
            &json!({"Type": "webhook", "Action": {
                "URL": "http://x/",
                "Headers": {"content-type": ["application/vnd.alert+json"]},
                "Body": {"state": "standby"}
            }}),
        )
        .unwrap();
        assert_eq!(hook.content_type, None);

        let empty = Webhook::from_json("OnStandby", &json!({"Type": "webhook", "Action": {"URL": "http://x/"}}))
            .unwrap();
        assert!(empty.body.is_empty());
        assert_eq!(empty.content_type, None);
    }

    #[test]
    fn test_reject_bad_webhooks() {
        assert!(Webhook::from_json("OnTripped", &json!({"Type": "webhook", "Action": {"URL": "::"}})).is_err());
        assert!(Webhook::from_json("OnTripped", &json!({"Type": "email", "Action": {}})).is_err());
        assert!(Webhook::from_json(
            "OnTripped",
            &json!({"Type": "webhook", "Action": {"URL": "http://x", "Form": {"a": ["1"]}, "Body": "b"}})
        )
        .is_err());
    }
}
