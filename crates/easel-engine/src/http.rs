use std::env;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::error::{EngineError, Result};

pub(crate) fn build_http_client(timeout: Duration) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(EngineError::from)
}

/// Reads a JSON body, turning a non-success status into a vendor error that
/// carries the service's own message when it sent one.
pub(crate) fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text()?;
    if !status.is_success() {
        return Err(EngineError::vendor(service, code, vendor_message(&body)));
    }
    serde_json::from_str(&body).map_err(|err| {
        EngineError::vendor(
            service,
            code,
            format!("invalid JSON payload ({err}): {}", truncate_text(&body, 256)),
        )
    })
}

pub(crate) fn download_bytes(http: &HttpClient, service: &str, url: &str) -> Result<Vec<u8>> {
    let response = http.get(url).send()?;
    if !response.status().is_success() {
        let code = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        return Err(EngineError::vendor(
            service,
            code,
            format!("download of {url} failed: {}", truncate_text(&body, 256)),
        ));
    }
    Ok(response.bytes()?.to_vec())
}

/// Pulls the human message out of the error shapes the chat and image
/// services use, falling back to the raw body.
pub(crate) fn vendor_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(body) else {
        return truncate_text(body.trim(), 512);
    };
    let nested = parsed
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str);
    let flat = parsed.get("message").and_then(Value::as_str);
    let code = parsed.get("code").and_then(Value::as_str);
    match (nested.or(flat), code) {
        (Some(message), Some(code)) => format!("{code}: {message}"),
        (Some(message), None) => message.to_string(),
        _ => truncate_text(body.trim(), 512),
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{truncate_text, vendor_message};

    #[test]
    fn vendor_message_prefers_structured_messages() {
        assert_eq!(
            vendor_message(r#"{"code":"InvalidApiKey","message":"Invalid API-key provided."}"#),
            "InvalidApiKey: Invalid API-key provided."
        );
        assert_eq!(
            vendor_message(r#"{"error":{"message":"Insufficient Balance","type":"x"}}"#),
            "Insufficient Balance"
        );
        assert_eq!(vendor_message("  gateway timeout  "), "gateway timeout");
    }

    #[test]
    fn truncate_text_counts_chars_not_bytes() {
        assert_eq!(truncate_text("猫猫猫", 2), "猫猫…");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
