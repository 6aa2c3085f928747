//! External tools as HTTP proxies: arguments are marshalled to JSON and the
//! response body is the tool result. Request-building (method, path, JSON body,
//! timeout) is grounded in the reference crate's `tools/http_client.rs`, simplified
//! to the gateway's fixed (base_url, method, path)-per-tool configuration rather than
//! that file's fuller builder API (domain allow/deny lists, custom headers) which the
//! gateway doesn't need since proxy targets are operator-configured, not user-supplied.

use crate::providers::http_pool::get_or_create_client;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProxyError(pub String);

impl std::fmt::Display for ProxyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tool proxy error: {}", self.0)
    }
}

impl std::error::Error for ProxyError {}

/// Invokes an external tool by proxying `arguments` as the JSON body (for
/// POST/PUT/PATCH) or query parameters (for GET) to `{base_url}{path}`.
pub async fn invoke(
    base_url: &str,
    method: &str,
    path: &str,
    arguments: &Value,
    timeout: Duration,
) -> Result<String, ProxyError> {
    let client = get_or_create_client(base_url);
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);

    let method_upper = method.to_ascii_uppercase();
    let request = match method_upper.as_str() {
        "GET" | "DELETE" | "HEAD" => {
            let query = arguments_to_query_string(arguments);
            let full_url = if query.is_empty() { url } else { format!("{url}?{query}") };
            match method_upper.as_str() {
                "GET" => client.get(full_url),
                "DELETE" => client.delete(full_url),
                _ => client.head(full_url),
            }
        }
        "PUT" => client.put(url).json(arguments),
        "PATCH" => client.patch(url).json(arguments),
        _ => client.post(url).json(arguments),
    };

    let response = request.timeout(timeout).send().await.map_err(|e| ProxyError(e.to_string()))?;
    let status = response.status();
    let body = response.text().await.map_err(|e| ProxyError(e.to_string()))?;

    if !status.is_success() {
        return Err(ProxyError(format!("proxy target returned {status}: {body}")));
    }
    Ok(body)
}

fn arguments_to_query_string(arguments: &Value) -> String {
    let map = match arguments.as_object() {
        Some(m) => m,
        None => return String::new(),
    };
    map.iter()
        .map(|(k, v)| {
            let value_str = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}={}", urlencoding::encode(k), urlencoding::encode(&value_str))
        })
        .collect::<Vec<_>>()
        .join("&")
}
