//! Reload, config echo and the banned page.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::config::Config;
use crate::pipeline::Waf;

/// GET /config
///
/// The interceptor polls this to learn which payloads it must forward.
pub async fn config_echo(config: web::Data<Config>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "enable_request_body_check": config.enable_request_body_check,
        "enable_response_body_check": config.enable_response_body_check,
        "enable_response_filter": config.enable_response_filter,
    }))
}

/// GET /reload
pub async fn reload(waf: web::Data<Waf>) -> HttpResponse {
    waf.reload();
    HttpResponse::Ok().json(json!({"status": "reloaded"}))
}

#[derive(Debug, Deserialize)]
pub struct BannedPageQuery {
    pub ip: Option<String>,
}

/// GET|POST /banned_page
///
/// Renders the configured template, substituting `$IP`/`{{IP}}`,
/// `$EXPIRY`/`{{EXPIRY}}` (ms since epoch), `$REMAIN`/`{{REMAIN}}`
/// (seconds, floored at 0) and `{{REASON}}`. The address comes from the
/// query string or a JSON body.
pub async fn banned_page(
    waf: web::Data<Waf>,
    config: web::Data<Config>,
    query: web::Query<BannedPageQuery>,
    body: Option<web::Json<serde_json::Value>>,
) -> HttpResponse {
    let ip = query
        .ip
        .clone()
        .or_else(|| {
            body.as_ref()
                .and_then(|b| b.get("ip"))
                .and_then(|v| v.as_str())
                .map(String::from)
        })
        .unwrap_or_default();

    let (expiry_ms, remaining, reason) = match waf.bans.entry(&ip) {
        Some(entry) => (
            entry.until.timestamp_millis(),
            (entry.until - Utc::now()).num_seconds().max(0),
            escape_html(&entry.reason),
        ),
        None => (0, 0, "Unknown".to_string()),
    };

    match std::fs::read_to_string(&config.banned_page_file) {
        Ok(template) => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(render(&template, &escape_html(&ip), expiry_ms, remaining, &reason)),
        Err(e) => {
            error!(file = %config.banned_page_file.display(), error = %e, "Failed to load banned page");
            HttpResponse::InternalServerError()
                .content_type("text/html; charset=utf-8")
                .body("<h1>Access Denied</h1><p>Blocked by WAF</p>")
        }
    }
}

fn render(template: &str, ip: &str, expiry_ms: i64, remaining: i64, reason: &str) -> String {
    template
        .replace("$IP", ip)
        .replace("{{IP}}", ip)
        .replace("$EXPIRY", &expiry_ms.to_string())
        .replace("{{EXPIRY}}", &expiry_ms.to_string())
        .replace("$REMAIN", &remaining.to_string())
        .replace("{{REMAIN}}", &remaining.to_string())
        .replace("{{REASON}}", reason)
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
