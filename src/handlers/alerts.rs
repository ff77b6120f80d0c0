//! Alert journal endpoints.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::middleware::ApiKey;
use crate::pipeline::Waf;

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    pub limit: Option<usize>,
    pub ip: Option<String>,
}

/// GET /alerts?limit=&ip=
pub async fn alerts_list(
    _auth: ApiKey,
    waf: web::Data<Waf>,
    query: web::Query<AlertsQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(100);
    let alerts = match query.ip.as_deref() {
        Some(ip) if !ip.is_empty() => waf.alerts.get_alerts_by_ip(ip, limit),
        _ => waf.alerts.get_alerts(limit),
    };
    HttpResponse::Ok().json(json!({"total": alerts.len(), "alerts": alerts}))
}

/// POST /alerts/clear
pub async fn alerts_clear(_auth: ApiKey, waf: web::Data<Waf>) -> HttpResponse {
    let status = if waf.alerts.clear() { "cleared" } else { "failed" };
    HttpResponse::Ok().json(json!({"status": status}))
}
