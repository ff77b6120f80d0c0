//! Ban management endpoints.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::core::ban::iso_z;
use crate::errors::AppError;
use crate::middleware::ApiKey;
use crate::pipeline::Waf;

#[derive(Debug, Deserialize)]
pub struct BanAddQuery {
    pub ip: Option<String>,
    pub minutes: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BanDeleteQuery {
    pub ip: Option<String>,
}

fn required_ip(ip: &Option<String>) -> Result<&str, AppError> {
    match ip.as_deref() {
        Some(ip) if !ip.is_empty() => Ok(ip),
        _ => Err(AppError::bad_request("ip param required")),
    }
}

/// GET /ban/list
pub async fn ban_list(_auth: ApiKey, waf: web::Data<Waf>) -> HttpResponse {
    HttpResponse::Ok().json(waf.bans.list_active())
}

/// GET /ban/add?ip=&minutes=&reason=
pub async fn ban_add(
    _auth: ApiKey,
    waf: web::Data<Waf>,
    query: web::Query<BanAddQuery>,
) -> Result<HttpResponse, AppError> {
    let ip = required_ip(&query.ip)?;
    let minutes = match query.minutes.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<f64>()
                .map_err(|_| AppError::bad_request("minutes param invalid"))?,
        ),
    };
    let reason = query.reason.clone().unwrap_or_else(|| "manual ban".to_string());

    if !waf.bans.add_ban(ip, minutes, &reason) {
        return Ok(HttpResponse::Ok().json(json!({
            "status": "ignored",
            "reason": "IP in whitelist",
        })));
    }

    let until = waf
        .bans
        .entry(ip)
        .map(|entry| iso_z(entry.until))
        .unwrap_or_default();
    Ok(HttpResponse::Ok().json(json!({
        "status": "banned",
        "ip": ip,
        "until": until,
    })))
}

/// GET /ban/delete?ip=
pub async fn ban_delete(
    _auth: ApiKey,
    waf: web::Data<Waf>,
    query: web::Query<BanDeleteQuery>,
) -> Result<HttpResponse, AppError> {
    let ip = required_ip(&query.ip)?;
    if waf.bans.delete_ban(ip) {
        Ok(HttpResponse::Ok().json(json!({"status": "deleted", "ip": ip})))
    } else {
        Ok(HttpResponse::NotFound().json(json!({"status": "not found", "ip": ip})))
    }
}
