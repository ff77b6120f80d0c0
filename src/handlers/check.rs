//! The verdict endpoint.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::models::{Descriptor, Phase};
use crate::pipeline::Waf;

/// Wire shape of a descriptor as reported by the interceptor. `header`,
/// `path` and `body_raw_b64` are transport-encoded; a present `status_code`
/// switches evaluation to the response phase.
#[derive(Debug, Deserialize)]
pub struct CheckPayload {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub body_raw_b64: String,
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl From<CheckPayload> for Descriptor {
    fn from(payload: CheckPayload) -> Self {
        let phase = match payload.status_code {
            Some(status_code) => Phase::Response { status_code },
            None => Phase::Request,
        };
        Descriptor {
            ip: payload.ip,
            method: payload.method,
            header: payload.header,
            user_agent: payload.user_agent,
            path: payload.path,
            body: payload.body_raw_b64,
            phase,
        }
    }
}

/// POST /check
pub async fn check(waf: web::Data<Waf>, payload: web::Json<CheckPayload>) -> HttpResponse {
    let decision = waf.check(payload.into_inner().into()).await;
    HttpResponse::Ok().json(decision)
}
