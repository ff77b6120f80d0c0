//! Decision-cache administration.

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::middleware::ApiKey;
use crate::pipeline::Waf;

/// GET /cache/stats
pub async fn cache_stats(_auth: ApiKey, waf: web::Data<Waf>) -> HttpResponse {
    let stats = waf.cache.stats();
    HttpResponse::Ok().json(json!({
        "summary": {
            "total_hits": stats.hits,
            "total_misses": stats.misses,
            "total_cached_items": stats.size,
            "hit_rate_percent": stats.hit_rate_percent,
        },
        "details": stats,
    }))
}

/// POST /cache/clear
pub async fn cache_clear(_auth: ApiKey, waf: web::Data<Waf>) -> HttpResponse {
    let evicted = waf.cache.clear();
    HttpResponse::Ok().json(json!({"status": "cleared", "entries": evicted}))
}
