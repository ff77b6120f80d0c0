//! Route configuration for the API
//!
//! The verdict endpoint and the banned page are open; ban, cache and alert
//! administration require the API key (enforced per handler).

use actix_web::web;

use crate::handlers;

/// Configure all application routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/check", web::post().to(handlers::check))
        .route("/config", web::get().to(handlers::config_echo))
        .route("/reload", web::get().to(handlers::reload))
        .route("/ban/list", web::get().to(handlers::ban_list))
        .route("/ban/add", web::get().to(handlers::ban_add))
        .route("/ban/delete", web::get().to(handlers::ban_delete))
        .route("/banned_page", web::get().to(handlers::banned_page))
        .route("/banned_page", web::post().to(handlers::banned_page))
        .route("/cache/stats", web::get().to(handlers::cache_stats))
        .route("/cache/clear", web::post().to(handlers::cache_clear))
        .route("/alerts", web::get().to(handlers::alerts_list))
        .route("/alerts/clear", web::post().to(handlers::alerts_clear));
}
