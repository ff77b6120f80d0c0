//! Request handlers
//!
//! HTTP handlers for the verdict endpoint and the admin surface.

pub mod alerts;
pub mod bans;
pub mod cache;
pub mod check;
pub mod system;

// Re-export handler functions for convenience
pub use alerts::{alerts_clear, alerts_list};
pub use bans::{ban_add, ban_delete, ban_list};
pub use cache::{cache_clear, cache_stats};
pub use check::check;
pub use system::{banned_page, config_echo, reload};
