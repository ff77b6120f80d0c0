//! Detection-independent state: bans, rules, the decision cache and the
//! alert/traffic journals.

pub mod ban;
pub mod cache;
pub mod journal;
pub(crate) mod persist;
pub mod rules;

pub use ban::BanStore;
pub use cache::DecisionCache;
pub use journal::{AlertJournal, TrafficJournal};
pub use rules::RuleStore;
