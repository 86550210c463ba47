//! Persistent state: the delivery ledger and per-feed polling status.

pub mod delivery;
pub mod status;

pub use delivery::{DeliveryLedger, SentRecord};
pub use status::{FeedStatus, FeedStatusRepository};
