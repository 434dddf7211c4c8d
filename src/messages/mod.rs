//! Protocol-specific message builders: `ApnsMessage`, `C2dmMessage`,
//! `GcmMessage`.

pub mod apns_message;
pub mod c2dm_message;
pub mod gcm_message;

pub use apns_message::ApnsMessage;
pub use c2dm_message::C2dmMessage;
pub use gcm_message::GcmMessage;
