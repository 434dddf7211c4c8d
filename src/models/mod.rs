//! Value types for the dispatch subsystem: [`Device`] and [`Notification`].

pub mod device;
pub mod notification;

pub use device::{Device, DeviceType, UserRef};
pub use notification::Notification;
