//! Data models for marketplace chat entities

mod message;
mod room;
mod user;
mod wire;

pub use message::*;
pub use room::*;
pub use user::*;
pub(crate) use wire::string_or_number;
