//! Types shared between the fieldtrack server and its clients.

mod messages;
mod models;

pub use messages::*;
pub use models::*;
