mod api;
mod chat;
mod user;

pub use api::*;
pub use chat::*;
pub use user::*;
