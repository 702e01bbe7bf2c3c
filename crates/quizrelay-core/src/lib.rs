pub mod error;
pub mod player;
pub mod protocol;
pub mod room;
pub mod sanitize;
pub mod session;
pub mod time;
