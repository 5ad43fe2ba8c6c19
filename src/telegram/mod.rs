pub mod bot_api;
pub mod session;
