// Host-facing surface.

pub mod bot_api;
pub mod init;
