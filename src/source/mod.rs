// External collaborators the engine talks to.

pub mod telegram;
pub mod traits;
pub mod ytdlp;
pub mod ytmusic;
