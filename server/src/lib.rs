pub mod events;
pub mod playback;
pub mod replay_server;
pub mod viewer;
pub mod ws_server;
