pub mod handler;
pub mod protocol;
pub mod server;

pub use server::{spawn_listeners, StopFlag, LISTENER_COUNT, PIPE_NAME};
