//! SSH server implementation

mod handler;
mod listener;
mod sink;

pub use handler::ConnectionHandler;
pub use listener::{load_or_generate_host_key, ssh_config, SshServer};
pub use sink::RusshChannelSink;
