pub mod endpoint;

pub use endpoint::{Endpoint, LineEvent, LineReader, LineStream, LineWriter, Listener, TcpMessage};
