pub mod codec;
pub mod connection;
pub mod query;
pub mod rcon;
pub mod tls;

pub use codec::*;
pub use connection::{DatagramConnection, StreamConnection};
pub use query::{PlayerList, QueryClient, QueryError, QueryResponse};
pub use rcon::{RconClient, RconError, RconPacket, RconSession};
pub use tls::TlsMode;
