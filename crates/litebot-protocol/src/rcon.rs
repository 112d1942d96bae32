use crate::codec::{Buffer, CodecError};
use crate::connection::StreamConnection;
use crate::tls::{self, TlsMode};
use bytes::BytesMut;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// Packet type for the login request.
pub const PACKET_LOGIN: i32 = 3;
/// Packet type for a command request.
pub const PACKET_COMMAND: i32 = 2;

/// Default pause between sending a command and reading its response.
pub const DEFAULT_COMMAND_DELAY: Duration = Duration::from_millis(3);

/// Request id + type + two padding bytes.
const MIN_BODY_LEN: usize = 10;
/// Upper bound on a single response packet body.
const MAX_BODY_LEN: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum RconError {
    #[error("Server offline or unreachable: {0}")]
    Connect(#[source] std::io::Error),
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("RCON is not connected")]
    NotConnected,
    #[error("Login failed")]
    LoginFailed,
    #[error("Incorrect padding")]
    Padding,
    #[error("Malformed packet: {0}")]
    Malformed(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// One Source RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    pub request_id: i32,
    pub kind: i32,
    pub payload: String,
}

impl RconPacket {
    /// A request packet. Request ids are always 0; the server answers `-1`
    /// only when authentication failed.
    pub fn request(kind: i32, payload: impl Into<String>) -> Self {
        Self {
            request_id: 0,
            kind,
            payload: payload.into(),
        }
    }

    /// Encode as `length | request_id | type | payload | 00 00`, all little endian.
    pub fn encode(&self) -> BytesMut {
        let mut body = Buffer::new();
        body.write_int_le(self.request_id);
        body.write_int_le(self.kind);
        body.write(self.payload.as_bytes());
        body.write(&[0, 0]);
        let body = body.flush();

        let mut frame = Buffer::new();
        frame.write_int_le(body.len() as i32);
        frame.write(&body);
        frame.flush()
    }

    /// Decode a packet body (everything after the length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, RconError> {
        if body.len() < MIN_BODY_LEN {
            return Err(RconError::Malformed(format!(
                "packet body of {} bytes is shorter than {}",
                body.len(),
                MIN_BODY_LEN
            )));
        }
        let (data, padding) = body.split_at(body.len() - 2);
        if padding != [0, 0] {
            return Err(RconError::Padding);
        }
        let mut header = Buffer::from_received(&data[..8]);
        let request_id = header.read_int_le()?;
        let kind = header.read_int_le()?;
        if request_id == -1 {
            return Err(RconError::LoginFailed);
        }
        Ok(Self {
            request_id,
            kind,
            payload: String::from_utf8_lossy(&data[8..]).into_owned(),
        })
    }
}

/// An RCON conversation over any byte stream.
///
/// Requests are strictly lock-step: a request is written, then every response
/// packet is read until the stream has nothing more buffered. There is no
/// end-of-response marker in the protocol, so "no more data right now" is
/// what ends a response.
pub struct RconSession<S> {
    conn: StreamConnection<S>,
    command_delay: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> RconSession<S> {
    pub fn new(stream: S, command_delay: Duration) -> Self {
        Self {
            conn: StreamConnection::new(stream),
            command_delay,
        }
    }

    /// Send the login packet and read the server's answer.
    pub async fn login(&mut self, password: &str) -> Result<(), RconError> {
        self.exchange(PACKET_LOGIN, password).await.map(|_| ())
    }

    /// Run a command and return the concatenated response text.
    pub async fn command(&mut self, command: &str) -> Result<String, RconError> {
        self.exchange(PACKET_COMMAND, command).await
    }

    pub async fn close(mut self) {
        let _ = self.conn.shutdown().await;
    }

    async fn exchange(&mut self, kind: i32, payload: &str) -> Result<String, RconError> {
        self.conn.write(&RconPacket::request(kind, payload).encode());
        self.conn.flush().await?;

        // Some servers split multi-packet responses with a gap between them.
        if kind == PACKET_COMMAND && !self.command_delay.is_zero() {
            tokio::time::sleep(self.command_delay).await;
        }

        let mut response = String::new();
        loop {
            let length = self.conn.read_int_le().await?;
            let length = usize::try_from(length)
                .ok()
                .filter(|len| (MIN_BODY_LEN..=MAX_BODY_LEN).contains(len))
                .ok_or_else(|| RconError::Malformed(format!("invalid length {}", length)))?;
            let body = self.conn.read(length).await?;
            let packet = RconPacket::decode(&body)?;
            trace!(
                "RCON packet id={} type={} len={}",
                packet.request_id,
                packet.kind,
                packet.payload.len()
            );
            response.push_str(&packet.payload);

            if !self.conn.has_pending().await? {
                return Ok(response);
            }
        }
    }
}

/// Any stream an RCON session can run over.
pub trait RconStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> RconStream for T {}

/// RCON client for a single server, holding at most one live session.
///
/// Errors are never retried: a failed command drops the session and the
/// caller decides whether to reconnect.
pub struct RconClient {
    host: String,
    port: u16,
    password: String,
    tls: TlsMode,
    command_delay: Duration,
    session: Option<RconSession<Box<dyn RconStream>>>,
}

impl RconClient {
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            password: password.into(),
            tls: TlsMode::Off,
            command_delay: DEFAULT_COMMAND_DELAY,
            session: None,
        }
    }

    pub fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Open the socket (upgrading to TLS if configured) and log in.
    pub async fn connect(&mut self) -> Result<(), RconError> {
        self.disconnect().await;

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(RconError::Connect)?;
        let stream: Box<dyn RconStream> = match self.tls {
            TlsMode::Off => Box::new(tcp),
            mode => Box::new(tls::connect(tcp, &self.host, mode).await?),
        };

        let mut session = RconSession::new(stream, self.command_delay);
        session.login(&self.password).await?;
        debug!("RCON logged in to {}:{}", self.host, self.port);
        self.session = Some(session);
        Ok(())
    }

    /// Close the session if one is open.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            debug!("RCON disconnected from {}:{}", self.host, self.port);
        }
    }

    pub async fn command(&mut self, command: &str) -> Result<String, RconError> {
        let session = self.session.as_mut().ok_or(RconError::NotConnected)?;
        let result = session.command(command).await;
        if result.is_err() {
            self.disconnect().await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn response(request_id: i32, payload: &str) -> Vec<u8> {
        RconPacket {
            request_id,
            kind: 0,
            payload: payload.into(),
        }
        .encode()
        .to_vec()
    }

    async fn read_request(server: &mut DuplexStream) -> RconPacket {
        let length = server.read_i32_le().await.unwrap();
        let mut body = vec![0u8; length as usize];
        server.read_exact(&mut body).await.unwrap();
        RconPacket::decode(&body).unwrap()
    }

    #[test]
    fn test_packet_encode_decode() {
        let packet = RconPacket::request(PACKET_COMMAND, "say hi");
        let frame = packet.encode();
        assert_eq!(&frame[..4], &(16i32).to_le_bytes());
        assert_eq!(&frame[4..12], &[0, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(RconPacket::decode(&frame[4..]).unwrap(), packet);
    }

    #[test]
    fn test_bad_padding_rejected() {
        for payload in ["", "x", "a longer payload"] {
            let mut frame = RconPacket::request(PACKET_COMMAND, payload).encode().to_vec();
            let last = frame.len() - 1;
            frame[last] = b'!';
            assert!(matches!(RconPacket::decode(&frame[4..]), Err(RconError::Padding)));
        }
    }

    #[test]
    fn test_short_packet_rejected() {
        assert!(matches!(
            RconPacket::decode(&[0, 0, 0, 0, 0, 0]),
            Err(RconError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_login_then_command() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mock = tokio::spawn(async move {
            let login = read_request(&mut server).await;
            assert_eq!(login.kind, PACKET_LOGIN);
            assert_eq!(login.payload, "hunter2");
            server.write_all(&response(0, "")).await.unwrap();

            let command = read_request(&mut server).await;
            assert_eq!(command.kind, PACKET_COMMAND);
            assert_eq!(command.payload, "say hi");
            server.write_all(&response(0, "[Rcon] hi")).await.unwrap();
            server
        });

        let mut session = RconSession::new(client, DEFAULT_COMMAND_DELAY);
        session.login("hunter2").await.unwrap();
        assert_eq!(session.command("say hi").await.unwrap(), "[Rcon] hi");
        let _server = mock.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_failure_detected() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mock = tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(&response(-1, "")).await.unwrap();
            server
        });

        let mut session = RconSession::new(client, Duration::ZERO);
        assert!(matches!(session.login("wrong").await, Err(RconError::LoginFailed)));
        let _server = mock.await.unwrap();
    }

    #[tokio::test]
    async fn test_command_auth_failure() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mock = tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(&response(-1, "")).await.unwrap();
            server
        });

        let mut session = RconSession::new(client, Duration::ZERO);
        assert!(matches!(session.command("list").await, Err(RconError::LoginFailed)));
        let _server = mock.await.unwrap();
    }

    #[tokio::test]
    async fn test_multi_packet_response_concatenated() {
        let (client, mut server) = tokio::io::duplex(8192);
        let mock = tokio::spawn(async move {
            read_request(&mut server).await;
            let mut both = response(0, "There are 2 of a max of 20 players online: ");
            both.extend(response(0, "Alex, Steve"));
            server.write_all(&both).await.unwrap();
            server
        });

        let mut session = RconSession::new(client, DEFAULT_COMMAND_DELAY);
        assert_eq!(
            session.command("list").await.unwrap(),
            "There are 2 of a max of 20 players online: Alex, Steve"
        );
        let _server = mock.await.unwrap();
    }

    #[tokio::test]
    async fn test_delay_waits_for_split_response() {
        let (client, mut server) = tokio::io::duplex(8192);
        let mock = tokio::spawn(async move {
            read_request(&mut server).await;
            server.write_all(&response(0, "first half, ")).await.unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
            server.write_all(&response(0, "second half")).await.unwrap();
            server
        });

        let mut session = RconSession::new(client, Duration::from_millis(30));
        assert_eq!(
            session.command("data get storage x").await.unwrap(),
            "first half, second half"
        );
        let _server = mock.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_requires_connection() {
        let mut client = RconClient::new("127.0.0.1", 25575, "pw");
        assert!(!client.is_connected());
        assert!(matches!(client.command("list").await, Err(RconError::NotConnected)));
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_client_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut client = RconClient::new("127.0.0.1", port, "pw");
        assert!(matches!(client.connect().await, Err(RconError::Connect(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_client_against_tcp_mock() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mock = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for reply in ["", "Hello from the server"] {
                let length = socket.read_i32_le().await.unwrap();
                let mut body = vec![0u8; length as usize];
                socket.read_exact(&mut body).await.unwrap();
                socket.write_all(&response(0, reply)).await.unwrap();
            }
            socket
        });

        let mut client = RconClient::new("127.0.0.1", port, "pw").with_command_delay(Duration::ZERO);
        client.connect().await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.command("say hi").await.unwrap(), "Hello from the server");
        let _socket = mock.await.unwrap();
        client.disconnect().await;
        assert!(!client.is_connected());
    }
}
