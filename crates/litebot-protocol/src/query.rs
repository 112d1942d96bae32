use crate::codec::{Buffer, CodecError};
use crate::connection::DatagramConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const MAGIC_PREFIX: [u8; 2] = [0xFE, 0xFD];
const PACKET_TYPE_CHALLENGE: u8 = 9;
const PACKET_TYPE_QUERY: u8 = 0;
const SESSION_ID: u32 = 0;

/// `splitnum\0\x80\0` ahead of the key/value section.
const STAT_PREAMBLE_LEN: usize = 11;
/// `player_\0\0` ahead of the player names.
const PLAYER_SECTION_LEN: usize = 9;

/// Default wait for a query reply.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query timed out")]
    Timeout,
    #[error("Malformed query response: {0}")]
    Malformed(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Online players as reported by a full stat query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerList {
    pub online: usize,
    pub max: usize,
    pub names: Vec<String>,
}

/// Result of a status query. Offline responses carry no MOTD and no players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryResponse {
    online: bool,
    motd: Option<String>,
    players: PlayerList,
}

impl QueryResponse {
    pub fn offline() -> Self {
        Self {
            online: false,
            motd: None,
            players: PlayerList::default(),
        }
    }

    pub fn online(motd: impl Into<String>, players: PlayerList) -> Self {
        Self {
            online: true,
            motd: Some(motd.into()),
            players,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn motd(&self) -> Option<&str> {
        self.motd.as_deref()
    }

    pub fn players(&self) -> &PlayerList {
        &self.players
    }
}

/// GameSpy4 query client for one server.
///
/// The client only reports errors; turning a failure into an offline
/// [`QueryResponse`] is the caller's job.
pub struct QueryClient {
    conn: DatagramConnection,
    timeout: Duration,
    challenge: i32,
}

impl QueryClient {
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, QueryError> {
        let conn = DatagramConnection::connect(host, port).await?;
        Ok(Self::new(conn, timeout))
    }

    pub fn new(conn: DatagramConnection, timeout: Duration) -> Self {
        Self {
            conn,
            timeout,
            challenge: 0,
        }
    }

    /// Fetch and store the challenge token required by stat requests.
    pub async fn handshake(&mut self) -> Result<(), QueryError> {
        self.write_header(PACKET_TYPE_CHALLENGE);
        self.conn.flush().await?;
        let mut response = self.read_packet(PACKET_TYPE_CHALLENGE).await?;
        self.challenge = parse_challenge(&mut response)?;
        debug!("Query challenge token {}", self.challenge);
        Ok(())
    }

    /// Request the full stat and parse it.
    pub async fn read_query(&mut self) -> Result<QueryResponse, QueryError> {
        self.write_header(PACKET_TYPE_QUERY);
        let buf = self.conn.buffer_mut();
        buf.write_int(self.challenge);
        buf.write_uint(0);
        self.conn.flush().await?;
        let mut response = self.read_packet(PACKET_TYPE_QUERY).await?;
        parse_full_stat(&mut response)
    }

    fn write_header(&mut self, kind: u8) {
        let buf = self.conn.buffer_mut();
        buf.write(&MAGIC_PREFIX);
        buf.write_u8(kind);
        buf.write_uint(SESSION_ID);
    }

    async fn read_packet(&mut self, kind: u8) -> Result<Buffer, QueryError> {
        let mut response = tokio::time::timeout(self.timeout, self.conn.read())
            .await
            .map_err(|_| QueryError::Timeout)??;
        parse_header(&mut response, kind)?;
        Ok(response)
    }
}

/// Consume the response type byte and session id, checking both.
pub fn parse_header(buf: &mut Buffer, kind: u8) -> Result<(), QueryError> {
    let found = buf.read_u8()?;
    if found != kind {
        return Err(QueryError::Malformed(format!(
            "expected packet type {}, got {}",
            kind, found
        )));
    }
    let session = buf.read_uint()?;
    if session != SESSION_ID {
        return Err(QueryError::Malformed(format!("unexpected session id {}", session)));
    }
    Ok(())
}

/// Parse the NUL-terminated decimal challenge token.
pub fn parse_challenge(buf: &mut Buffer) -> Result<i32, QueryError> {
    let token = buf.read_ascii()?;
    // Tokens are 32-bit values but some servers print them unsigned.
    let token = token.trim();
    token
        .parse::<u32>()
        .map(|value| value as i32)
        .or_else(|_| token.parse::<i32>())
        .map_err(|_| QueryError::Malformed(format!("invalid challenge token '{}'", token)))
}

/// Parse a full stat payload (after the response header).
pub fn parse_full_stat(buf: &mut Buffer) -> Result<QueryResponse, QueryError> {
    buf.skip(STAT_PREAMBLE_LEN)?;

    let mut data = HashMap::new();
    loop {
        let key = buf.read_ascii()?;
        if key.is_empty() {
            buf.skip(1)?;
            break;
        }
        let value = buf.read_ascii()?;
        data.insert(key, value);
    }

    buf.skip(PLAYER_SECTION_LEN)?;
    let mut names = Vec::new();
    while buf.remaining() > 0 {
        let name = buf.read_ascii()?;
        if name.is_empty() {
            break;
        }
        names.push(name);
    }

    let max: usize = data
        .get("maxplayers")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let online: usize = data
        .get("numplayers")
        .and_then(|v| v.parse().ok())
        .unwrap_or(names.len());
    let motd = data.remove("hostname").unwrap_or_default();

    Ok(QueryResponse::online(motd, PlayerList { online, max, names }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    const RESPONSE_HEADER_LEN: usize = 5;

    fn full_stat_payload(hostname: &str, max: u32, players: &[&str]) -> Vec<u8> {
        let mut out = vec![0u8, 0, 0, 0, 0];
        out.extend_from_slice(b"splitnum\0\x80\0");
        for (key, value) in [
            ("hostname", hostname.to_string()),
            ("gametype", "SMP".to_string()),
            ("numplayers", players.len().to_string()),
            ("maxplayers", max.to_string()),
        ] {
            out.extend_from_slice(key.as_bytes());
            out.push(0);
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
        out.extend_from_slice(b"\0\x01player_\0\0");
        for name in players {
            out.extend_from_slice(name.as_bytes());
            out.push(0);
        }
        out.push(0);
        out
    }

    #[test]
    fn test_parse_challenge() {
        let mut buf = Buffer::from_received(b"9513307\0");
        assert_eq!(parse_challenge(&mut buf).unwrap(), 9513307);
        let mut buf = Buffer::from_received(b"-42\0");
        assert_eq!(parse_challenge(&mut buf).unwrap(), -42);
        let mut buf = Buffer::from_received(b"abc\0");
        assert!(matches!(parse_challenge(&mut buf), Err(QueryError::Malformed(_))));
    }

    #[test]
    fn test_parse_challenge_range() {
        let mut buf = Buffer::from_received(b"4294967295\0");
        assert_eq!(parse_challenge(&mut buf).unwrap(), -1);
        let mut buf = Buffer::from_received(b"2147483648\0");
        assert_eq!(parse_challenge(&mut buf).unwrap(), i32::MIN);
        for token in [&b"4294967296\0"[..], b"-2147483649\0", b"99999999999\0"] {
            let mut buf = Buffer::from_received(token);
            assert!(matches!(parse_challenge(&mut buf), Err(QueryError::Malformed(_))));
        }
    }

    #[test]
    fn test_parse_header() {
        let mut buf = Buffer::from_received(b"\x09\0\0\0\x0012345\0");
        parse_header(&mut buf, PACKET_TYPE_CHALLENGE).unwrap();
        assert_eq!(parse_challenge(&mut buf).unwrap(), 12345);

        let mut buf = Buffer::from_received(b"\x09\0\0\0\x07");
        assert!(matches!(
            parse_header(&mut buf, PACKET_TYPE_CHALLENGE),
            Err(QueryError::Malformed(_))
        ));
        let mut buf = Buffer::from_received(b"\x00\0\0\0\0");
        assert!(matches!(
            parse_header(&mut buf, PACKET_TYPE_CHALLENGE),
            Err(QueryError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_full_stat() {
        let payload = full_stat_payload("A Minecraft Server", 20, &["Alex", "Steve"]);
        let mut buf = Buffer::from_received(&payload[RESPONSE_HEADER_LEN..]);
        let response = parse_full_stat(&mut buf).unwrap();
        assert!(response.is_online());
        assert_eq!(response.motd(), Some("A Minecraft Server"));
        assert_eq!(response.players().names, vec!["Alex", "Steve"]);
        assert_eq!(response.players().online, 2);
        assert_eq!(response.players().max, 20);
    }

    #[test]
    fn test_truncated_stat_is_error() {
        let payload = full_stat_payload("Srv", 10, &[]);
        let mut buf = Buffer::from_received(&payload[RESPONSE_HEADER_LEN..30]);
        assert!(parse_full_stat(&mut buf).is_err());
    }

    #[test]
    fn test_offline_is_empty() {
        let offline = QueryResponse::offline();
        assert!(!offline.is_online());
        assert_eq!(offline.motd(), None);
        assert_eq!(offline.players(), &PlayerList::default());
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let mock = tokio::spawn(async move {
            let mut buf = [0u8; 1024];

            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], &[0xFE, 0xFD, 9, 0, 0, 0, 0]);
            server.send_to(b"\x09\0\0\0\x0012345\0", peer).await.unwrap();

            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut expected = vec![0xFE, 0xFD, 0, 0, 0, 0, 0];
            expected.extend_from_slice(&12345i32.to_be_bytes());
            expected.extend_from_slice(&[0, 0, 0, 0]);
            assert_eq!(&buf[..n], expected.as_slice());
            let reply = full_stat_payload("Test Server", 20, &["Alex", "Steve"]);
            server.send_to(&reply, peer).await.unwrap();
        });

        let mut client = QueryClient::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        client.handshake().await.unwrap();
        let response = client.read_query().await.unwrap();
        mock.await.unwrap();

        assert!(response.is_online());
        assert_eq!(response.motd(), Some("Test Server"));
        assert_eq!(response.players().names.len(), 2);
        assert_eq!(response.players().max, 20);
    }

    #[tokio::test]
    async fn test_handshake_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let mut client = QueryClient::connect("127.0.0.1", port, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(matches!(client.handshake().await, Err(QueryError::Timeout)));
        drop(silent);
    }
}
