use crate::codec::{Buffer, CodecError, CodecResult};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{lookup_host, UdpSocket};
use tracing::trace;

/// Largest datagram a single UDP read may return.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// A [`Buffer`] backed by a byte stream (TCP, TLS, or an in-memory pipe).
///
/// Reads loop over the underlying stream until the requested number of bytes
/// is buffered, since partial TCP reads are normal.
pub struct StreamConnection<S> {
    stream: S,
    buf: Buffer,
}

impl<S: AsyncRead + AsyncWrite + Unpin> StreamConnection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Buffer::new(),
        }
    }

    /// Read exactly `n` bytes, waiting on the stream as needed.
    pub async fn read(&mut self, n: usize) -> CodecResult<BytesMut> {
        while self.buf.remaining() < n {
            self.fill().await?;
        }
        self.buf.read(n)
    }

    pub async fn read_int_le(&mut self) -> CodecResult<i32> {
        let bytes = self.read(4).await?;
        Buffer::from_received(&bytes).read_int_le()
    }

    /// Append raw bytes to the pending output.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.write(data);
    }

    /// Send everything written since the last flush.
    pub async fn flush(&mut self) -> CodecResult<()> {
        let data = self.buf.flush();
        trace!("Flushing {} bytes", data.len());
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Whether more data is available right now, without waiting.
    ///
    /// Polls the stream exactly once; anything it yields is kept for the next
    /// `read`. A closed stream reports no data.
    pub async fn has_pending(&mut self) -> CodecResult<bool> {
        if self.buf.remaining() > 0 {
            return Ok(true);
        }
        let mut tmp = [0u8; 4096];
        match tokio::time::timeout(Duration::ZERO, self.stream.read(&mut tmp)).await {
            Ok(Ok(0)) | Err(_) => Ok(false),
            Ok(Ok(n)) => {
                self.buf.receive(&tmp[..n]);
                Ok(true)
            }
            Ok(Err(e)) => Err(e.into()),
        }
    }

    pub async fn shutdown(&mut self) -> CodecResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn fill(&mut self) -> CodecResult<()> {
        let mut tmp = [0u8; 4096];
        let n = self.stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(CodecError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Connection closed",
            )));
        }
        self.buf.receive(&tmp[..n]);
        Ok(())
    }
}

/// A [`Buffer`] backed by a UDP socket connected to a single peer.
///
/// Each flush is sent as one datagram and each read returns one whole
/// datagram, regardless of how many bytes the caller expects.
pub struct DatagramConnection {
    socket: UdpSocket,
    buf: Buffer,
}

impl DatagramConnection {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let peer = lookup_host((host, port)).await?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("Cannot resolve {}", host))
        })?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0u8; 4], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self::new(socket))
    }

    /// Wrap an already connected socket.
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket,
            buf: Buffer::new(),
        }
    }

    /// The pending outgoing datagram.
    pub fn buffer_mut(&mut self) -> &mut Buffer {
        &mut self.buf
    }

    /// Send everything written since the last flush as a single datagram.
    pub async fn flush(&mut self) -> CodecResult<()> {
        let data = self.buf.flush();
        self.socket.send(&data).await?;
        Ok(())
    }

    /// Receive one datagram. Empty datagrams are skipped.
    pub async fn read(&mut self) -> CodecResult<Buffer> {
        let mut tmp = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let n = self.socket.recv(&mut tmp).await?;
            if n > 0 {
                trace!("Received datagram of {} bytes", n);
                return Ok(Buffer::from_received(&tmp[..n]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_read_waits_for_partial_writes() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = StreamConnection::new(client);

        let writer = tokio::spawn(async move {
            server.write_all(&[1, 2]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
            server.write_all(&[3, 4, 5]).await.unwrap();
            server
        });

        let bytes = conn.read(4).await.unwrap();
        assert_eq!(bytes.to_vec(), vec![1, 2, 3, 4]);
        assert!(conn.has_pending().await.unwrap());
        assert_eq!(conn.read(1).await.unwrap().to_vec(), vec![5]);
        let _server = writer.await.unwrap();
        assert!(!conn.has_pending().await.unwrap());
    }

    #[tokio::test]
    async fn test_stream_read_reports_closed() {
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let mut conn = StreamConnection::new(client);
        assert!(matches!(conn.read(1).await, Err(CodecError::Io(_))));
    }

    #[tokio::test]
    async fn test_datagram_roundtrip() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();
        let mut conn = DatagramConnection::connect("127.0.0.1", port).await.unwrap();

        conn.buffer_mut().write(&[0xFE, 0xFD]);
        conn.buffer_mut().write_int(7);
        conn.flush().await.unwrap();

        let mut tmp = [0u8; 64];
        let (n, from) = peer.recv_from(&mut tmp).await.unwrap();
        assert_eq!(&tmp[..n], &[0xFE, 0xFD, 0, 0, 0, 7]);

        peer.send_to(b"pong\0", from).await.unwrap();
        let mut reply = conn.read().await.unwrap();
        assert_eq!(reply.read_ascii().unwrap(), "pong");
    }
}
