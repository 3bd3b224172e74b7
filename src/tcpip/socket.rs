//! Exact-length send/receive over fragmenting byte streams.
//!
//! A TCP `send`/`recv` may move fewer bytes than asked. [`Socket`] loops until the whole
//! buffer went out or the requested length came in, and reports every stream failure as
//! [`ModaqError::Transport`]. [`SocketString`] offers the same read contract over an
//! in-memory buffer so the deserializer runs unchanged on both.

use crate::error::{AppResult, ModaqError};
use crate::tcpip::serializer::{Serializer, Value};
use bytes::Bytes;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Upper bound on the bytes requested from the stream per read call.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Anything that can hand out exactly `length` bytes.
pub trait ByteSource {
    /// Block until `length` bytes are available and return them.
    fn receive_exact(&mut self, length: usize) -> AppResult<Vec<u8>>;

    /// Alias of [`ByteSource::receive_exact`] used by the decoder.
    fn get_first_nbytes(&mut self, length: usize) -> AppResult<Vec<u8>> {
        self.receive_exact(length)
    }
}

/// Anything that can take a whole buffer.
pub trait ByteSink {
    fn send_exact(&mut self, data: &[u8]) -> AppResult<()>;
}

impl ByteSink for Vec<u8> {
    fn send_exact(&mut self, data: &[u8]) -> AppResult<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Blocking stream wrapper guaranteeing full-length transfers.
#[derive(Debug)]
pub struct Socket<S> {
    stream: S,
    chunk_size: usize,
}

impl<S: Read + Write> Socket<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Cap the size of each underlying read; zero is treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Serialize `value` and send it in full.
    pub fn send_value(&mut self, value: &Value) -> AppResult<()> {
        let payload = Serializer::to_bytes(value)?;
        self.send_exact(&payload)
    }

    /// Serialize `value` with its list-element type tag and send it in full.
    pub fn send_tagged_value(&mut self, value: &Value) -> AppResult<()> {
        let mut serializer = Serializer::new();
        serializer.type_and_object_serialization(value)?;
        self.send_exact(&serializer.into_bytes())
    }
}

impl<S: Read + Write> ByteSink for Socket<S> {
    fn send_exact(&mut self, data: &[u8]) -> AppResult<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => {
                    return Err(ModaqError::transport(format!(
                        "stream accepted no bytes after {} of {}",
                        sent,
                        data.len()
                    )))
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ModaqError::transport_io(
                        format!("send failed after {} of {} bytes", sent, data.len()),
                        e,
                    ))
                }
            }
        }
        self.stream
            .flush()
            .map_err(|e| ModaqError::transport_io("flush failed", e))?;
        trace!(bytes = sent, "sent");
        Ok(())
    }
}

impl<S: Read + Write> ByteSource for Socket<S> {
    fn receive_exact(&mut self, length: usize) -> AppResult<Vec<u8>> {
        let mut chunk = vec![0u8; length.min(self.chunk_size)];
        let mut data = Vec::with_capacity(chunk.len());
        while data.len() < length {
            let received = data.len();
            let upper = (length - received).min(chunk.len());
            match self.stream.read(&mut chunk[..upper]) {
                Ok(0) => {
                    return Err(ModaqError::transport(format!(
                        "peer closed the stream after {received} of {length} bytes"
                    )))
                }
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ModaqError::transport_io(
                        format!("receive failed after {received} of {length} bytes"),
                        e,
                    ))
                }
            }
        }
        trace!(bytes = length, "received");
        Ok(data)
    }
}

impl Socket<TcpStream> {
    /// Open a TCP connection.
    pub fn connect(addr: impl ToSocketAddrs) -> AppResult<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| ModaqError::transport_io("could not connect", e))?;
        Ok(Self::new(stream))
    }

    /// Accept the next connection on `listener`.
    pub fn accept(listener: &TcpListener) -> AppResult<(Self, SocketAddr)> {
        let (stream, addr) = listener
            .accept()
            .map_err(|e| ModaqError::transport_io("accept failed", e))?;
        Ok((Self::new(stream), addr))
    }

    pub fn peer_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.stream.peer_addr()?)
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.stream.local_addr()?)
    }

    pub fn close(self) -> AppResult<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Single-pass in-memory source: each read consumes bytes from the front.
#[derive(Debug, Clone, Default)]
pub struct SocketString {
    bytes: Bytes,
}

impl SocketString {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ByteSource for SocketString {
    fn receive_exact(&mut self, length: usize) -> AppResult<Vec<u8>> {
        if length > self.bytes.len() {
            return Err(ModaqError::transport(format!(
                "asked for {} bytes but only {} remain",
                length,
                self.bytes.len()
            )));
        }
        Ok(self.bytes.split_to(length).to_vec())
    }
}

/// Async counterpart of [`Socket`] for streams living on a tokio runtime.
#[derive(Debug)]
pub struct AsyncSocket<S> {
    stream: S,
    chunk_size: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> AsyncSocket<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn send_exact(&mut self, data: &[u8]) -> AppResult<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]).await {
                Ok(0) => {
                    return Err(ModaqError::transport(format!(
                        "stream accepted no bytes after {} of {}",
                        sent,
                        data.len()
                    )))
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ModaqError::transport_io(
                        format!("send failed after {} of {} bytes", sent, data.len()),
                        e,
                    ))
                }
            }
        }
        self.stream
            .flush()
            .await
            .map_err(|e| ModaqError::transport_io("flush failed", e))?;
        trace!(bytes = sent, "sent");
        Ok(())
    }

    pub async fn receive_exact(&mut self, length: usize) -> AppResult<Vec<u8>> {
        let mut chunk = vec![0u8; length.min(self.chunk_size)];
        let mut data = Vec::with_capacity(chunk.len());
        while data.len() < length {
            let received = data.len();
            let upper = (length - received).min(chunk.len());
            match self.stream.read(&mut chunk[..upper]).await {
                Ok(0) => {
                    return Err(ModaqError::transport(format!(
                        "peer closed the stream after {received} of {length} bytes"
                    )))
                }
                Ok(n) => data.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ModaqError::transport_io(
                        format!("receive failed after {received} of {length} bytes"),
                        e,
                    ))
                }
            }
        }
        trace!(bytes = length, "received");
        Ok(data)
    }

    pub async fn send_value(&mut self, value: &Value) -> AppResult<()> {
        let payload = Serializer::to_bytes(value)?;
        self.send_exact(&payload).await
    }

    /// Read one length-prefixed string (`[len:4][utf8]`).
    pub async fn receive_string(&mut self) -> AppResult<String> {
        let length = self.receive_length().await?;
        Ok(String::from_utf8(self.receive_exact(length).await?)?)
    }

    /// Read one 4-byte big-endian length field.
    pub async fn receive_length(&mut self) -> AppResult<usize> {
        let raw = self.receive_exact(4).await?;
        Ok(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Stream that moves at most `step` bytes per call.
    struct Trickle {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
        step: usize,
        reads: usize,
        largest_read: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reads += 1;
            self.largest_read = self.largest_read.max(buf.len());
            let n = buf.len().min(self.step);
            std::io::Read::read(&mut self.input, &mut buf[..n])
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.step);
            self.output.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn trickle(input: Vec<u8>, step: usize) -> Trickle {
        Trickle {
            input: Cursor::new(input),
            output: Vec::new(),
            step,
            reads: 0,
            largest_read: 0,
        }
    }

    #[test]
    fn test_receive_exact_reassembles_fragments() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut socket = Socket::new(trickle(payload.clone(), 7));
        assert_eq!(socket.receive_exact(100).unwrap(), payload[..100].to_vec());
        assert_eq!(socket.receive_exact(156).unwrap(), payload[100..].to_vec());
        assert!(socket.receive_exact(0).unwrap().is_empty());
    }

    #[test]
    fn test_receive_reads_in_bounded_chunks() {
        let mut socket = Socket::new(trickle(vec![1u8; 10_000], usize::MAX));
        socket.receive_exact(10_000).unwrap();
        assert_eq!(socket.get_ref().reads, 3);
    }

    #[test]
    fn test_receive_fails_on_early_close() {
        let mut socket = Socket::new(trickle(vec![1, 2, 3], 2));
        let err = socket.receive_exact(4).unwrap_err();
        assert!(matches!(err, ModaqError::Transport { .. }));
        assert!(err.to_string().contains("3 of 4"));
    }

    #[test]
    fn test_declared_length_is_not_preallocated() {
        let mut socket = Socket::new(trickle(vec![9u8; 10], usize::MAX)).with_chunk_size(8);
        let err = socket.receive_exact(u32::MAX as usize).unwrap_err();
        assert!(matches!(err, ModaqError::Transport { .. }));
        assert!(err.to_string().contains(&format!("10 of {}", u32::MAX)));
        assert_eq!(socket.get_ref().largest_read, 8);
    }

    #[test]
    fn test_send_exact_loops_on_partial_writes() {
        let mut socket = Socket::new(trickle(Vec::new(), 3));
        socket.send_exact(b"hello world").unwrap();
        assert_eq!(socket.into_inner().output, b"hello world".to_vec());
    }

    #[test]
    fn test_socket_string_consumes_front() {
        let mut source = SocketString::new(vec![1u8, 2, 3, 4, 5]);
        assert_eq!(source.get_first_nbytes(2).unwrap(), vec![1, 2]);
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.receive_exact(3).unwrap(), vec![3, 4, 5]);
        assert!(source.is_empty());
        assert!(source.receive_exact(1).is_err());
    }

    #[tokio::test]
    async fn test_async_socket_duplex() {
        let (client, server) = tokio::io::duplex(16);
        let mut client = AsyncSocket::new(client);
        let mut server = AsyncSocket::new(server).with_chunk_size(5);
        let payload: Vec<u8> = (0..200u8).collect();
        let expected = payload.clone();
        let writer = tokio::spawn(async move {
            client.send_exact(&payload).await.unwrap();
            client
        });
        assert_eq!(server.receive_exact(200).await.unwrap(), expected);
        drop(writer.await.unwrap());
        assert!(server.receive_exact(1).await.is_err());
    }
}
