//! TCP transport.
//!
//! Resolves the host, tries every resolved address in order and returns the
//! split halves of the first stream that connects.
//!
//! # Example
//!
//! ```ignore
//! use iproto_client::transport::connect_tcp;
//!
//! let (reader, writer) = connect_tcp("127.0.0.1", 3301, 32 * 1024).await?;
//! ```

use std::net::SocketAddr;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpSocket, TcpStream};

use crate::error::{IprotoError, Result};

/// Open a TCP stream with a bounded receive buffer.
pub async fn connect_tcp(
    host: &str,
    port: u16,
    recv_buffer_size: usize,
) -> Result<(OwnedReadHalf, OwnedWriteHalf)> {
    let mut last_error = None;

    for addr in lookup_host((host, port)).await? {
        match connect_addr(addr, recv_buffer_size).await {
            Ok(stream) => {
                tracing::debug!("Connected to {} ({})", addr, host);
                return Ok(stream.into_split());
            }
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.map(IprotoError::from).unwrap_or_else(|| {
        IprotoError::network(
            std::io::ErrorKind::AddrNotAvailable,
            &format!("No addresses resolved for {}:{}", host, port),
        )
    }))
}

async fn connect_addr(addr: SocketAddr, recv_buffer_size: usize) -> std::io::Result<TcpStream> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };

    socket.set_recv_buffer_size(recv_buffer_size.min(u32::MAX as usize) as u32)?;

    let stream = socket.connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_exchange_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"hello").await.unwrap();
        });

        let (mut reader, _writer) = connect_tcp("127.0.0.1", port, 16 * 1024).await.unwrap();
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect_tcp("127.0.0.1", port, 16 * 1024).await;
        assert!(matches!(result, Err(IprotoError::Network(_))));
    }
}
