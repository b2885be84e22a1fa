//! Liveness probe speaking the key-value server's text protocol.
//!
//! The probe connects to `127.0.0.1:<port>`, authenticates when a credential
//! is known and expects `+PONG` in reply to `PING`. The whole exchange is
//! bounded by a single timeout.

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Why a probe failed.
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Nothing accepted the connection.
    #[error("connection refused on port {port}: {source}")]
    Connect {
        /// Probed port
        port: u16,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The exchange did not complete in time.
    #[error("no answer within {0:?}")]
    Timeout(Duration),

    /// The server rejected the credential.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// The server answered something other than the expected reply.
    #[error("unexpected reply '{0}'")]
    Unexpected(String),

    /// The connection failed mid-exchange.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Probe the server on `port`.
pub async fn ping(port: u16, password: Option<&str>, timeout: Duration) -> Result<(), ProbeError> {
    tokio::time::timeout(timeout, exchange(port, password))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
}

async fn exchange(port: u16, password: Option<&str>) -> Result<(), ProbeError> {
    let stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .map_err(|source| ProbeError::Connect { port, source })?;
    let mut stream = BufReader::new(stream);

    if let Some(password) = password {
        let reply = command(&mut stream, &["AUTH", password]).await?;
        if reply != "+OK" {
            return Err(ProbeError::Auth(reply));
        }
    }

    let reply = command(&mut stream, &["PING"]).await?;
    if reply == "+PONG" {
        Ok(())
    } else if reply.starts_with("-NOAUTH") || reply.starts_with("-WRONGPASS") {
        Err(ProbeError::Auth(reply))
    } else {
        Err(ProbeError::Unexpected(reply))
    }
}

/// Send one command and read the single-line reply.
async fn command(stream: &mut BufReader<TcpStream>, args: &[&str]) -> Result<String, ProbeError> {
    stream.get_mut().write_all(&encode(args)).await?;

    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
        return Err(ProbeError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before reply",
        )));
    }
    Ok(line.trim_end().to_string())
}

/// Encode a command as an array of bulk strings.
fn encode(args: &[&str]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one connection and answer each request line that starts a
    /// command with the next canned reply.
    async fn fake_server(replies: Vec<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            let mut replies = replies.into_iter();
            let mut line = String::new();
            while socket.read_line(&mut line).await.unwrap_or(0) > 0 {
                if line.starts_with('*') {
                    // Skip the bulk strings of this command.
                    let count: usize = line[1..].trim().parse().unwrap();
                    for _ in 0..count * 2 {
                        line.clear();
                        socket.read_line(&mut line).await.unwrap();
                    }
                    let Some(reply) = replies.next() else { break };
                    socket.get_mut().write_all(reply.as_bytes()).await.unwrap();
                }
                line.clear();
            }
        });
        port
    }

    #[test]
    fn test_encode_command() {
        assert_eq!(encode(&["PING"]), b"*1\r\n$4\r\nPING\r\n".to_vec());
        assert_eq!(
            encode(&["AUTH", "pw"]),
            b"*2\r\n$4\r\nAUTH\r\n$2\r\npw\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_ping_without_credential() {
        let port = fake_server(vec!["+PONG\r\n"]).await;

        ping(port, None, Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_with_credential() {
        let port = fake_server(vec!["+OK\r\n", "+PONG\r\n"]).await;

        ping(port, Some("secret"), Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_credential() {
        let port = fake_server(vec!["-WRONGPASS invalid password\r\n"]).await;

        let err = ping(port, Some("bad"), Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let port = fake_server(vec!["-NOAUTH Authentication required.\r\n"]).await;

        let err = ping(port, None, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let err = ping(port, None, Duration::from_millis(200)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Timeout(_)));
        drop(listener);
    }

    #[tokio::test]
    async fn test_closed_port_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ping(port, None, Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, ProbeError::Connect { .. }));
    }
}
