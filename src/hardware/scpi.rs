//! SCPI over TCP communication helpers
//!
//! Both bench instruments speak line-oriented SCPI. Drivers talk to an
//! [`ScpiTransport`] so they can be exercised without a socket; [`TcpScpiClient`]
//! is the real transport for instruments behind a LAN/GPIB gateway.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default command timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Connection establishment timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Line-oriented command channel to an instrument
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Send a command without expecting a response
    async fn write(&self, command: &str) -> Result<()>;

    /// Send a query and return the trimmed response line
    async fn query(&self, query: &str) -> Result<String>;

    /// Query a floating-point value
    async fn query_f64(&self, query: &str) -> Result<f64> {
        let response = self.query(query).await?;
        response.parse::<f64>().with_context(|| {
            format!(
                "Failed to parse '{}' as f64 from query: {}",
                response, query
            )
        })
    }
}

/// Socket plus the number of replies the instrument still owes us
struct Connection {
    reader: BufReader<TcpStream>,
    unanswered: usize,
}

/// Async SCPI client over a raw TCP socket
///
/// A query that times out after it was sent leaves its reply in flight. The
/// next query first reads and discards every owed reply; when one does not
/// arrive within the I/O timeout the socket is replaced by a fresh connection,
/// so a late answer can never be returned for a later query.
pub struct TcpScpiClient {
    conn: Mutex<Connection>,
    timeout: Duration,
    peer: String,
}

impl TcpScpiClient {
    /// Connect to `host:port`, using `io_timeout` for every later query.
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> Result<Self> {
        let peer = format!("{}:{}", host, port);
        let stream = Self::open(&peer).await?;
        tracing::info!(peer = %peer, "SCPI connection established");

        Ok(Self {
            conn: Mutex::new(Connection {
                reader: BufReader::new(stream),
                unanswered: 0,
            }),
            timeout: if io_timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                io_timeout
            },
            peer,
        })
    }

    /// Remote address this client talks to
    pub fn peer(&self) -> &str {
        &self.peer
    }

    async fn open(peer: &str) -> Result<TcpStream> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(peer))
            .await
            .with_context(|| format!("Connection timeout to {}", peer))?
            .with_context(|| format!("Failed to connect to {}", peer))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn send_line(stream: &mut BufReader<TcpStream>, line: &str) -> Result<()> {
        let cmd = format!("{}\r\n", line);
        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Failed to write: {}", line))?;
        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")
    }

    /// Consume replies owed by earlier timed-out queries, reconnecting if they never come
    async fn resync(&self, conn: &mut Connection) -> Result<()> {
        while conn.unanswered > 0 {
            let mut late = String::new();
            match timeout(self.timeout, conn.reader.read_line(&mut late)).await {
                Ok(Ok(n)) if n > 0 => {
                    tracing::debug!("Discarding late response {:?}", late.trim());
                    conn.unanswered -= 1;
                }
                _ => {
                    tracing::warn!(
                        peer = %self.peer,
                        unanswered = conn.unanswered,
                        "Late responses did not arrive, reconnecting"
                    );
                    let stream = Self::open(&self.peer).await?;
                    conn.reader = BufReader::new(stream);
                    conn.unanswered = 0;
                }
            }
        }

        // Unsolicited bytes already buffered belong to no query
        let stale = conn.reader.buffer().len();
        if stale > 0 {
            tracing::debug!("Discarding {} stale bytes", stale);
            conn.reader.consume(stale);
        }
        Ok(())
    }
}

#[async_trait]
impl ScpiTransport for TcpScpiClient {
    async fn write(&self, command: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        tracing::debug!("SCPI write: {:?}", command);
        timeout(self.timeout, Self::send_line(&mut conn.reader, command))
            .await
            .with_context(|| format!("Timeout writing command: {}", command))?
    }

    async fn query(&self, query: &str) -> Result<String> {
        let mut guard = self.conn.lock().await;
        let conn = &mut *guard;
        self.resync(conn).await?;

        tracing::debug!("SCPI query: {:?}", query);
        let mut sent = false;
        let exchange = async {
            Self::send_line(&mut conn.reader, query).await?;
            sent = true;
            let mut response = String::new();
            let n = conn
                .reader
                .read_line(&mut response)
                .await
                .context("Failed to read response")?;
            Ok::<_, anyhow::Error>((n, response))
        };
        let outcome = timeout(self.timeout, exchange).await;

        match outcome {
            Ok(Ok((0, _))) => bail!("Connection closed by device"),
            Ok(Ok((_, response))) => {
                let trimmed = response.trim().to_string();
                tracing::debug!("SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if sent {
                    conn.unanswered += 1;
                }
                bail!("Timeout waiting for response to: {}", query)
            }
        }
    }
}
