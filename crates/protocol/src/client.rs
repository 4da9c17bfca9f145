use crate::command::{Command, Request, Response};
use crate::error::WireError;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

/// Where a daemon listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),
    Tcp(SocketAddr),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("cannot connect to daemon at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon closed the connection")]
    Closed,

    #[error("daemon did not answer within {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Remote(WireError),
}

type Reader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;
type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// One connection to a daemon. Requests on a connection are answered in order.
pub struct DaemonClient {
    reader: Reader,
    writer: Writer,
    next_id: u64,
    timeout: Option<Duration>,
}

impl DaemonClient {
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, ClientError> {
        let connect_err = |source| ClientError::Connect {
            endpoint: endpoint.to_string(),
            source,
        };
        let (read_half, write_half): (Box<dyn AsyncRead + Send + Unpin>, Writer) = match endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path)
                    .await
                    .map_err(connect_err)?;
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => {
                return Err(connect_err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "unix sockets are not available on this platform",
                )))
            }
            Endpoint::Tcp(addr) => {
                let stream = tokio::net::TcpStream::connect(addr)
                    .await
                    .map_err(connect_err)?;
                let (r, w) = stream.into_split();
                (Box::new(r), Box::new(w))
            }
        };
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            next_id: 1,
            timeout: None,
        })
    }

    /// Bound the wait for each response.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send one request and wait for its response.
    pub async fn call(&mut self, command: Command, params: Value) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;
        let request = Request::new(command, id, params);
        log::debug!("-> {} #{id}", command.as_str());

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.exchange(&request))
                .await
                .map_err(|_| ClientError::Timeout(limit))??,
            None => self.exchange(&request).await?,
        };
        response.into_result().map_err(ClientError::Remote)
    }

    /// Like [`call`](Self::call) but decodes the result.
    pub async fn call_typed<T: DeserializeOwned>(
        &mut self,
        command: Command,
        params: Value,
    ) -> Result<T, ClientError> {
        let value = self.call(command, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, ClientError> {
        let msg = serde_json::to_string(request)? + "\n";
        self.writer.write_all(msg.as_bytes()).await?;
        self.writer.flush().await?;

        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Err(ClientError::Closed);
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// Write raw bytes and read back one reply line, if any.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<Option<String>, ClientError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
