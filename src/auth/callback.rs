//! One-shot loopback listener for the OAuth redirect.
//!
//! The listener binds `127.0.0.1`, accepts exactly one HTTP request, answers
//! it with a static acknowledgement and is closed on every exit path.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Upper bound on the size of the callback request head.
const MAX_REQUEST_BYTES: usize = 16 * 1024;

const SUCCESS_MESSAGE: &str = "Authorization received. You may close this window.";
const FAILURE_MESSAGE: &str = "Authorization failed.";

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

impl CallbackParams {
    /// Extract `code` and `state` from a request target such as `/?code=..&state=..`.
    pub fn from_request_target(target: &str) -> Self {
        let query = target.split_once('?').map(|(_, q)| q).unwrap_or("");
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "code" if params.code.is_none() => params.code = Some(value.into_owned()),
                "state" if params.state.is_none() => params.state = Some(value.into_owned()),
                _ => {}
            }
        }
        params
    }
}

/// A bound loopback listener waiting for the OAuth redirect.
pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl CallbackListener {
    /// Bind `127.0.0.1:port`. Port 0 picks a free port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            Error::Callback(format!(
                "failed to bind callback listener on 127.0.0.1:{}: {}",
                port, e
            ))
        })?;
        let local_addr = listener.local_addr()?;
        debug!("callback listener bound on {}", local_addr);
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for one request, acknowledge it, and close the listener.
    ///
    /// `None` waits indefinitely.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<CallbackParams> {
        let addr = self.local_addr;
        let listener = scopeguard::guard(self.listener, move |listener| {
            drop(listener);
            debug!("callback listener on {} closed", addr);
        });

        let accepted = match timeout {
            Some(limit) => tokio::time::timeout(limit, listener.accept())
                .await
                .map_err(|_| Error::CallbackTimeout(limit))?,
            None => listener.accept().await,
        };
        let (mut stream, peer) = accepted
            .map_err(|e| Error::Callback(format!("failed to accept callback connection: {}", e)))?;
        trace!("callback connection from {}", peer);

        let target = read_request_target(&mut stream).await?;
        let params = CallbackParams::from_request_target(&target);

        let message = if params.code.is_some() {
            SUCCESS_MESSAGE
        } else {
            FAILURE_MESSAGE
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            message.len(),
            message
        );
        stream.write_all(response.as_bytes()).await?;
        stream.shutdown().await.ok();

        Ok(params)
    }
}

/// Read the request head and return the request target of its first line.
async fn read_request_target(stream: &mut TcpStream) -> Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buffer);
    let first_line = head
        .lines()
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| Error::Callback("callback request was empty".to_string()))?;

    let mut parts = first_line.split_whitespace();
    let _method = parts.next();
    let target = parts
        .next()
        .ok_or_else(|| Error::Callback(format!("malformed request line: {}", first_line)))?;
    Ok(target.to_string())
}
