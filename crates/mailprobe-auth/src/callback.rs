//! One-shot local listener for the OAuth2 redirect
//!
//! A background task accepts connections on the redirect port and reads each
//! one on its own task, so an idle browser preconnect cannot hold up the
//! redirect. Requests for other paths (favicons and the like) get a 404 and
//! are ignored. The first request on the redirect path is answered and its
//! result is sent over a oneshot channel; the task then exits, the listening
//! socket closes and remaining connections are dropped.

use crate::{AuthError, AuthResult};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use url::Url;

/// How long the listener task gets to finish writing its response
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// How long a connection may take to deliver its request head
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the request line plus headers
const MAX_REQUEST_BYTES: u64 = 16 * 1024;

const SUCCESS_HTML: &str = "<html><body><h1>Authorization successful!</h1><p>You can close this browser tab now.</p></body></html>";
const FAILURE_HTML: &str = "<html><body><h1>Authorization Failed</h1><p>No authorization code was found in the request.</p></body></html>";
const NOT_FOUND_HTML: &str = "<html><body><h1>Not Found</h1></body></html>";

/// What a single request on the listener turned out to be
#[derive(Debug, PartialEq, Eq)]
enum Redirect {
    /// Redirect carrying a non-empty `code` parameter
    Code(String),
    /// Redirect without a usable code (e.g. `error=access_denied`)
    NoCode,
    /// Request for some other path or method
    Unrelated,
}

/// Local listener waiting for exactly one OAuth2 redirect
pub struct CallbackListener {
    port: u16,
    receiver: oneshot::Receiver<Option<String>>,
    task: JoinHandle<()>,
}

impl CallbackListener {
    /// Bind to the port of `redirect_uri` and start serving its path
    pub async fn bind(redirect_uri: &str) -> AuthResult<Self> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::InvalidConfig(format!("Invalid redirect URI {}: {}", redirect_uri, e)))?;

        let port = url.port_or_known_default().ok_or_else(|| {
            AuthError::InvalidConfig(format!("Redirect URI has no port: {}", redirect_uri))
        })?;
        let host = match url.host_str() {
            None | Some("localhost") => "127.0.0.1",
            Some(host) => host.trim_start_matches('[').trim_end_matches(']'),
        };
        let path = match url.path() {
            "" => "/".to_string(),
            path => path.to_string(),
        };

        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| AuthError::CallbackServerFailed(format!("{}:{}: {}", host, port, e)))?;
        let port = listener.local_addr()?.port();

        info!("Local server started on port {} for path {}", port, path);

        let (sender, receiver) = oneshot::channel();
        let task = tokio::spawn(serve(listener, path, sender));

        Ok(Self {
            port,
            receiver,
            task,
        })
    }

    /// The port actually bound
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for the redirect, stop the listener and return the code
    pub async fn wait(mut self) -> AuthResult<String> {
        let outcome = (&mut self.receiver).await;

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            self.task.abort();
        }
        info!("Local server stopped");

        match outcome {
            Ok(Some(code)) => Ok(code),
            Ok(None) => Err(AuthError::AuthorizationNotObtained(
                "the redirect did not carry an authorization code".to_string(),
            )),
            Err(_) => Err(AuthError::AuthorizationNotObtained(
                "the local server stopped before a redirect arrived".to_string(),
            )),
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(listener: TcpListener, path: String, sender: oneshot::Sender<Option<String>>) {
    let (results, mut redirects) = mpsc::channel::<Redirect>(1);
    let mut connections = JoinSet::new();

    let outcome = loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Callback connection from {}", peer);
                    connections.spawn(handle_connection(stream, path.clone(), results.clone()));
                }
                Err(e) => {
                    warn!("Callback server accept failed: {}", e);
                    break None;
                }
            },
            Some(redirect) = redirects.recv() => match redirect {
                Redirect::Code(code) => break Some(code),
                Redirect::NoCode => break None,
                Redirect::Unrelated => {}
            },
        }
    };

    // Connections still being read are abandoned
    connections.abort_all();
    let _ = sender.send(outcome);
}

async fn handle_connection(stream: TcpStream, path: String, results: mpsc::Sender<Redirect>) {
    match tokio::time::timeout(READ_TIMEOUT, respond(stream, &path)).await {
        Ok(Ok(Redirect::Unrelated)) => {}
        Ok(Ok(redirect)) => {
            let _ = results.send(redirect).await;
        }
        Ok(Err(e)) => debug!("Dropped callback connection: {}", e),
        Err(_) => debug!("Dropped callback connection idle for {:?}", READ_TIMEOUT),
    }
}

async fn respond(mut stream: TcpStream, path: &str) -> std::io::Result<Redirect> {
    let mut reader = BufReader::new((&mut stream).take(MAX_REQUEST_BYTES));
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    if !request_line.ends_with('\n') {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "request line too long or truncated",
        ));
    }

    // Drain the headers so the browser sees a clean response
    loop {
        let mut header = String::new();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header.trim().is_empty() {
            break;
        }
    }

    debug!("Received callback request: {}", request_line.trim());

    let redirect = classify_request(&request_line, path);
    let (status, body) = match redirect {
        Redirect::Code(_) => ("200 OK", SUCCESS_HTML),
        Redirect::NoCode => ("400 Bad Request", FAILURE_HTML),
        Redirect::Unrelated => ("404 Not Found", NOT_FOUND_HTML),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    let _ = stream.shutdown().await;

    Ok(redirect)
}

/// Decide what a request line means for the redirect path
fn classify_request(request_line: &str, path: &str) -> Redirect {
    // Request line format: "GET /callback?code=xxx HTTP/1.1"
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Redirect::Unrelated;
    };
    if method != "GET" {
        return Redirect::Unrelated;
    }

    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return Redirect::Unrelated;
    };
    if url.path() != path {
        return Redirect::Unrelated;
    }

    url.query_pairs()
        .find(|(key, _)| key == "code")
        .map(|(_, value)| value.into_owned())
        .filter(|code| !code.is_empty())
        .map_or(Redirect::NoCode, Redirect::Code)
}
