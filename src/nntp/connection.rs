use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_native_tls::TlsConnector;

use super::auth::{cram_md5_response, sasl_plain_token, AuthMethod, Capabilities};
use super::response::{codes, NntpResponse};
use crate::config::UsenetConfig;
use crate::error::{ErrorClass, NntpError, UlNzbError};

type Result<T> = std::result::Result<T, UlNzbError>;

/// How long to wait for the reply to QUIT before dropping the socket
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    /// Greeting received
    Connected,
    /// `MODE READER` accepted
    ModeReader,
    Authenticated,
    Ready,
    Closed,
}

/// Result of a successful POST
#[derive(Debug, Clone)]
pub struct PostReceipt {
    pub message_id: Option<String>,
    pub response: NntpResponse,
}

/// One NNTP posting session, owned by exactly one worker at a time
pub struct NntpConnection {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    state: SessionState,
    errored: bool,
    io_timeout: Duration,
    capabilities: Option<Capabilities>,
}

impl NntpConnection {
    /// Build the TLS connector shared by every connection to the server
    ///
    /// Sharing one connector lets the TLS layer reuse sessions across the pool.
    pub fn tls_connector(config: &UsenetConfig) -> Result<Arc<TlsConnector>> {
        let mut tls_builder = native_tls::TlsConnector::builder();
        if !config.verify_ssl_certs {
            tls_builder.danger_accept_invalid_certs(true);
            tls_builder.danger_accept_invalid_hostnames(true);
        }
        let native_connector = tls_builder.build()?;
        Ok(Arc::new(TlsConnector::from(native_connector)))
    }

    /// Open, negotiate and authenticate a new session
    pub async fn connect(
        config: &UsenetConfig,
        tls_connector: Option<Arc<TlsConnector>>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.server, config.port);
        let connect_timeout = Duration::from_secs(config.timeout);

        let tcp_stream = timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| NntpError::Timeout {
                seconds: config.timeout,
            })?
            .map_err(|e| NntpError::ConnectionFailed {
                server: config.server.clone(),
                port: config.port,
                source: e,
            })?;

        tcp_stream.set_nodelay(true)?;

        let (reader, writer): (
            Box<dyn AsyncRead + Unpin + Send>,
            Box<dyn AsyncWrite + Unpin + Send>,
        ) = if config.ssl {
            let connector = match tls_connector {
                Some(shared) => shared,
                None => Self::tls_connector(config)?,
            };

            let tls_stream = timeout(
                connect_timeout,
                connector.connect(&config.server, tcp_stream),
            )
            .await
            .map_err(|_| NntpError::Timeout {
                seconds: config.timeout,
            })?
            .map_err(|e| NntpError::TlsError(e.to_string()))?;

            let (read_half, write_half) = tokio::io::split(tls_stream);
            (Box::new(read_half), Box::new(write_half))
        } else {
            let (read_half, write_half) = tokio::io::split(tcp_stream);
            (Box::new(read_half), Box::new(write_half))
        };

        Self::from_streams(reader, writer, connect_timeout)
            .establish(config)
            .await
    }

    /// Wrap an already-open byte stream; no protocol bytes are exchanged yet
    pub fn from_streams(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
        io_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            reader: BufReader::with_capacity(64 * 1024, reader),
            state: SessionState::New,
            errored: false,
            io_timeout,
            capabilities: None,
        }
    }

    /// Read the greeting, switch to reader mode and authenticate
    pub async fn establish(mut self, config: &UsenetConfig) -> Result<Self> {
        let greeting = self.read_response().await?;
        if !greeting.is_success() {
            return Err(greeting.into_error().into());
        }
        tracing::debug!(server = %config.server, greeting = %greeting, "Connected");
        self.state = SessionState::Connected;

        self.negotiate(config).await?;
        self.state = SessionState::Ready;
        Ok(self)
    }

    async fn negotiate(&mut self, config: &UsenetConfig) -> Result<()> {
        let mut authenticated = false;

        loop {
            let response = self.command("MODE READER").await?;
            if response.is_success() {
                self.state = SessionState::ModeReader;
                break;
            }

            // Retry MODE READER exactly once after authenticating
            if is_auth_reply(&response) {
                if authenticated {
                    return Err(auth_failed(&response));
                }
                tracing::debug!(response = %response, "MODE READER needs authentication");
                self.authenticate(config).await?;
                authenticated = true;
                continue;
            }

            return Err(response.into_error().into());
        }

        if !authenticated && config.has_credentials() {
            self.authenticate(config).await?;
        }

        Ok(())
    }

    async fn authenticate(&mut self, config: &UsenetConfig) -> Result<()> {
        if !config.has_credentials() {
            return Err(NntpError::AuthRequired.into());
        }

        let user = config.username.as_str();
        let secret = config.password.as_str();
        match config.auth_method {
            AuthMethod::Original => self.auth_original(user, secret).await?,
            AuthMethod::Simple => self.auth_simple(user, secret).await?,
            AuthMethod::Plain => self.auth_plain(user, secret).await?,
            AuthMethod::CramMd5 => self.auth_cram_md5(user, secret).await?,
            other => return Err(NntpError::AuthNotImplemented(other.to_string()).into()),
        }

        tracing::debug!(method = %config.auth_method, "Authenticated");
        self.state = SessionState::Authenticated;
        Ok(())
    }

    /// AUTHINFO USER / AUTHINFO PASS
    async fn auth_original(&mut self, user: &str, secret: &str) -> Result<()> {
        let response = self.command(&format!("AUTHINFO USER {}", user)).await?;
        match response.code {
            codes::AUTH_ACCEPTED => return Ok(()),
            codes::PASSWORD_REQUIRED => {}
            _ => return Err(auth_failed(&response)),
        }

        let response = self
            .exchange(&format!("AUTHINFO PASS {}", secret), "AUTHINFO PASS ****")
            .await?;
        if response.code != codes::AUTH_ACCEPTED {
            return Err(auth_failed(&response));
        }
        Ok(())
    }

    /// AUTHINFO SIMPLE, then "user password" on its own line
    async fn auth_simple(&mut self, user: &str, secret: &str) -> Result<()> {
        let response = self.command("AUTHINFO SIMPLE").await?;
        if !response.is_continue() {
            return Err(auth_failed(&response));
        }

        let response = self
            .exchange(&format!("{} {}", user, secret), "<credentials>")
            .await?;
        if !response.is_success() {
            return Err(auth_failed(&response));
        }
        Ok(())
    }

    async fn auth_plain(&mut self, user: &str, secret: &str) -> Result<()> {
        let token = sasl_plain_token(user, secret);
        let response = self
            .exchange(
                &format!("AUTHINFO SASL PLAIN {}", token),
                "AUTHINFO SASL PLAIN ****",
            )
            .await?;
        if response.code != codes::AUTH_ACCEPTED {
            return Err(auth_failed(&response));
        }
        Ok(())
    }

    async fn auth_cram_md5(&mut self, user: &str, secret: &str) -> Result<()> {
        let response = self.command("AUTHINFO SASL CRAM-MD5").await?;
        if response.code != codes::SASL_CONTINUE {
            return Err(auth_failed(&response));
        }

        let challenge = response.text.split_whitespace().next().unwrap_or("");
        let answer = cram_md5_response(user, secret, challenge)?;
        let response = self.exchange(&answer, "<cram-md5 response>").await?;
        if response.code != codes::AUTH_ACCEPTED {
            return Err(auth_failed(&response));
        }
        Ok(())
    }

    /// Ask the server what it supports; the result is cached for the session
    pub async fn capabilities(&mut self) -> Result<&Capabilities> {
        if self.capabilities.is_none() {
            let response = self.command("CAPABILITIES").await?;
            if response.code != codes::CAPABILITIES_FOLLOW {
                return Err(response.into_error().into());
            }
            let lines = self.read_data_block().await?;
            self.capabilities = Some(Capabilities::parse(&lines));
        }
        Ok(self.capabilities.get_or_insert_with(Capabilities::default))
    }

    /// Post one article (headers, blank line, body)
    pub async fn post(&mut self, article: &[u8]) -> Result<PostReceipt> {
        self.ensure_ready()?;

        let response = self.command("POST").await?;
        if response.code != codes::SEND_ARTICLE && !response.is_continue() {
            return Err(response.into_error().into());
        }

        let wire = dot_stuff(article);
        let written = write_all_flush(&mut self.writer, &wire, self.io_timeout).await;
        self.track(written)?;

        let response = self.read_response().await?;
        if !response.is_success() {
            return Err(response.into_error().into());
        }

        tracing::trace!(response = %response, "Article accepted");
        Ok(PostReceipt {
            message_id: response.message_id(),
            response,
        })
    }

    /// Check that an article has propagated; `Ok(false)` on 430
    pub async fn stat(&mut self, message_id: &str) -> Result<bool> {
        self.ensure_ready()?;

        let response = self.command(&format!("STAT <{}>", message_id)).await?;
        match response.code {
            codes::ARTICLE_EXISTS => Ok(true),
            codes::NO_SUCH_ARTICLE => Ok(false),
            _ => Err(response.into_error().into()),
        }
    }

    /// Send QUIT unless the session already failed, then close the transport
    pub async fn finish(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        if !self.errored {
            let quit = write_all_flush(&mut self.writer, b"QUIT\r\n", QUIT_TIMEOUT).await;
            if quit.is_ok() {
                let _ = timeout(QUIT_TIMEOUT, read_line(&mut self.reader)).await;
            }
        }

        let _ = timeout(QUIT_TIMEOUT, self.writer.shutdown()).await;
        self.state = SessionState::Closed;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// A session that hit a transport or framing error can't be trusted again
    pub fn is_broken(&self) -> bool {
        self.errored || self.state == SessionState::Closed
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_broken() || self.state != SessionState::Ready {
            return Err(NntpError::UnhealthyConnection.into());
        }
        Ok(())
    }

    async fn command(&mut self, command: &str) -> Result<NntpResponse> {
        self.exchange(command, command).await
    }

    /// Send one command line and read its status reply; `log_as` keeps secrets out of logs
    async fn exchange(&mut self, command: &str, log_as: &str) -> Result<NntpResponse> {
        tracing::trace!(command = log_as, ">>");
        self.send_command(command).await?;
        let response = self.read_response().await?;
        tracing::debug!(command = log_as, response = %response, "<<");
        Ok(response)
    }

    async fn send_command(&mut self, command: &str) -> Result<()> {
        let mut line = Vec::with_capacity(command.len() + 2);
        line.extend_from_slice(command.as_bytes());
        line.extend_from_slice(b"\r\n");
        let written = write_all_flush(&mut self.writer, &line, self.io_timeout).await;
        self.track(written)
    }

    /// Read a status reply, following `xyz-` continuation lines
    async fn read_response(&mut self) -> Result<NntpResponse> {
        let first = self.read_line().await?;
        let mut response = self.track(NntpResponse::parse(&first).map_err(Into::into))?;

        let mut line = first;
        while NntpResponse::continues(&line) {
            line = self.read_line().await?;
            response.continuation.push(line.clone());
        }

        Ok(response)
    }

    /// Read a dot-terminated data block, un-stuffing leading dots
    async fn read_data_block(&mut self) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line == "." {
                break;
            }
            match line.strip_prefix('.') {
                Some(unstuffed) => lines.push(unstuffed.to_string()),
                None => lines.push(line),
            }
        }
        Ok(lines)
    }

    async fn read_line(&mut self) -> Result<String> {
        let line = match timeout(self.io_timeout, read_line(&mut self.reader)).await {
            Ok(result) => result,
            Err(_) => Err(NntpError::Timeout {
                seconds: self.io_timeout.as_secs(),
            }
            .into()),
        };
        self.track(line)
    }

    /// Remember transport failures so the session is never reused after one
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if matches!(e.class(), ErrorClass::Transport | ErrorClass::Protocol) {
                self.errored = true;
            }
        }
        result
    }
}

async fn read_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Result<String> {
    let mut buf = Vec::with_capacity(128);
    let read = reader.read_until(b'\n', &mut buf).await?;
    if read == 0 {
        return Err(NntpError::ConnectionClosed.into());
    }

    if buf.ends_with(b"\r\n") {
        buf.truncate(buf.len() - 2);
    } else if buf.ends_with(b"\n") {
        buf.truncate(buf.len() - 1);
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn write_all_flush<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    bytes: &[u8],
    limit: Duration,
) -> Result<()> {
    let write = async {
        writer.write_all(bytes).await?;
        writer.flush().await
    };
    timeout(limit, write)
        .await
        .map_err(|_| NntpError::Timeout {
            seconds: limit.as_secs(),
        })??;
    Ok(())
}

/// 480 to MODE READER, or an auth rejection category
fn is_auth_reply(response: &NntpResponse) -> bool {
    response.code == codes::AUTH_REQUIRED
        || response.category().class() == ErrorClass::Authentication
}

fn auth_failed(response: &NntpResponse) -> UlNzbError {
    let reason = match response.code {
        codes::AUTH_REQUIRED => "Authentication required",
        codes::AUTH_REJECTED | codes::AUTH_OUT_OF_SEQUENCE => {
            "Not authorized or wrong username/password"
        }
        _ => response.category().describe(),
    };
    // Only the code; some servers echo the credentials back
    NntpError::AuthFailed(format!("{} ({})", reason, response.code)).into()
}

/// Convert an article to wire form: CRLF line endings, dot-stuffing, terminator
pub fn dot_stuff(article: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(article.len() + article.len() / 64 + 8);
    let content = article.strip_suffix(b"\n").unwrap_or(article);

    if !content.is_empty() {
        for line in content.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                wire.push(b'.');
            }
            wire.extend_from_slice(line);
            wire.extend_from_slice(b"\r\n");
        }
    }

    wire.extend_from_slice(b".\r\n");
    wire
}
