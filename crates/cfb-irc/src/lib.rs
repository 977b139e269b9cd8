//! IRC adapter.
//!
//! Implements the `cfb-core` ChatTransport over a plain IRC connection and
//! turns inbound lines into `ChatEvent`s for the relay listener. A lost
//! connection is re-established in the background with exponential backoff.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    sync::{mpsc, Mutex},
};
use tokio_util::sync::CancellationToken;

use cfb_core::{
    errors::Error,
    relay::{port::ChatTransport, types::ChatEvent},
    Result,
};

pub mod line;

use line::IrcLine;

const EVENT_BUFFER: usize = 256;

/// First reconnect delay; doubles per failed attempt up to `RECONNECT_MAX`.
pub const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// How a read session ended.
enum SessionEnd {
    Cancelled,
    ReceiverGone,
    Lost(String),
}

pub struct IrcTransport {
    server: String,
    nickname: String,
    /// Nick in use on the current connection; may carry `_` suffixes after 433.
    current_nick: Mutex<String>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    reconnect_initial: Duration,
}

impl IrcTransport {
    /// Connect and register. Returns the transport plus the inbound event
    /// stream; a background task reads the socket and reconnects after a
    /// lost connection until `cancel` fires.
    pub async fn connect(
        server: &str,
        nickname: &str,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ChatEvent>)> {
        Self::connect_with_backoff(server, nickname, RECONNECT_INITIAL, cancel).await
    }

    pub async fn connect_with_backoff(
        server: &str,
        nickname: &str,
        reconnect_initial: Duration,
        cancel: CancellationToken,
    ) -> Result<(Arc<Self>, mpsc::Receiver<ChatEvent>)> {
        let transport = Arc::new(Self {
            server: server.to_string(),
            nickname: nickname.to_string(),
            current_nick: Mutex::new(nickname.to_string()),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
            reconnect_initial,
        });
        let read = transport.open().await?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(transport.clone().supervise(read, tx, cancel));

        Ok((transport, rx))
    }

    /// Open a socket and send the registration lines.
    async fn open(&self) -> Result<OwnedReadHalf> {
        let stream = TcpStream::connect(&self.server)
            .await
            .map_err(|e| Error::Transport(format!("irc connect to {} failed: {e}", self.server)))?;
        let (read, write) = stream.into_split();
        *self.writer.lock().await = Some(write);

        let nick = {
            let mut current = self.current_nick.lock().await;
            current.clone_from(&self.nickname);
            current.clone()
        };
        self.write_line(&format!("NICK {nick}")).await?;
        self.write_line(&format!("USER {nick} 0 * :{nick}")).await?;
        tracing::info!(server = %self.server, nickname = %nick, "connected to irc server");
        Ok(read)
    }

    async fn supervise(
        self: Arc<Self>,
        mut read: OwnedReadHalf,
        tx: mpsc::Sender<ChatEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let end = self.read_session(read, &tx, &cancel).await;
            self.mark_down().await;

            let reason = match end {
                SessionEnd::Cancelled => {
                    let _ = tx
                        .send(ChatEvent::Disconnected {
                            reason: "shutdown".to_string(),
                        })
                        .await;
                    return;
                }
                SessionEnd::ReceiverGone => return,
                SessionEnd::Lost(reason) => reason,
            };

            tracing::warn!(server = %self.server, reason = %reason, "irc connection lost");
            if tx.send(ChatEvent::Disconnected { reason }).await.is_err() {
                return;
            }

            read = match self.reconnect(&cancel).await {
                Some(read) => read,
                None => return,
            };
        }
    }

    async fn read_session(
        &self,
        read: OwnedReadHalf,
        tx: &mpsc::Sender<ChatEvent>,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut reader = BufReader::new(read);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = self.write_line("QUIT :shutting down").await;
                    return SessionEnd::Cancelled;
                }
                read = reader.read_until(b'\n', &mut buf) => match read {
                    Ok(0) => return SessionEnd::Lost("connection closed by server".to_string()),
                    Ok(_) => {
                        // Not every client sends UTF-8.
                        let raw = String::from_utf8_lossy(&buf);
                        if let Some(ev) = self.handle_line(&raw).await {
                            if tx.send(ev).await.is_err() {
                                return SessionEnd::ReceiverGone;
                            }
                        }
                    }
                    Err(e) => return SessionEnd::Lost(format!("read error: {e}")),
                }
            }
        }
    }

    /// Retry until a new connection is registered or `cancel` fires.
    async fn reconnect(&self, cancel: &CancellationToken) -> Option<OwnedReadHalf> {
        let mut delay = self.reconnect_initial;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.open().await {
                Ok(read) => return Some(read),
                Err(e) => {
                    tracing::warn!(error = %e, retry_in = ?delay, "irc reconnect failed");
                    delay = (delay * 2).min(RECONNECT_MAX);
                }
            }
        }
    }

    async fn mark_down(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock().await = None;
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let w = guard
            .as_mut()
            .ok_or_else(|| Error::Transport("irc connection is not established".to_string()))?;
        w.write_all(format!("{line}\r\n").as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("irc write failed: {e}")))?;
        w.flush()
            .await
            .map_err(|e| Error::Transport(format!("irc flush failed: {e}")))
    }

    /// Protocol housekeeping plus translation into relay events.
    async fn handle_line(&self, raw: &str) -> Option<ChatEvent> {
        let msg = IrcLine::parse(raw)?;
        match msg.command.as_str() {
            "PING" => {
                let token = msg.params.first().map(String::as_str).unwrap_or_default();
                if let Err(e) = self.write_line(&format!("PONG :{token}")).await {
                    tracing::warn!(error = %e, "failed to answer PING");
                }
                None
            }
            "433" if !self.is_connected() => {
                let nick = {
                    let mut current = self.current_nick.lock().await;
                    current.push('_');
                    current.clone()
                };
                tracing::warn!(nickname = %nick, "nickname in use, retrying");
                if let Err(e) = self.write_line(&format!("NICK {nick}")).await {
                    tracing::warn!(error = %e, "failed to send NICK");
                }
                None
            }
            "001" => {
                if let Some(nick) = msg.params.first() {
                    self.current_nick.lock().await.clone_from(nick);
                }
                self.connected.store(true, Ordering::SeqCst);
                Some(ChatEvent::Registered)
            }
            _ => {
                let nick = self.current_nick.lock().await.clone();
                msg.into_event(&nick)
            }
        }
    }
}

/// One PRIVMSG line; line breaks would split it into several protocol lines.
fn privmsg(channel: &str, text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("PRIVMSG {channel} :{flat}")
}

#[async_trait]
impl ChatTransport for IrcTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn join(&self, channel: &str) -> Result<()> {
        self.write_line(&format!("JOIN {channel}")).await
    }

    async fn send(&self, channel: &str, text: &str) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Transport("irc connection is not established".to_string()));
        }
        self.write_line(&privmsg(channel, text)).await?;
        tracing::debug!(channel, "sent to irc");
        Ok(())
    }
}
