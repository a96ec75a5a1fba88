//! Server network layer: TCP accept, WebSocket upgrade and the event loop

use crate::client_manager::FrameSender;
use crate::state::Server;
use log::{debug, error, info, warn};
use shared::handshake::{self, HandshakeError, BAD_REQUEST_RESPONSE};
use shared::{FrameDecoder, LobbyPhase, Opcode, CLOSE_FRAME, DEFAULT_MAP_SIZE, PONG_FRAME};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior};

const READ_BUFFER_SIZE: usize = 4096;

/// Runtime knobs for the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Side length of the generated arena
    pub map_size: usize,
    /// Period of one lobby countdown step
    pub countdown_interval: Duration,
    /// Frames buffered per connection before new ones are dropped
    pub send_queue: usize,
    /// Time a new socket gets to complete the upgrade request
    pub handshake_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            map_size: DEFAULT_MAP_SIZE,
            countdown_interval: Duration::from_secs(1),
            send_queue: 256,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Events sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum NetworkEvent {
    NewConnection {
        addr: SocketAddr,
        sender: FrameSender,
        reply: oneshot::Sender<u32>,
    },
    Message {
        client_id: u32,
        text: String,
    },
    Disconnected {
        client_id: u32,
    },
}

/// Owns the listener and drives all server state from a single task
pub struct NetworkServer {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    state: Server,

    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,

    countdown: Option<Interval>,
    countdown_phase: Option<LobbyPhase>,
}

impl NetworkServer {
    pub async fn bind(addr: &str, config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on ws://{}", local_addr);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(NetworkServer {
            listener: Some(listener),
            local_addr,
            state: Server::new(config.map_size),
            config,
            event_tx,
            event_rx,
            countdown: None,
            countdown_phase: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Spawns task that accepts sockets and hands each to its own task
    fn spawn_acceptor(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = self.listener.take().ok_or("server is already running")?;
        let event_tx = self.event_tx.clone();
        let send_queue = self.config.send_queue;
        let handshake_timeout = self.config.handshake_timeout;

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
                        }
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            event_tx.clone(),
                            send_queue,
                            handshake_timeout,
                        ));
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
        Ok(())
    }

    fn handle_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::NewConnection {
                addr,
                sender,
                reply,
            } => {
                let client_id = self.state.connect(addr, sender);
                if reply.send(client_id).is_err() {
                    self.state.disconnect(client_id);
                }
            }
            NetworkEvent::Message { client_id, text } => {
                self.state.handle_text(client_id, &text);
            }
            NetworkEvent::Disconnected { client_id } => {
                self.state.disconnect(client_id);
            }
        }
    }

    /// Keeps exactly one countdown timer alive for the current phase
    ///
    /// A phase change always replaces the timer, so a superseded countdown
    /// can never fire into the next phase.
    fn sync_countdown(&mut self) {
        let phase = self.state.countdown_phase();
        if phase == self.countdown_phase {
            return;
        }
        self.countdown_phase = phase;

        let period = self.config.countdown_interval;
        self.countdown = phase.map(|_| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor()?;
        info!("Server started successfully");

        loop {
            tokio::select! {
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = next_countdown(&mut self.countdown) => {
                    self.state.tick();
                },
            }
            self.sync_countdown();
        }

        Ok(())
    }
}

/// Resolves on the next countdown step, or never when no countdown runs
async fn next_countdown(countdown: &mut Option<Interval>) {
    match countdown {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Reads the HTTP upgrade request and answers it
///
/// Returns any bytes the client sent after the request head; they already
/// belong to the first WebSocket frame.
pub async fn upgrade<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = Vec::new();
    let mut buffer = [0u8; 1024];

    loop {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            ));
        }
        request.extend_from_slice(&buffer[..n]);

        match handshake::parse_request(&request) {
            Ok(Some((parsed, head_len))) => {
                debug!("Upgrading request {:?}", parsed.request_line);
                stream
                    .write_all(handshake::response(&parsed.key).as_bytes())
                    .await?;
                return Ok(request.split_off(head_len));
            }
            Ok(None) => continue,
            Err(HandshakeError::MissingKey) => {
                stream.write_all(BAD_REQUEST_RESPONSE.as_bytes()).await?;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    HandshakeError::MissingKey,
                ));
            }
            Err(e) => return Err(io::Error::new(io::ErrorKind::InvalidData, e)),
        }
    }
}

/// Full lifetime of one socket, from handshake to cleanup
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    send_queue: usize,
    handshake_timeout: Duration,
) {
    let leftover = match timeout(handshake_timeout, upgrade(&mut stream)).await {
        Ok(Ok(leftover)) => leftover,
        Ok(Err(e)) => {
            warn!("Handshake with {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!(
                "Handshake with {} not completed within {:?}, dropping",
                addr, handshake_timeout
            );
            return;
        }
    };

    let (frame_tx, frame_rx) = mpsc::channel(send_queue);
    let (reply_tx, reply_rx) = oneshot::channel();
    let registered = event_tx.send(NetworkEvent::NewConnection {
        addr,
        sender: frame_tx.clone(),
        reply: reply_tx,
    });
    if registered.is_err() {
        return;
    }
    let Ok(client_id) = reply_rx.await else {
        return;
    };

    let (reader, writer) = stream.into_split();
    tokio::spawn(write_frames(writer, frame_rx, client_id));

    read_frames(reader, leftover, client_id, &frame_tx, &event_tx).await;

    if let Err(e) = event_tx.send(NetworkEvent::Disconnected { client_id }) {
        error!("Failed to report disconnect of client {}: {}", client_id, e);
    }
}

/// Decodes inbound frames until close, error or protocol violation
///
/// Text payloads go to the main loop; control frames are answered here
/// through the connection's own outbound queue so ordering is preserved.
pub async fn read_frames<R>(
    mut reader: R,
    leftover: Vec<u8>,
    client_id: u32,
    frame_tx: &FrameSender,
    event_tx: &mpsc::UnboundedSender<NetworkEvent>,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::server();
    decoder.push(&leftover);
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    loop {
        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!("Protocol violation from client {}: {}", client_id, e);
                    return;
                }
            };

            match frame.opcode {
                Opcode::Text => match String::from_utf8(frame.payload) {
                    Ok(text) => {
                        if event_tx
                            .send(NetworkEvent::Message { client_id, text })
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(_) => debug!("Dropping non UTF-8 text frame from {}", client_id),
                },
                Opcode::Close => {
                    queue_control(frame_tx, &CLOSE_FRAME, client_id);
                    debug!("Client {} sent close", client_id);
                    return;
                }
                Opcode::Ping => queue_control(frame_tx, &PONG_FRAME, client_id),
                Opcode::Pong => {}
                other => debug!("Ignoring {:?} frame from {}", other, client_id),
            }
        }

        match reader.read(&mut buffer).await {
            Ok(0) => return,
            Ok(n) => decoder.push(&buffer[..n]),
            Err(e) => {
                debug!("Read error on client {}: {}", client_id, e);
                return;
            }
        }
    }
}

/// Queues a control reply behind any pending data frames
fn queue_control(frame_tx: &FrameSender, frame: &[u8], client_id: u32) {
    match frame_tx.try_send(frame.to_vec()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            warn!(
                "Outbound queue full for client {}, dropping control frame {:#04x}",
                client_id, frame[0]
            );
        }
        Err(TrySendError::Closed(_)) => {
            debug!("Client {} writer already closed", client_id);
        }
    }
}

/// Drains a connection's outbound queue onto its socket
async fn write_frames<W>(mut writer: W, mut frame_rx: mpsc::Receiver<Vec<u8>>, client_id: u32)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frame_rx.recv().await {
        if let Err(e) = writer.write_all(&frame).await {
            debug!("Write error on client {}: {}", client_id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
