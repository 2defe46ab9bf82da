//! TCP session handling, frame codec, and the tick/broadcast loop.
//!
//! Each accepted connection runs as its own pair of tasks: a reader that
//! feeds direction changes into the world, and a writer that drains an
//! outbound channel to the socket. The tick loop runs independently and
//! only ever touches a session through its channel, so a slow or dead
//! client can never stall the simulation.

use crate::game::{World, WorldConfig};
use log::{debug, error, info, warn};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::{ClientMessage, ServerMessage, Snapshot};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Upper bound on a single frame's payload, to bound allocation on read.
pub const MAX_FRAME_LEN: u32 = 64 * 1024;

/// Writes one length-prefixed bincode frame: u32 little-endian payload
/// length, then the payload.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", payload.len()),
        ));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed bincode frame. A decode failure means the
/// stream can no longer be framed reliably and ends the session.
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Server parameters, fixed at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub world: WorldConfig,
    pub tick_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            tick_period: Duration::from_millis(shared::DEFAULT_TICK_MS),
        }
    }
}

/// A live session's entry in the broadcast set.
struct SessionHandle {
    identity: String,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

type SessionMap = Arc<RwLock<HashMap<u64, SessionHandle>>>;

/// Accepts connections and drives the fixed-period simulation.
pub struct Server {
    listener: TcpListener,
    world: Arc<RwLock<World>>,
    sessions: SessionMap,
    tick_period: Duration,
    next_session_id: u64,
}

impl Server {
    /// Binds the listening socket. This is the only fatal failure path;
    /// everything after bind degrades per-session.
    pub async fn bind(addr: &str, config: Config) -> io::Result<Server> {
        let listener = TcpListener::bind(addr).await?;
        info!("server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            world: Arc::new(RwLock::new(World::new(config.world))),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            tick_period: config.tick_period,
            next_session_id: 1,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the server: spawns the tick loop, then accepts connections
    /// until the task is dropped.
    pub async fn run(mut self) {
        {
            let world = Arc::clone(&self.world);
            let sessions = Arc::clone(&self.sessions);
            let tick_period = self.tick_period;
            tokio::spawn(async move {
                run_tick_loop(world, sessions, tick_period).await;
            });
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let session_id = self.next_session_id;
                    self.next_session_id += 1;
                    debug!("connection {} accepted from {}", session_id, peer);

                    let world = Arc::clone(&self.world);
                    let sessions = Arc::clone(&self.sessions);
                    tokio::spawn(async move {
                        handle_session(session_id, stream, world, sessions).await;
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Advances the world once per period and broadcasts the snapshot.
/// `MissedTickBehavior::Skip` keeps overruns from double-firing: at most
/// one tick executes per period boundary. The first tick fires
/// immediately on startup.
async fn run_tick_loop(world: Arc<RwLock<World>>, sessions: SessionMap, tick_period: Duration) {
    let mut ticker = interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick_count: u64 = 0;

    loop {
        ticker.tick().await;

        let snapshot = {
            let mut world = world.write().await;
            world.tick()
        };
        tick_count += 1;

        if tick_count % 40 == 0 {
            let session_count = sessions.read().await.len();
            debug!(
                "tick {}: {} snakes, {} sessions",
                tick_count,
                snapshot.snakes.len(),
                session_count
            );
        }

        broadcast_snapshot(&world, &sessions, snapshot).await;
    }
}

/// Queues the snapshot to every live session. A failed send means the
/// session's writer is gone; those sessions are pruned afterwards without
/// disturbing delivery to the rest.
async fn broadcast_snapshot(world: &Arc<RwLock<World>>, sessions: &SessionMap, snapshot: Snapshot) {
    let stale: Vec<u64> = {
        let sessions = sessions.read().await;
        sessions
            .iter()
            .filter(|(_, handle)| {
                handle
                    .tx
                    .send(ServerMessage::Snapshot(snapshot.clone()))
                    .is_err()
            })
            .map(|(id, _)| *id)
            .collect()
    };

    for session_id in stale {
        warn!("session {} unreachable, pruning", session_id);
        close_session(session_id, sessions, world).await;
    }
}

/// Tears down a session exactly once: whichever caller actually removes
/// the map entry also removes the snake. Later calls are no-ops.
async fn close_session(session_id: u64, sessions: &SessionMap, world: &Arc<RwLock<World>>) {
    let removed = sessions.write().await.remove(&session_id);
    if let Some(handle) = removed {
        world.write().await.remove_player(&handle.identity);
        info!("session {} closed for '{}'", session_id, handle.identity);
    }
}

/// Drives one connection through its lifecycle:
/// Connecting -> Identified -> Active -> Closed.
async fn handle_session(
    session_id: u64,
    stream: TcpStream,
    world: Arc<RwLock<World>>,
    sessions: SessionMap,
) {
    let (mut reader, writer) = stream.into_split();

    // Connecting -> Identified: the first frame must carry the player
    // name. Anything else closes the session with no world state created.
    let requested = match read_frame::<_, ClientMessage>(&mut reader).await {
        Ok(ClientMessage::Identity { name }) => name,
        Ok(other) => {
            warn!(
                "session {}: expected identity as first message, got {:?}",
                session_id, other
            );
            return;
        }
        Err(e) => {
            warn!("session {}: closed before identifying: {}", session_id, e);
            return;
        }
    };

    let identity = register_player(&world, &requested).await;
    info!("session {}: player '{}' joined", session_id, identity);

    // Identified -> Active: enter the broadcast set and start the writer.
    let (tx, rx) = mpsc::unbounded_channel();
    sessions.write().await.insert(
        session_id,
        SessionHandle {
            identity: identity.clone(),
            tx,
        },
    );
    tokio::spawn(write_outbound(session_id, writer, rx));

    // Active: every further frame is a direction change. Logically
    // invalid requests (reversals, dead snake) are dropped inside the
    // world; only a broken stream ends the session.
    loop {
        match read_frame::<_, ClientMessage>(&mut reader).await {
            Ok(ClientMessage::DirectionChange {
                direction,
                client_time,
            }) => {
                debug!(
                    "session {}: direction {:?} (client time {})",
                    session_id, direction, client_time
                );
                world.write().await.set_direction(&identity, direction);
            }
            Ok(ClientMessage::Identity { .. }) => {
                // Repeated identity frames carry no meaning once joined.
            }
            Err(e) => {
                debug!("session {}: read ended: {}", session_id, e);
                break;
            }
        }
    }

    close_session(session_id, &sessions, &world).await;
}

/// Registers the requested name, substituting a randomized identity on
/// collision or an empty name. Never fails: the game stays joinable under
/// colliding names.
async fn register_player(world: &Arc<RwLock<World>>, requested: &str) -> String {
    let mut world = world.write().await;
    let mut rng = rand::thread_rng();

    let base = if requested.is_empty() { "player" } else { requested };
    let mut identity = if requested.is_empty() {
        format!("player{}", rng.gen_range(0..1000))
    } else {
        requested.to_string()
    };
    while world.add_player(&identity).is_err() {
        identity = format!("{}{}", base, rng.gen_range(0..1000));
    }
    identity
}

/// Writer half of a session: drains the outbound channel to the socket.
/// On write failure the receiver is dropped, which surfaces as a failed
/// send at the next broadcast and gets the session pruned.
async fn write_outbound(
    session_id: u64,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &message).await {
            debug!("session {}: write failed: {}", session_id, e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Coord, Direction};

    #[tokio::test]
    async fn test_frame_roundtrip_identity() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let msg = ClientMessage::Identity {
            name: "alice".to_string(),
        };
        write_frame(&mut client, &msg).await.unwrap();

        let received: ClientMessage = read_frame(&mut server).await.unwrap();
        match received {
            ClientMessage::Identity { name } => assert_eq!(name, "alice"),
            _ => panic!("Wrong message type"),
        }
    }

    #[tokio::test]
    async fn test_frame_roundtrip_direction_change() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let msg = ClientMessage::DirectionChange {
            direction: Direction::Down,
            client_time: 42,
        };
        write_frame(&mut client, &msg).await.unwrap();

        let received: ClientMessage = read_frame(&mut server).await.unwrap();
        match received {
            ClientMessage::DirectionChange {
                direction,
                client_time,
            } => {
                assert_eq!(direction, Direction::Down);
                assert_eq!(client_time, 42);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[tokio::test]
    async fn test_frame_roundtrip_snapshot() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let snapshot = Snapshot {
            width: 40,
            height: 30,
            apples: vec![Coord::new(1, 2)],
            snakes: vec![],
            server_time: 7,
        };
        write_frame(&mut server, &ServerMessage::Snapshot(snapshot.clone()))
            .await
            .unwrap();

        let ServerMessage::Snapshot(received) = read_frame(&mut client).await.unwrap();
        assert_eq!(received, snapshot);
    }

    #[tokio::test]
    async fn test_multiple_frames_in_sequence() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        for time in 0..3u64 {
            let msg = ClientMessage::DirectionChange {
                direction: Direction::Up,
                client_time: time,
            };
            write_frame(&mut client, &msg).await.unwrap();
        }

        for time in 0..3u64 {
            let received: ClientMessage = read_frame(&mut server).await.unwrap();
            match received {
                ClientMessage::DirectionChange { client_time, .. } => {
                    assert_eq!(client_time, time)
                }
                _ => panic!("Wrong message type"),
            }
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let bogus_len = (MAX_FRAME_LEN + 1).to_le_bytes();
        client.write_all(&bogus_len).await.unwrap();

        let result: io::Result<ClientMessage> = read_frame(&mut server).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_decode_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(&8u32.to_le_bytes()).await.unwrap();
        client.write_all(&[0xff; 8]).await.unwrap();

        let result: io::Result<ClientMessage> = read_frame(&mut server).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_register_player_substitutes_on_collision() {
        let world = Arc::new(RwLock::new(World::new(WorldConfig {
            width: 20,
            height: 20,
            apple_count: 0,
            snake_length: 4,
        })));

        let first = register_player(&world, "alice").await;
        assert_eq!(first, "alice");

        let second = register_player(&world, "alice").await;
        assert_ne!(second, "alice");
        assert!(second.starts_with("alice"));

        let snapshot = world.read().await.snapshot();
        assert!(snapshot.snake("alice").is_some());
        assert!(snapshot.snake(&second).is_some());
    }

    #[tokio::test]
    async fn test_register_player_empty_name_gets_fallback() {
        let world = Arc::new(RwLock::new(World::new(WorldConfig {
            width: 20,
            height: 20,
            apple_count: 0,
            snake_length: 4,
        })));

        let identity = register_player(&world, "").await;
        assert!(identity.starts_with("player"));
        assert!(world.read().await.snapshot().snake(&identity).is_some());
    }
}
