//! The real agent transport (spec §6): a persistent bidirectional framed
//! channel per agent, newline-delimited JSON in both directions. Grounded
//! on `server`'s `hyper`-per-connection model, swapped for the protocol
//! this system actually speaks - a long-lived session rather than
//! request/response - so plain `tokio::net::TcpListener` plus one task per
//! connection fits better than an HTTP server framework.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use wgmesh_agent_hub::{AgentHub, AgentMessage, ServerMessage, Welcome};
use wgmesh_bus::ChangeEvent;
use wgmesh_store::{db, Store};
use wgmesh_types::{NetworkId, SEND_DEADLINE_SECS};

/// How often a connection task checks the Agent Hub for newly queued
/// artifacts. Comfortably under the default debounce window so a
/// recompile reaches a connected agent promptly.
const DELIVERY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Accepts connections forever, spawning one task per agent. Returns only
/// on a listener error. `heartbeat_interval` mirrors the cadence the Agent
/// Hub expects agents to check in at - configurable so an operator can
/// tighten it on a high-churn network without rebuilding.
pub async fn serve(listener: TcpListener, store: Store, hub: AgentHub, heartbeat_interval: Duration) -> anyhow::Result<()> {
    loop {
        let (socket, addr) = listener.accept().await?;
        let store = store.clone();
        let hub = hub.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, store, hub, heartbeat_interval).await {
                log::warn!("agent connection from {addr} ended with error: {e}");
            }
        });
    }
}

async fn write_frame<T: serde::Serialize>(writer: &mut (impl AsyncWriteExt + Unpin), frame: &T) -> anyhow::Result<()> {
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Delivers one queued artifact under the hard send deadline (spec §5:
/// "Agent Hub `send` never blocks past a hard deadline - on timeout the
/// message is dropped from the queue's tail and a `resync` is scheduled
/// for that agent"). A genuine write error still propagates; only the
/// timeout is absorbed here, since a stalled socket isn't fatal to the
/// connection task by itself - the next heartbeat tick is what actually
/// notices and closes it.
async fn deliver(
    writer: &mut (impl AsyncWriteExt + Unpin),
    hub: &AgentHub,
    store: &Store,
    token: &str,
    network_id: NetworkId,
    message: &ServerMessage,
) -> anyhow::Result<()> {
    let seq = message.seq();
    match tokio::time::timeout(Duration::from_secs(SEND_DEADLINE_SECS), write_frame(writer, message)).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("agent send exceeded {SEND_DEADLINE_SECS}s deadline at seq {seq}; dropping queue tail and scheduling resync");
            hub.drop_through(token, seq);
            store.change_bus().publish(ChangeEvent::Resync(network_id));
            Ok(())
        },
    }
}

async fn handle_connection(socket: TcpStream, store: Store, hub: AgentHub, heartbeat_interval: Duration) -> anyhow::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();

    let first_line = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(()),
    };
    let (token, last_applied_seq) = match serde_json::from_str::<AgentMessage>(&first_line) {
        Ok(AgentMessage::Hello { token, last_applied_seq, .. }) => (token, last_applied_seq),
        _ => {
            write_frame(&mut writer, &Welcome::Unauthorized).await?;
            return Ok(());
        },
    };

    let peer = match store.read(|conn| db::peer::get_by_token(conn, &token)) {
        Ok(peer) => peer,
        Err(e) => {
            log::warn!("unauthorized agent connection (unknown token): {e}");
            write_frame(&mut writer, &Welcome::Unauthorized).await?;
            return Ok(());
        },
    };

    let outcome = hub.connect(&token);
    if outcome.resync {
        store.change_bus().publish(ChangeEvent::Resync(peer.network_id));
    }
    log::info!("agent hello from peer {} ({}), session {}", peer.id, peer.name, outcome.session_id);
    write_frame(&mut writer, &Welcome::Welcome { session_id: outcome.session_id, last_seq: outcome.last_seq }).await?;
    hub.record_activity(&token);

    // Spec §6: "the server replays any unacked messages with seq >
    // last_applied_seq" - the resume floor must be what the agent itself
    // reports as applied, not `outcome.last_seq` (the server's own
    // last-assigned sequence number), which would silently skip a
    // still-queued, never-applied tail message on every reconnect.
    let mut last_sent_seq = last_applied_seq;
    let mut delivery_ticker = tokio::time::interval(DELIVERY_POLL_INTERVAL);
    let mut heartbeat_ticker = tokio::time::interval(heartbeat_interval);
    let mut ping_seq: u64 = 0;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(text) => {
                        if let Some(reported) = handle_inbound_frame(&hub, &token, &text) {
                            last_sent_seq = Some(last_sent_seq.map_or(reported, |s| s.max(reported)));
                        }
                    },
                    None => {
                        log::info!("agent {} ({}) disconnected", peer.id, peer.name);
                        return Ok(());
                    },
                }
            },
            _ = delivery_ticker.tick() => {
                for message in hub.pending_since(&token, last_sent_seq) {
                    last_sent_seq = Some(last_sent_seq.map_or(message.seq(), |s| s.max(message.seq())));
                    deliver(&mut writer, &hub, &store, &token, peer.network_id, &message).await?;
                }
            },
            _ = heartbeat_ticker.tick() => {
                if hub.missed_heartbeat(&token) {
                    log::info!("agent {} ({}) closed after missed heartbeats", peer.id, peer.name);
                    return Ok(());
                }
                let ts = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs();
                ping_seq += 1;
                write_frame(&mut writer, &ServerMessage::Ping { seq: ping_seq, ts }).await?;
            },
        }
    }
}

/// Handles one inbound agent frame, returning the `last_applied_seq` a
/// `Hello` frame reported, if any - a heartbeat `hello` re-reports it the
/// same way the opening handshake does (spec §6), so the resume floor
/// stays current across the life of the connection, not just at connect.
fn handle_inbound_frame(hub: &AgentHub, token: &str, text: &str) -> Option<u64> {
    let message: AgentMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            log::warn!("discarding malformed agent frame: {e}");
            return None;
        },
    };
    match message {
        AgentMessage::Ack { seq } => {
            hub.ack(token, seq);
            None
        },
        AgentMessage::Pong { .. } => {
            hub.record_activity(token);
            None
        },
        AgentMessage::Hello { last_applied_seq, .. } => {
            hub.record_activity(token);
            last_applied_seq
        },
    }
}
