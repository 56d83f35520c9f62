//! The Reconciler (spec §4.7): debounces Change Bus bursts per network,
//! recomputes affected artifacts, pushes them via the Agent Hub. Runs on
//! its own thread, polling its subscription rather than blocking on
//! `recv()`, so a debounce window and a shutdown signal can both be
//! observed without a second thread per network.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use wgmesh_agent_hub::{AgentHub, DnsRecord, Payload};
use wgmesh_bus::{ChangeEvent, Subscription};
use wgmesh_compiler::{dns, policy, wg};
use wgmesh_store::Store;
use wgmesh_types::{ContentHash, NetworkId, PeerId, DEFAULT_DEBOUNCE_WINDOW_MS, MAX_RETRY_BACKOFF_SECS};

use crate::alert::{AlertKind, AlertSink, LoggingAlertSink};
use crate::scope::{self, CompileScope};

/// How long the poll loop sleeps between ticks when nothing is pending.
/// Well under the default debounce window so a window's close is observed
/// promptly without spinning.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Failed Store re-reads tolerated, per batch, before giving up and
/// alerting (spec §7: "after 5 failed retries").
const MAX_RETRIES: u32 = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ArtifactKind {
    Wg,
    Iptables,
    Dns,
}

pub struct ReconcilerConfig {
    pub debounce_window: Duration,
    pub max_retry_backoff: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(DEFAULT_DEBOUNCE_WINDOW_MS),
            max_retry_backoff: Duration::from_secs(MAX_RETRY_BACKOFF_SECS),
        }
    }
}

struct PendingBatch {
    events: Vec<ChangeEvent>,
    deadline: Instant,
}

pub struct Reconciler {
    store: Store,
    agent_hub: AgentHub,
    config: ReconcilerConfig,
    alert_sink: Arc<dyn AlertSink>,
    last_pushed: Mutex<HashMap<(NetworkId, PeerId, ArtifactKind), ContentHash>>,
}

impl Reconciler {
    pub fn new(store: Store, agent_hub: AgentHub) -> Arc<Self> {
        Self::with_config(store, agent_hub, ReconcilerConfig::default(), Arc::new(LoggingAlertSink))
    }

    pub fn with_config(store: Store, agent_hub: AgentHub, config: ReconcilerConfig, alert_sink: Arc<dyn AlertSink>) -> Arc<Self> {
        Arc::new(Self { store, agent_hub, config, alert_sink, last_pushed: Mutex::new(HashMap::new()) })
    }

    /// Spawns the debounce/compile loop on its own thread. The returned
    /// handle stops the loop: dropping it without calling `stop` leaks the
    /// thread, matching the worker-owns-its-resources model described for
    /// Agent Hub sessions in spec §5.
    pub fn run(self: Arc<Self>, subscription: Subscription) -> ReconcilerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let join = std::thread::spawn(move || self.poll_loop(subscription, thread_stop));
        ReconcilerHandle { stop, join: Some(join) }
    }

    fn poll_loop(&self, subscription: Subscription, stop: Arc<AtomicBool>) {
        let mut pending: HashMap<NetworkId, PendingBatch> = HashMap::new();

        loop {
            let shutting_down = stop.load(Ordering::Relaxed);

            while let Some(event) = subscription.try_recv() {
                let network_id = event.network_id();
                let deadline = Instant::now() + self.config.debounce_window;
                pending.entry(network_id).or_insert_with(|| PendingBatch { events: Vec::new(), deadline }).events.push(event);
                pending.get_mut(&network_id).unwrap().deadline = deadline;
            }

            let ready: Vec<NetworkId> = pending
                .iter()
                .filter(|(_, batch)| shutting_down || Instant::now() >= batch.deadline)
                .map(|(network_id, _)| *network_id)
                .collect();

            for network_id in ready {
                if let Some(batch) = pending.remove(&network_id) {
                    self.process_batch(network_id, batch.events);
                }
            }

            if shutting_down && pending.is_empty() {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn process_batch(&self, network_id: NetworkId, events: Vec<ChangeEvent>) {
        log::debug!("reconciler: debounce window closed for network {network_id}, {} events", events.len());

        let scope = match self.compute_scope_with_retry(network_id, &events) {
            Some(scope) => scope,
            None => return,
        };

        for peer in scope.all_peers.iter().filter(|p| p.use_agent && (scope.full_network || scope.affected_peers.contains(&p.id))) {
            self.recompile_peer(network_id, peer);
        }

        for jump in scope.all_peers.iter().filter(|p| p.is_jump) {
            let needs_recompile = self
                .store
                .read(|conn| scope::jump_peer_needs_recompile(conn, network_id, jump, &scope))
                .unwrap_or(false);
            if needs_recompile {
                self.recompile_jump_peer(network_id, jump);
            }
        }
    }

    /// Re-reads the Store for the affected-set computation, retrying
    /// transient failures with exponential backoff and jitter up to
    /// `MAX_RETRIES` before alerting (spec §7).
    fn compute_scope_with_retry(&self, network_id: NetworkId, events: &[ChangeEvent]) -> Option<CompileScope> {
        let mut attempt = 0;
        loop {
            match self.store.read(|conn| scope::compute(conn, network_id, events)) {
                Ok(scope) => return Some(scope),
                Err(e) if attempt + 1 >= MAX_RETRIES => {
                    self.alert_sink.alert(
                        network_id,
                        AlertKind::StoreRetriesExhausted,
                        &format!("giving up recomputing affected peer set after {MAX_RETRIES} attempts: {e}"),
                    );
                    return None;
                },
                Err(e) => {
                    let backoff = backoff_for(attempt, self.config.max_retry_backoff);
                    log::warn!("reconciler: store read failed ({e}), retrying network {network_id} in {backoff:?}");
                    std::thread::sleep(backoff);
                    attempt += 1;
                },
            }
        }
    }

    /// Compiles `peer`'s WireGuard config and pushes it if its content
    /// hash changed (spec §4.7 step 2). A compile error aborts only this
    /// peer (spec §7 "compile errors abort that peer/jump peer only").
    fn recompile_peer(&self, network_id: NetworkId, peer: &wgmesh_types::Peer) {
        match wg::compile(&self.store, network_id, peer.id, &wg::CompileOptions::default()) {
            Ok(config_text) => {
                self.push_if_changed(network_id, peer.id, ArtifactKind::Wg, &peer.token, Payload::ApplyWireGuardConfig { config_text });
            },
            Err(e) => log::warn!("reconciler: wg compile failed for peer {} ({}): {e}", peer.id, peer.name),
        }
    }

    fn recompile_jump_peer(&self, network_id: NetworkId, jump: &wgmesh_types::Peer) {
        match policy::compile(&self.store, network_id, jump.id) {
            Ok(rules) => self.push_if_changed(network_id, jump.id, ArtifactKind::Iptables, &jump.token, Payload::ApplyIpTables { rules }),
            Err(e) => log::warn!("reconciler: policy compile failed for jump peer {} ({}): {e}", jump.id, jump.name),
        }

        match dns::compile(&self.store, network_id, jump.id) {
            Ok(records) => {
                let records = records.into_iter().map(|r| DnsRecord { name: r.name, ip: r.ip, fqdn: r.fqdn }).collect();
                self.push_if_changed(network_id, jump.id, ArtifactKind::Dns, &jump.token, Payload::ApplyDnsRecords { records });
            },
            Err(e) => log::warn!("reconciler: dns compile failed for jump peer {} ({}): {e}", jump.id, jump.name),
        }
    }

    fn push_if_changed(&self, network_id: NetworkId, peer_id: PeerId, kind: ArtifactKind, token: &str, payload: Payload) {
        let hash = payload.content_hash();
        let mut cache = self.last_pushed.lock();
        if cache.get(&(network_id, peer_id, kind)) == Some(&hash) {
            log::debug!("reconciler: {kind:?} artifact unchanged for peer {peer_id}, skipping push");
            return;
        }
        cache.insert((network_id, peer_id, kind), hash);
        drop(cache);

        let seq = self.agent_hub.enqueue(token, payload);
        log::info!("reconciler: enqueued {kind:?} artifact (seq {seq}) for peer {peer_id}");
    }
}

fn backoff_for(attempt: u32, ceiling: Duration) -> Duration {
    let millis = 100u64.saturating_mul(1u64 << attempt.min(16));
    let jitter = (millis / 4).max(1);
    let jittered = millis + (fastrand_like(attempt) % jitter);
    Duration::from_millis(jittered).min(ceiling)
}

/// A tiny deterministic jitter source. Good enough to avoid a thundering
/// herd of synchronized retries without pulling in a `rand` dependency the
/// Reconciler otherwise has no use for.
fn fastrand_like(seed: u32) -> u64 {
    let mut x = (seed as u64).wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1);
    x ^= x >> 33;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 29;
    x
}

pub struct ReconcilerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ReconcilerHandle {
    /// Signals shutdown and blocks until the loop drains its pending
    /// batches and exits (spec §5: "Reconciler debounce windows are
    /// cancellable, collapsing to immediate compile on shutdown").
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ReconcilerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
