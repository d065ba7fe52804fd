//! Discovery worker body.
//!
//! Polls each selected protocol's `scan()` until the deadline passes or
//! the worker is cancelled. The set of protocols is re-read every poll, so
//! a protocol unregistered mid-scan just stops contributing. A node id is
//! reported at most once per discovery, by the first protocol that sees it.

use core::time::Duration;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, info, warn};

use super::{ALL_PROTOCOLS, Inner, NodeInfo, NodeStatus};
use crate::adapters::time::epoch_millis;
use crate::app::ports::WirelessProtocol;
use crate::drivers::worker::{CancelToken, lock};

/// Clears the manager's running flag when the worker body exits, including
/// by unwinding out of a panicking callback.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(super) fn run(inner: &Inner, filter: &str, timeout: Duration, token: &CancelToken) {
    let _running = RunningGuard(&inner.running);
    info!("Discovery: started (filter={}, timeout={}ms)", filter, timeout.as_millis());
    let deadline = Instant::now() + timeout;
    let mut seen = BTreeSet::new();
    let mut scans = 0u32;

    while !token.is_cancelled() {
        for (name, protocol) in selected(inner, filter) {
            if token.is_cancelled() {
                break;
            }
            scan_protocol(inner, &name, protocol.as_ref(), &mut seen);
        }
        scans += 1;

        let now = Instant::now();
        if now >= deadline || !token.sleep(inner.poll_interval.min(deadline - now)) {
            break;
        }
    }

    info!(
        "Discovery: finished after {} scan(s), {} node(s)",
        scans,
        seen.len()
    );
}

/// Snapshot of the protocols this poll should query, in registration order.
fn selected(inner: &Inner, filter: &str) -> Vec<(String, Arc<dyn WirelessProtocol>)> {
    lock(&inner.protocols)
        .iter()
        .filter(|(name, _)| filter == ALL_PROTOCOLS || name == filter)
        .map(|(name, p)| (name.clone(), Arc::clone(p)))
        .collect()
}

fn scan_protocol(
    inner: &Inner,
    name: &str,
    protocol: &dyn WirelessProtocol,
    seen: &mut BTreeSet<String>,
) {
    let peers = match protocol.scan() {
        Ok(peers) => peers,
        Err(e) => {
            warn!("Discovery: scan on '{}' failed: {}", name, e);
            return;
        }
    };

    for peer in peers {
        if !seen.insert(peer.node_id.clone()) {
            continue;
        }
        let node = absorb(inner, peer, name);
        let cb = lock(&inner.callbacks).discovery.clone();
        if let Some(cb) = cb {
            cb(&node);
        }
    }
}

/// Record a sighting. Unknown peers are registered as [`NodeStatus::Unknown`]
/// under the protocol that found them; known ones get fresh RSSI and
/// `last_seen` but keep their status.
fn absorb(inner: &Inner, peer: NodeInfo, protocol: &str) -> NodeInfo {
    let now = epoch_millis();
    let mut nodes = lock(&inner.nodes);
    if let Some(known) = nodes.get_mut(&peer.node_id) {
        known.rssi = peer.rssi;
        known.last_seen_ms = now;
        if known.mac_address.is_empty() {
            known.mac_address = peer.mac_address;
        }
        debug!("Discovery: refreshed '{}' (rssi={})", known.node_id, known.rssi);
        return known.clone();
    }

    let node = NodeInfo {
        protocol: protocol.into(),
        status: NodeStatus::Unknown,
        last_seen_ms: now,
        ..peer
    };
    info!(
        "Discovery: new node '{}' via {} (rssi={})",
        node.node_id, protocol, node.rssi
    );
    nodes.insert(node.node_id.clone(), node.clone());
    node
}
