//! Discovery poller.
//!
//! A fixed run goes through four phases:
//! 1. fetch the peer set (waiting out an empty directory),
//! 2. connect to every peer, retrying the unreachable ones,
//! 3. poll all connected peers for a fixed number of cycles,
//! 4. summarize: the run succeeds only if every probe validated.
//!
//! A probe reads the two address registers, decodes them as an IPv4 address
//! and compares it with the address that was dialed.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_modbus::client::{Client, Context, Reader};
use tokio_modbus::prelude::*;
use tracing::{debug, error, info, warn};

use modlink_common::{
    ADDRESS_ORDER, ADDRESS_REGISTER, ADDRESS_REGISTER_COUNT, decode_u32_from_slice,
};

use crate::config::MonitorServiceConfig;
use crate::directory::DirectoryError;
use crate::peers::{PeerSnapshot, PeerSource};

/// Why a probe produced no address.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Read failed: {0}")]
    Transport(String),

    #[error("Exception response: {0:?}")]
    Exception(ExceptionCode),

    #[error("Expected 2 registers, got {0}")]
    ShortResponse(usize),
}

/// Outcome of probing one peer once.
#[derive(Debug)]
pub enum ProbeOutcome {
    /// Advertised address equals the dialed one
    Valid(Ipv4Addr),
    /// Peer advertised a different address
    Mismatch(Ipv4Addr),
    /// Connect or read failed
    Failed(ProbeError),
    /// Peer never connected during the connect phase
    Unreachable,
}

/// One peer's result for one cycle.
#[derive(Debug)]
pub struct PollResult {
    pub peer: SocketAddr,
    pub outcome: ProbeOutcome,
}

impl PollResult {
    /// Compare a probe's decoded address with the dialed peer.
    fn check(peer: SocketAddr, probe: Result<Ipv4Addr, ProbeError>) -> Self {
        let outcome = match probe {
            Ok(advertised) if IpAddr::V4(advertised) == peer.ip() => {
                ProbeOutcome::Valid(advertised)
            }
            Ok(advertised) => ProbeOutcome::Mismatch(advertised),
            Err(e) => ProbeOutcome::Failed(e),
        };
        Self { peer, outcome }
    }

    pub fn connected(&self) -> bool {
        !matches!(
            self.outcome,
            ProbeOutcome::Unreachable | ProbeOutcome::Failed(ProbeError::Connect(_))
        )
    }

    /// Address read from the peer, if any.
    pub fn decoded(&self) -> Option<Ipv4Addr> {
        match self.outcome {
            ProbeOutcome::Valid(addr) | ProbeOutcome::Mismatch(addr) => Some(addr),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::Valid(_))
    }

    fn log(&self) {
        let peer = self.peer;
        match &self.outcome {
            ProbeOutcome::Valid(addr) => debug!(%peer, advertised = %addr, "Valid response"),
            ProbeOutcome::Mismatch(addr) => error!(
                %peer,
                advertised = %addr,
                "Invalid response, advertised address does not match the dialed one"
            ),
            ProbeOutcome::Failed(e) => error!(%peer, error = %e, "Probe failed"),
            ProbeOutcome::Unreachable => {
                error!(%peer, "Peer never connected, probe counted as failed")
            }
        }
    }
}

/// Read the advertised address from a connected peer.
pub async fn probe_peer(ctx: &mut Context, timeout: Duration) -> Result<Ipv4Addr, ProbeError> {
    let words = tokio::time::timeout(
        timeout,
        ctx.read_holding_registers(ADDRESS_REGISTER, ADDRESS_REGISTER_COUNT),
    )
    .await
    .map_err(|_| ProbeError::Timeout(timeout))?
    .map_err(|e| ProbeError::Transport(e.to_string()))?
    .map_err(ProbeError::Exception)?;

    decode_u32_from_slice(&words, ADDRESS_ORDER)
        .map(Ipv4Addr::from)
        .ok_or(ProbeError::ShortResponse(words.len()))
}

async fn connect(peer: SocketAddr, unit_id: u8, timeout: Duration) -> Result<Context, ProbeError> {
    tokio::time::timeout(timeout, tcp::connect_slave(peer, Slave(unit_id)))
        .await
        .map_err(|_| ProbeError::Connect("connection timeout".to_string()))?
        .map_err(|e| ProbeError::Connect(e.to_string()))
}

/// Probe counts for a single peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTally {
    pub peer: SocketAddr,
    pub probes: u64,
    pub valid: u64,
}

#[derive(Debug, Default)]
struct Totals {
    probes: u64,
    valid: u64,
    peers: BTreeMap<SocketAddr, (u64, u64)>,
}

/// Probe counters shared by the probe tasks of a run.
///
/// Aggregate and per-peer counts are updated under one lock.
#[derive(Debug, Default)]
pub struct RunStats {
    totals: Mutex<Totals>,
}

impl RunStats {
    /// Counters with a zeroed tally for every peer.
    pub fn new(peers: &[SocketAddr]) -> Self {
        let totals = Totals {
            peers: peers.iter().map(|peer| (*peer, (0, 0))).collect(),
            ..Default::default()
        };
        Self {
            totals: Mutex::new(totals),
        }
    }

    pub fn record(&self, result: &PollResult) {
        let valid = u64::from(result.is_valid());
        let mut totals = self.totals.lock();
        totals.probes += 1;
        totals.valid += valid;
        let tally = totals.peers.entry(result.peer).or_default();
        tally.0 += 1;
        tally.1 += valid;
    }

    pub fn summary(&self, cycles: u32) -> RunSummary {
        let totals = self.totals.lock();
        RunSummary {
            cycles,
            probes: totals.probes,
            valid: totals.valid,
            peers: totals
                .peers
                .iter()
                .map(|(peer, (probes, valid))| PeerTally {
                    peer: *peer,
                    probes: *probes,
                    valid: *valid,
                })
                .collect(),
        }
    }
}

/// Result of a fixed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u32,
    pub probes: u64,
    pub valid: u64,
    /// Per-peer counts, ordered by peer address
    pub peers: Vec<PeerTally>,
}

impl RunSummary {
    /// Every probe across every peer validated.
    pub fn success(&self) -> bool {
        self.probes > 0 && self.valid == self.probes
    }

    pub fn invalid(&self) -> u64 {
        self.probes - self.valid
    }

    pub fn tally(&self, peer: SocketAddr) -> Option<&PeerTally> {
        self.peers.iter().find(|t| t.peer == peer)
    }

    /// Emit the final verdict line.
    pub fn log_verdict(&self) {
        for tally in &self.peers {
            debug!(
                peer = %tally.peer,
                probes = tally.probes,
                valid = tally.valid,
                "Peer tally"
            );
        }

        if self.success() {
            info!("SUCCESSFUL - all {} probes have been valid", self.probes);
        } else {
            error!(
                invalid = self.invalid(),
                "FAILED - {}/{} probes have been valid", self.valid, self.probes
            );
        }
    }
}

/// Timing and retry settings of the poller.
#[derive(Debug, Clone, Copy)]
pub struct PollPlan {
    /// Cycles in a fixed run
    pub cycles: u32,
    /// Delay between cycles
    pub interval: Duration,
    pub unit_id: u8,
    pub probe_timeout: Duration,
    pub connect_timeout: Duration,
    /// Delay between connect rounds
    pub connect_retry: Duration,
    /// Connect rounds before giving up on unreachable peers; `None` waits forever
    pub max_connect_attempts: Option<u32>,
}

impl Default for PollPlan {
    fn default() -> Self {
        Self {
            cycles: 10,
            interval: Duration::from_secs(5),
            unit_id: 0,
            probe_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            connect_retry: Duration::from_secs(10),
            max_connect_attempts: Some(30),
        }
    }
}

impl PollPlan {
    pub fn from_config(config: &MonitorServiceConfig) -> Self {
        Self {
            cycles: config.run.probe_count,
            interval: Duration::from_secs(config.run.interval_secs),
            unit_id: config.probe.unit_id,
            probe_timeout: config.probe.timeout(),
            connect_timeout: Duration::from_millis(config.connect.timeout_ms),
            connect_retry: Duration::from_secs(config.connect.retry_interval_secs),
            max_connect_attempts: config.connect.max_attempts,
        }
    }
}

/// Modbus TCP connection to a peer, kept open across cycles.
///
/// The slot is emptied when a read times out or the transport fails, so a
/// late reply is never taken as the answer to the next request.
#[derive(Clone)]
pub struct PeerConnection {
    pub peer: SocketAddr,
    ctx: Arc<tokio::sync::Mutex<Option<Context>>>,
}

impl PeerConnection {
    fn new(peer: SocketAddr, ctx: Context) -> Self {
        Self {
            peer,
            ctx: Arc::new(tokio::sync::Mutex::new(Some(ctx))),
        }
    }

    /// Read the advertised address, dialing a new connection if the last one was dropped.
    async fn read_address(&self, plan: &PollPlan) -> Result<Ipv4Addr, ProbeError> {
        let mut slot = self.ctx.lock().await;
        let ctx = match slot.take() {
            Some(ctx) => ctx,
            None => {
                debug!(peer = %self.peer, "Reconnecting");
                connect(self.peer, plan.unit_id, plan.connect_timeout).await?
            }
        };
        let ctx = slot.insert(ctx);

        let result = probe_peer(ctx, plan.probe_timeout).await;
        if matches!(result, Err(ProbeError::Timeout(_) | ProbeError::Transport(_))) {
            warn!(peer = %self.peer, "Dropping connection, the peer is re-dialed next cycle");
            *slot = None;
        }
        result
    }

    async fn disconnect(&self) {
        let Some(mut ctx) = self.ctx.lock().await.take() else {
            return;
        };
        if let Err(e) = ctx.disconnect().await {
            debug!(peer = %self.peer, error = %e, "Disconnect failed");
        }
    }
}

/// Outcome of the connect phase.
#[derive(Default)]
pub struct ConnectedPeers {
    pub connections: Vec<PeerConnection>,
    /// Peers still unreachable when the connect phase ended
    pub unreachable: Vec<SocketAddr>,
}

/// Probes a peer set and validates the advertised addresses.
pub struct DiscoveryPoller {
    source: PeerSource,
    plan: PollPlan,
}

impl DiscoveryPoller {
    pub fn new(source: PeerSource, plan: PollPlan) -> Self {
        Self { source, plan }
    }

    pub fn plan(&self) -> &PollPlan {
        &self.plan
    }

    /// Take the peer snapshot for a run.
    ///
    /// In directory mode this does not return until the directory lists at
    /// least one gateway.
    pub async fn fetch_peers(&self) -> Result<PeerSnapshot, DirectoryError> {
        let peers = self.source.wait_for_peers().await?;
        info!(count = peers.len(), "Fetched peer set");
        Ok(peers)
    }

    /// Connect to every peer.
    ///
    /// Unreachable peers are retried every `connect_retry`. With a bound on
    /// the attempts, peers still unreachable afterwards are reported in
    /// [`ConnectedPeers::unreachable`].
    pub async fn connect_all(&self, peers: &[SocketAddr]) -> ConnectedPeers {
        let mut connected = ConnectedPeers::default();
        let mut pending: Vec<SocketAddr> = peers.to_vec();
        let mut attempt = 0u32;

        while !pending.is_empty() {
            attempt += 1;

            let mut tasks = JoinSet::new();
            for peer in pending.drain(..) {
                let plan = self.plan;
                tasks.spawn(async move {
                    (peer, connect(peer, plan.unit_id, plan.connect_timeout).await)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((peer, Ok(ctx))) => {
                        info!(%peer, attempt, "Connected");
                        connected.connections.push(PeerConnection::new(peer, ctx));
                    }
                    Ok((peer, Err(e))) => {
                        warn!(%peer, attempt, error = %e, "Cannot connect");
                        pending.push(peer);
                    }
                    Err(e) => error!(error = %e, "Connect task failed"),
                }
            }

            if pending.is_empty() {
                break;
            }

            if self
                .plan
                .max_connect_attempts
                .is_some_and(|max| attempt >= max)
            {
                error!(
                    unreachable = pending.len(),
                    attempts = attempt,
                    "Giving up on unreachable peers, polling the connected subset"
                );
                break;
            }

            info!(
                pending = pending.len(),
                retry_in = ?self.plan.connect_retry,
                "Waiting for all peers to be connected"
            );
            tokio::time::sleep(self.plan.connect_retry).await;
        }

        pending.sort();
        connected.unreachable = pending;
        connected
    }

    /// Probe every connected peer once.
    ///
    /// Unreachable peers count as failed probes. One peer failing never
    /// affects the others.
    pub async fn poll_cycle(
        &self,
        peers: &ConnectedPeers,
        stats: &Arc<RunStats>,
    ) -> Vec<PollResult> {
        let mut results = Vec::with_capacity(peers.connections.len() + peers.unreachable.len());

        let mut tasks = JoinSet::new();
        for connection in &peers.connections {
            let connection = connection.clone();
            let stats = Arc::clone(stats);
            let plan = self.plan;
            tasks.spawn(async move {
                let probe = connection.read_address(&plan).await;
                let result = PollResult::check(connection.peer, probe);
                result.log();
                stats.record(&result);
                result
            });
        }

        for peer in &peers.unreachable {
            let result = PollResult {
                peer: *peer,
                outcome: ProbeOutcome::Unreachable,
            };
            result.log();
            stats.record(&result);
            results.push(result);
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Probe task failed"),
            }
        }

        results
    }

    /// Fixed run: fetch, connect, poll `cycles` times, summarize.
    pub async fn run(&self) -> Result<RunSummary, DirectoryError> {
        let peers = self.fetch_peers().await?;
        let connected = self.connect_all(&peers).await;
        info!(
            connected = connected.connections.len(),
            unreachable = connected.unreachable.len(),
            cycles = self.plan.cycles,
            "Starting probes"
        );

        let stats = Arc::new(RunStats::new(&peers));
        for cycle in 1..=self.plan.cycles {
            let results = self.poll_cycle(&connected, &stats).await;
            let valid = results.iter().filter(|r| r.is_valid()).count();
            debug!(cycle, valid, probes = results.len(), "Cycle complete");

            if cycle < self.plan.cycles {
                tokio::time::sleep(self.plan.interval).await;
            }
        }

        for connection in &connected.connections {
            connection.disconnect().await;
        }

        let summary = stats.summary(self.plan.cycles);
        summary.log_verdict();
        Ok(summary)
    }

    /// One monitoring sweep over a fresh peer snapshot.
    ///
    /// Each peer is connected once, probed, and disconnected; unreachable
    /// peers are reported as failed without retry.
    pub async fn sweep(&self) -> Result<Vec<PollResult>, DirectoryError> {
        let peers = self.source.snapshot().await?;
        if peers.is_empty() {
            warn!("No peers to sweep");
            return Ok(Vec::new());
        }

        let mut tasks = JoinSet::new();
        for peer in peers.iter().copied() {
            let plan = self.plan;
            tasks.spawn(sweep_peer(peer, plan));
        }

        let mut results = Vec::with_capacity(peers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Sweep task failed"),
            }
        }

        let valid = results.iter().filter(|r| r.is_valid()).count();
        info!(peers = results.len(), valid, "Sweep complete");
        Ok(results)
    }
}

async fn sweep_peer(peer: SocketAddr, plan: PollPlan) -> PollResult {
    let mut ctx = match connect(peer, plan.unit_id, plan.connect_timeout).await {
        Ok(ctx) => ctx,
        Err(e) => {
            let result = PollResult::check(peer, Err(e));
            result.log();
            return result;
        }
    };

    let result = PollResult::check(peer, probe_peer(&mut ctx, plan.probe_timeout).await);
    match result.decoded() {
        Some(advertised) if result.is_valid() => {
            info!(%peer, %advertised, "Value retrieved");
        }
        _ => result.log(),
    }

    if let Err(e) = ctx.disconnect().await {
        debug!(%peer, error = %e, "Disconnect failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(text: &str) -> SocketAddr {
        text.parse().unwrap()
    }

    #[test]
    fn test_check_compares_dialed_address() {
        let dialed = peer("10.8.0.2:5020");

        let result = PollResult::check(dialed, Ok(Ipv4Addr::new(10, 8, 0, 2)));
        assert!(result.is_valid());
        assert!(result.connected());

        let result = PollResult::check(dialed, Ok(Ipv4Addr::new(10, 8, 0, 3)));
        assert!(!result.is_valid());
        assert_eq!(result.decoded(), Some(Ipv4Addr::new(10, 8, 0, 3)));

        let result = PollResult::check(
            dialed,
            Err(ProbeError::Exception(ExceptionCode::ServerDeviceBusy)),
        );
        assert!(!result.is_valid());
        assert!(result.connected());
        assert_eq!(result.decoded(), None);

        let result = PollResult::check(dialed, Err(ProbeError::Connect("refused".into())));
        assert!(!result.connected());
    }

    #[test]
    fn test_stats_record_per_peer() {
        let a = peer("10.0.0.1:5020");
        let b = peer("10.0.0.2:5020");
        let stats = RunStats::new(&[a, b]);

        stats.record(&PollResult::check(a, Ok(Ipv4Addr::new(10, 0, 0, 1))));
        stats.record(&PollResult::check(a, Ok(Ipv4Addr::new(10, 0, 0, 1))));
        stats.record(&PollResult {
            peer: b,
            outcome: ProbeOutcome::Unreachable,
        });

        let summary = stats.summary(2);
        assert_eq!(summary.probes, 3);
        assert_eq!(summary.valid, 2);
        assert_eq!(summary.invalid(), 1);
        assert!(!summary.success());
        assert_eq!(
            summary.tally(a),
            Some(&PeerTally {
                peer: a,
                probes: 2,
                valid: 2
            })
        );
        assert_eq!(summary.tally(b).unwrap().valid, 0);
    }

    #[test]
    fn test_empty_run_is_not_success() {
        let summary = RunStats::default().summary(0);
        assert!(!summary.success());
    }

    #[test]
    fn test_plan_from_config() {
        let config = MonitorServiceConfig::default();
        let plan = PollPlan::from_config(&config);
        assert_eq!(plan.cycles, 10);
        assert_eq!(plan.interval, Duration::from_secs(5));
        assert_eq!(plan.connect_retry, Duration::from_secs(10));
        assert_eq!(plan.max_connect_attempts, Some(30));
    }
}
