//! Lossy network relay for testing.
//!
//! Real networks drop and corrupt datagrams.  To exercise the reliability
//! mechanisms without depending on actual network conditions, [`Relay`] sits
//! between sender and receiver on loopback and forwards datagrams both ways,
//! applying a fault model on the way:
//!
//! | Fault        | Description                                         |
//! |--------------|-----------------------------------------------------|
//! | Scripted     | Drop the n-th datagram in a given direction.        |
//! | Random loss  | Drop a datagram with probability `loss_rate`.       |
//! | Corruption   | Flip one random bit with probability `corrupt_rate`.|
//!
//! The relay never reorders or duplicates.  Random faults come from a seeded
//! RNG, so a failing run can be replayed with the same seed.
//!
//! With [`RelayConfig::with_recording`] every datagram is also kept in a
//! [`TrafficLog`] for inspection.  Recording is off by default, since the log
//! holds every byte relayed.
//!
//! The sender talks to the relay as if it were the receiver; the receiver
//! sees the relay as the sender.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::segment::Segment;
use crate::socket::is_transient;

const MAX_DATAGRAM: usize = 65_535;

/// Which way a datagram travels through the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sender → receiver (DATA).
    Forward,
    /// Receiver → sender (ACK).
    Backward,
}

/// What the relay did with a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Delivered,
    Dropped,
    Corrupted,
}

/// One datagram seen by the relay, as it arrived (before any corruption).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    /// When the relay received it.
    pub at: Instant,
    pub direction: Direction,
    pub fate: Fate,
    pub bytes: Vec<u8>,
}

/// Fault model for a [`Relay`].
///
/// Probabilities are in `[0.0, 1.0]`.  Scripted drops are 0-based indices
/// counted separately per direction.
#[derive(Debug, Clone, Default)]
pub struct RelayConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    pub seed: u64,
    pub drop_forward: HashSet<usize>,
    pub drop_backward: HashSet<usize>,
    /// Keep a [`TrafficLog`] of every datagram.
    pub record: bool,
}

impl RelayConfig {
    /// A fault-free relay.
    pub fn transparent() -> Self {
        Self::default()
    }

    pub fn with_loss(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate;
        self
    }

    pub fn with_corruption(mut self, corrupt_rate: f64) -> Self {
        self.corrupt_rate = corrupt_rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_recording(mut self) -> Self {
        self.record = true;
        self
    }

    /// Drop the `index`-th datagram travelling in `direction`.
    pub fn drop_nth(mut self, direction: Direction, index: usize) -> Self {
        match direction {
            Direction::Forward => self.drop_forward.insert(index),
            Direction::Backward => self.drop_backward.insert(index),
        };
        self
    }

    fn validate(&self) -> io::Result<()> {
        for (what, p) in [("loss", self.loss_rate), ("corruption", self.corrupt_rate)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{what} rate {p} is not a probability"),
                ));
            }
        }
        Ok(())
    }
}

/// Shared record of everything that passed through a relay.
#[derive(Debug, Clone, Default)]
pub struct TrafficLog(Arc<Mutex<Vec<Observed>>>);

impl TrafficLog {
    fn lock(&self) -> MutexGuard<'_, Vec<Observed>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, observed: Observed) {
        self.lock().push(observed);
    }

    pub fn snapshot(&self) -> Vec<Observed> {
        self.lock().clone()
    }

    /// Segments that arrived at the relay in `direction`, whatever their fate.
    pub fn segments(&self, direction: Direction) -> Vec<(Segment, Fate)> {
        self.lock()
            .iter()
            .filter(|o| o.direction == direction)
            .filter_map(|o| Segment::decode(&o.bytes).ok().map(|s| (s, o.fate)))
            .collect()
    }
}

/// A fault-injecting UDP relay.
pub struct Relay {
    socket: UdpSocket,
    target: SocketAddr,
    config: RelayConfig,
    rng: StdRng,
    client: Option<SocketAddr>,
    forward_seen: usize,
    backward_seen: usize,
    log: TrafficLog,
}

impl Relay {
    /// Bind the relay on `local` and forward to `target`.
    pub async fn bind(local: SocketAddr, target: SocketAddr, config: RelayConfig) -> io::Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(local).await?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            socket,
            target,
            config,
            rng,
            client: None,
            forward_seen: 0,
            backward_seen: 0,
            log: TrafficLog::default(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn traffic(&self) -> TrafficLog {
        self.log.clone()
    }

    /// Relay datagrams until an I/O error occurs.
    pub async fn run(mut self) -> io::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (n, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) if is_transient(&e) => {
                    log::debug!("[relay] transient receive error: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let at = Instant::now();
            let (direction, dest) = if from == self.target {
                match self.client {
                    Some(client) => (Direction::Backward, client),
                    None => {
                        log::debug!("[relay] reply from {from} before any client; dropped");
                        continue;
                    }
                }
            } else {
                self.client = Some(from);
                (Direction::Forward, self.target)
            };

            let mut bytes = buf[..n].to_vec();
            let fate = self.decide(direction, &mut bytes);
            if self.config.record {
                self.log.push(Observed {
                    at,
                    direction,
                    fate,
                    bytes: buf[..n].to_vec(),
                });
            }

            if let Ok(seg) = Segment::decode(&buf[..n]) {
                log::debug!(
                    "[relay] {direction:?} {} seq={} len={} → {fate:?}",
                    seg.kind,
                    seg.seq,
                    seg.payload_len()
                );
            }

            if fate != Fate::Dropped {
                if let Err(e) = self.socket.send_to(&bytes, dest).await {
                    if !is_transient(&e) {
                        return Err(e);
                    }
                    log::debug!("[relay] transient send error to {dest}: {e}");
                }
            }
        }
    }

    /// Spawn [`Relay::run`] on the current runtime.
    pub fn spawn(self) -> io::Result<RelayHandle> {
        let addr = self.local_addr()?;
        let traffic = self.traffic();
        let task = tokio::spawn(async move {
            if let Err(e) = self.run().await {
                log::warn!("[relay] stopped: {e}");
            }
        });
        Ok(RelayHandle {
            addr,
            traffic,
            task,
        })
    }

    fn decide(&mut self, direction: Direction, bytes: &mut [u8]) -> Fate {
        let (index, scripted) = match direction {
            Direction::Forward => {
                self.forward_seen += 1;
                (self.forward_seen - 1, &self.config.drop_forward)
            }
            Direction::Backward => {
                self.backward_seen += 1;
                (self.backward_seen - 1, &self.config.drop_backward)
            }
        };
        if scripted.contains(&index) {
            return Fate::Dropped;
        }
        if self.config.loss_rate > 0.0 && self.rng.random_bool(self.config.loss_rate) {
            return Fate::Dropped;
        }
        if !bytes.is_empty()
            && self.config.corrupt_rate > 0.0
            && self.rng.random_bool(self.config.corrupt_rate)
        {
            let bit = self.rng.random_range(0..bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
            return Fate::Corrupted;
        }
        Fate::Delivered
    }
}

/// A relay running in the background.  Dropping the handle stops it.
pub struct RelayHandle {
    pub addr: SocketAddr,
    pub traffic: TrafficLog,
    task: JoinHandle<()>,
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
