//! Mock transport for unit and integration testing.
//!
//! Lets tests script whether each connection attempt succeeds, records when
//! every attempt was made, and hands out the [`LinkPeer`] of each accepted
//! connection so tests can play the bridge's side of the socket.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{BridgeTarget, Link, LinkPeer, Transport, TransportError};

/// Outcome of one scripted connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Accept,
    Fail(String),
    /// Stays in flight until [`MockTransport::release_attempt`], then accepts.
    AcceptOnRelease,
}

/// A scripted [`Transport`].
pub struct MockTransport {
    script: Mutex<VecDeque<MockOutcome>>,
    fallback: MockOutcome,
    attempts: Mutex<Vec<(Instant, BridgeTarget)>>,
    peers: Mutex<VecDeque<LinkPeer>>,
    peer_ready: Notify,
    release: Notify,
}

impl MockTransport {
    /// A transport whose attempts all succeed unless scripted otherwise.
    pub fn accepting() -> Self {
        Self::with_fallback(MockOutcome::Accept)
    }

    /// A transport whose attempts all fail with `reason` unless scripted
    /// otherwise.
    pub fn failing(reason: &str) -> Self {
        Self::with_fallback(MockOutcome::Fail(reason.to_string()))
    }

    fn with_fallback(fallback: MockOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            peers: Mutex::new(VecDeque::new()),
            peer_ready: Notify::new(),
            release: Notify::new(),
        }
    }

    /// Queues the outcome of the next unscripted attempt.
    pub fn push_outcome(&self, outcome: MockOutcome) {
        self.script.lock().expect("lock poisoned").push_back(outcome);
    }

    /// Number of connection attempts made so far.
    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().expect("lock poisoned").len()
    }

    /// When each attempt was made, in order.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    /// The target of each attempt, in order.
    pub fn attempt_targets(&self) -> Vec<BridgeTarget> {
        self.attempts
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|(_, target)| target.clone())
            .collect()
    }

    /// Lets one [`MockOutcome::AcceptOnRelease`] attempt complete.
    pub fn release_attempt(&self) {
        self.release.notify_one();
    }

    /// Waits for the next accepted connection and returns its bridge side.
    pub async fn next_peer(&self) -> LinkPeer {
        loop {
            if let Some(peer) = self.peers.lock().expect("lock poisoned").pop_front() {
                return peer;
            }
            self.peer_ready.notified().await;
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, target: &BridgeTarget) -> Result<Link, TransportError> {
        self.attempts
            .lock()
            .expect("lock poisoned")
            .push((Instant::now(), target.clone()));

        let outcome = self
            .script
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if outcome == MockOutcome::AcceptOnRelease {
            self.release.notified().await;
        }

        match outcome {
            MockOutcome::Accept | MockOutcome::AcceptOnRelease => {
                let (link, peer) = Link::pair();
                self.peers.lock().expect("lock poisoned").push_back(peer);
                self.peer_ready.notify_one();
                Ok(link)
            }
            MockOutcome::Fail(reason) => Err(TransportError::ConnectFailed {
                url: target.url.clone(),
                reason,
            }),
        }
    }
}
