//! # Transaction Matcher
//!
//! The waiting room between `send()` and the inbound read loop. An outgoing
//! request registers a waiter under its correlation key; when the read loop
//! decodes a response it derives the same key and resolves the waiter.
//! A response with no registered waiter is unsolicited and dropped.
//!
//! At most one waiter may exist per key. Serial lines share a single key —
//! the bus is half-duplex, so the next frame on the wire answers the most
//! recent request — and the master's line mutex guarantees the slot is free
//! by construction. IP masters key by MBAP transaction id; a collision there
//! means an id was reused while still outstanding, which is a programming
//! error and rejected loudly.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::error::{ModbusError, ModbusResult};
use crate::pdu::{ResponsePdu, SlaveId};

/// Identifies the transaction slot a request and its response share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    /// All requests on one serial line share this key.
    Serial,
    /// IP transactions are keyed by the MBAP transaction id.
    Transaction(u16),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Serial => write!(f, "serial"),
            CorrelationKey::Transaction(id) => write!(f, "transaction {}", id),
        }
    }
}

/// A decoded response together with the slave that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedResponse {
    pub slave_id: SlaveId,
    pub response: ResponsePdu,
}

/// What a resolved transaction yields: a matched response, or the transport
/// failure that killed it.
pub type TransactionOutcome = ModbusResult<MatchedResponse>;

/// Handle returned by [`TransactionMatcher::register`]; await it to get the
/// transaction outcome.
#[derive(Debug)]
pub struct Waiter {
    rx: oneshot::Receiver<TransactionOutcome>,
}

impl Waiter {
    /// Suspend until the matcher resolves this transaction. A dropped sender
    /// means the matcher (and its controller) went away.
    pub async fn wait(self) -> TransactionOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ModbusError::Closed),
        }
    }
}

/// Registry mapping correlation keys to single pending waiters.
#[derive(Debug, Default)]
pub struct TransactionMatcher {
    pending: Mutex<HashMap<CorrelationKey, oneshot::Sender<TransactionOutcome>>>,
}

impl TransactionMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `key`. Fails if the slot is already occupied.
    pub fn register(&self, key: CorrelationKey) -> ModbusResult<Waiter> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| ModbusError::internal("matcher lock poisoned"))?;
        if pending.contains_key(&key) {
            return Err(ModbusError::CorrelationCollision {
                key: key.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(key, tx);
        Ok(Waiter { rx })
    }

    /// Resolve the waiter for `key`, if one exists. Returns `false` when the
    /// response was unsolicited and dropped.
    pub fn deliver(&self, key: CorrelationKey, outcome: TransactionOutcome) -> bool {
        let sender = match self.pending.lock() {
            Ok(mut pending) => pending.remove(&key),
            Err(_) => None,
        };
        match sender {
            // A send error only means the waiter timed out concurrently.
            Some(tx) => tx.send(outcome).is_ok(),
            None => {
                log::debug!("dropping unsolicited response for {}", key);
                false
            }
        }
    }

    /// Remove a waiter whose sender timed out; its response, should it still
    /// arrive, becomes unsolicited.
    pub fn remove(&self, key: CorrelationKey) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&key);
        }
    }

    /// Fail every outstanding waiter, e.g. when the controller is destroyed.
    pub fn fail_all(&self, error: ModbusError) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, tx) in pending.drain() {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    /// Number of transactions currently outstanding.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}
