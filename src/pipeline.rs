//! Fan-out of blocks and transactions to a [`Consumer`].
//!
//! ```text
//!  dispatch ──block (rendezvous)──▶ block stage ──on_block──▶ consumer
//!     │                                 │
//!     │                                 └─ each tx, in block order
//!     ▼                                 ▼
//!  loose tx ─────────▶ tx queue (bounded) ─▶ tx stage ──on_transaction──▶ consumer
//! ```
//!
//! Both queues are FIFO with blocking sends: nothing is reordered, dropped
//! or duplicated. A slow consumer therefore stalls the producer, and a
//! stalled block stage stalls the dispatch loop.
//!
//! A stage that panics is recorded in [`StageHealth`] before its thread
//! exits, and the interrupt registered there is fired so the session stops
//! right away instead of at its next send.

use std::fmt::{self, Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use crossbeam_channel::{Receiver, Sender, bounded};
use tracing::{debug, error, warn};

use crate::error::{Result, WatchError};
use crate::wire::{Block, Hash256, Transaction};

/// A transaction as delivered to [`Consumer::on_transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxWithContext {
    pub tx: Transaction,
    /// Hash of the containing block, `None` for a loose (relayed) transaction.
    pub block: Option<Hash256>,
    /// When the transaction, or its block, was received.
    pub seen: SystemTime,
}

impl TxWithContext {
    pub fn loose(tx: Transaction, seen: SystemTime) -> Self {
        Self {
            tx,
            block: None,
            seen,
        }
    }

    pub fn in_block(tx: Transaction, block: Hash256, seen: SystemTime) -> Self {
        Self {
            tx,
            block: Some(block),
            seen,
        }
    }

    pub fn is_loose(&self) -> bool {
        self.block.is_none()
    }
}

/// Receiver of everything the session observes.
///
/// Both methods run synchronously on their pipeline stage's thread, one
/// call at a time per stage. A consumer that cannot continue should panic;
/// the session then ends with [`WatchError::StagePanicked`].
pub trait Consumer: Send + Sync + 'static {
    fn on_block(&self, received: SystemTime, block: &Block);

    fn on_transaction(&self, tx: TxWithContext);
}

type Interrupt = Box<dyn Fn() + Send>;

#[derive(Default)]
struct HealthState {
    failed: Option<&'static str>,
    interrupt: Option<Interrupt>,
}

/// Which stage, if any, has died; shared by the stages and the session.
#[derive(Clone, Default)]
pub struct StageHealth {
    inner: Arc<Mutex<HealthState>>,
}

impl StageHealth {
    /// Name of the first stage that panicked.
    pub fn failed(&self) -> Option<&'static str> {
        self.lock().failed
    }

    pub fn check(&self) -> Result<()> {
        match self.failed() {
            Some(stage) => Err(WatchError::StagePanicked(stage)),
            None => Ok(()),
        }
    }

    /// Registers `interrupt` to run on the first stage failure. Runs it
    /// immediately if a stage has already failed.
    pub fn on_failure(&self, interrupt: impl Fn() + Send + 'static) {
        let mut state = self.lock();
        if state.failed.is_some() {
            interrupt();
        } else {
            state.interrupt = Some(Box::new(interrupt));
        }
    }

    pub(crate) fn mark_failed(&self, stage: &'static str) {
        let mut state = self.lock();
        if state.failed.is_some() {
            return;
        }
        state.failed = Some(stage);
        if let Some(interrupt) = &state.interrupt {
            interrupt();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HealthState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for StageHealth {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHealth")
            .field("failed", &self.failed())
            .finish()
    }
}

/// Marks its stage failed when the stage thread unwinds.
struct StageGuard {
    stage: &'static str,
    health: StageHealth,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!(stage = self.stage, "pipeline stage panicked");
            self.health.mark_failed(self.stage);
        }
    }
}

/// Producer side of the two delivery queues.
#[derive(Debug, Clone)]
pub struct Queues {
    blocks: Sender<Block>,
    txs: Sender<TxWithContext>,
    health: StageHealth,
}

impl Queues {
    pub(crate) fn from_senders(
        blocks: Sender<Block>,
        txs: Sender<TxWithContext>,
        health: StageHealth,
    ) -> Self {
        Self { blocks, txs, health }
    }

    /// Fails with [`WatchError::StagePanicked`] once either stage has died.
    pub fn check(&self) -> Result<()> {
        self.health.check()
    }

    /// Hands `block` to the block stage, blocking until it takes it.
    pub fn send_block(&self, block: Block) -> Result<()> {
        self.blocks
            .send(block)
            .map_err(|_| WatchError::PipelineClosed("block"))
    }

    /// Enqueues a transaction, blocking while the queue is full.
    pub fn send_tx(&self, tx: TxWithContext) -> Result<()> {
        self.txs
            .send(tx)
            .map_err(|_| WatchError::PipelineClosed("transaction"))
    }
}

/// The two running stages.
///
/// Stages exit once every [`Queues`] handle is dropped and they have
/// drained what was already enqueued.
#[derive(Debug)]
pub struct Pipeline {
    block_stage: JoinHandle<()>,
    tx_stage: JoinHandle<()>,
    health: StageHealth,
}

impl Pipeline {
    /// Spawns both stages and returns them with the producer handles.
    pub fn start<C>(consumer: Arc<C>, tx_capacity: usize) -> Result<(Pipeline, Queues)>
    where
        C: Consumer + ?Sized,
    {
        let (block_tx, block_rx) = bounded::<Block>(0);
        let (tx_tx, tx_rx) = bounded::<TxWithContext>(tx_capacity);
        let health = StageHealth::default();

        let tx_stage = {
            let consumer = Arc::clone(&consumer);
            let guard = StageGuard {
                stage: "transaction",
                health: health.clone(),
            };
            thread::Builder::new()
                .name("tx-stage".to_string())
                .spawn(move || run_tx_stage(guard, consumer, tx_rx))
                .map_err(|source| WatchError::Spawn {
                    stage: "transaction",
                    source,
                })?
        };

        let block_stage = {
            let txs = tx_tx.clone();
            let guard = StageGuard {
                stage: "block",
                health: health.clone(),
            };
            thread::Builder::new()
                .name("block-stage".to_string())
                .spawn(move || run_block_stage(guard, consumer, block_rx, txs))
                .map_err(|source| WatchError::Spawn {
                    stage: "block",
                    source,
                })?
        };

        let queues = Queues::from_senders(block_tx, tx_tx, health.clone());

        Ok((
            Pipeline {
                block_stage,
                tx_stage,
                health,
            },
            queues,
        ))
    }

    pub fn health(&self) -> StageHealth {
        self.health.clone()
    }

    /// Waits for both stages to drain and exit.
    ///
    /// Every [`Queues`] handle must be dropped first, otherwise this blocks
    /// forever.
    pub fn shutdown(self) -> Result<()> {
        // The block stage feeds the tx stage, so it has to finish first.
        let block = self
            .block_stage
            .join()
            .map_err(|_| WatchError::StagePanicked("block"));
        let tx = self
            .tx_stage
            .join()
            .map_err(|_| WatchError::StagePanicked("transaction"));
        block.and(tx)
    }
}

fn run_block_stage<C>(
    guard: StageGuard,
    consumer: Arc<C>,
    blocks: Receiver<Block>,
    txs: Sender<TxWithContext>,
) where
    C: Consumer + ?Sized,
{
    // Dropped before the receiver, so a sender never sees the queue closed
    // ahead of the failure being recorded.
    let _guard = guard;
    for block in blocks.iter() {
        let received = SystemTime::now();
        consumer.on_block(received, &block);

        let hash = block.hash();
        let count = block.transactions.len();
        for tx in block.transactions {
            if txs.send(TxWithContext::in_block(tx, hash, received)).is_err() {
                warn!(block = %hash, "transaction stage is gone, stopping block stage");
                return;
            }
        }
        debug!(block = %hash, txs = count, "block delivered");
    }
}

fn run_tx_stage<C>(guard: StageGuard, consumer: Arc<C>, txs: Receiver<TxWithContext>)
where
    C: Consumer + ?Sized,
{
    let _guard = guard;
    for tx in txs.iter() {
        consumer.on_transaction(tx);
    }
}
