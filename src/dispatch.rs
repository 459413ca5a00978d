//! Steady-state message loop.
//!
//! Once negotiated, every inbound message is handled in arrival order on
//! the control thread:
//!
//! | received | action                                         |
//! |----------|------------------------------------------------|
//! | `inv`    | reply with one `getdata` naming every item     |
//! | `tx`     | enqueue as a loose transaction                 |
//! | `block`  | hand to the block stage (waits until taken)    |
//! | `ping`   | reply with `pong` carrying the same nonce      |
//! | other    | ignored                                        |

use std::convert::Infallible;
use std::io::{Read, Write};
use std::time::SystemTime;

use tracing::{debug, error, trace};

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::params::ConnParams;
use crate::pipeline::{Queues, TxWithContext};
use crate::wire::Message;
use crate::wire::payload;

pub struct Dispatcher<'a, S> {
    endpoint: &'a mut Endpoint<S>,
    params: &'a ConnParams,
    queues: Queues,
}

impl<'a, S: Read + Write> Dispatcher<'a, S> {
    pub fn new(endpoint: &'a mut Endpoint<S>, params: &'a ConnParams, queues: Queues) -> Self {
        Self {
            endpoint,
            params,
            queues,
        }
    }

    /// Reads and handles messages until something fails.
    ///
    /// There is no normal exit: a closed connection is an error like any
    /// other. Nothing is handled once a pipeline stage has died. The queues
    /// are dropped on return, which lets the pipeline drain and stop.
    pub fn run(mut self) -> Result<Infallible> {
        loop {
            let handled = self.endpoint.read_message(self.params).and_then(|msg| {
                self.queues.check()?;
                self.handle(msg)
            });

            if let Err(err) = handled {
                error!(error = %err, "dispatch stopped");
                return Err(err);
            }
        }
    }

    /// Applies the action for one inbound message.
    pub fn handle(&mut self, msg: Message) -> Result<()> {
        match msg {
            Message::Inv(items) => {
                debug!(items = items.len(), "requesting advertised items");
                self.endpoint
                    .write_message(self.params, &payload::getdata_for(&items))
            }
            Message::Tx(tx) => {
                trace!(txid = %tx.txid(), "loose transaction");
                self.queues
                    .send_tx(TxWithContext::loose(tx, SystemTime::now()))
            }
            Message::Block(block) => {
                debug!(block = %block.hash(), txs = block.transactions.len(), "block");
                self.queues.send_block(block)
            }
            Message::Ping(nonce) => self.endpoint.write_message(self.params, &Message::Pong(nonce)),
            other => {
                trace!(command = %other.command(), "ignored");
                Ok(())
            }
        }
    }
}
