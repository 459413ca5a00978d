//! Streams every block and transaction a single Bitcoin peer relays.
//!
//! ```text
//! watchtower --peer 127.0.0.1:18333 --network testnet3 --json --skip-block-txs
//! ```

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use btc_watchtower::script::{self, ScriptClass};
use btc_watchtower::wire::{Block, Command, Message, Network};
use btc_watchtower::{Consumer, Session, SessionConfig, TxWithContext, logging};

#[derive(Parser, Debug)]
#[command(name = "watchtower", version, about)]
struct Cli {
    /// Peer to connect to, as host:port.
    #[arg(long, default_value = btc_watchtower::config::DEFAULT_PEER)]
    peer: String,

    #[arg(long, value_enum, default_value_t = Network::Testnet3)]
    network: Network,

    /// Chain height announced to the peer.
    #[arg(long, default_value_t = 0)]
    start_height: i32,

    #[arg(long, default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// Log filter, overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print one JSON object per observation on stdout.
    #[arg(long)]
    json: bool,

    /// Skip transactions whose outputs are all pay-to-pubkey-hash.
    #[arg(long)]
    only_unusual: bool,

    /// Only report relayed transactions, not the ones inside blocks.
    #[arg(long)]
    skip_block_txs: bool,

    /// Ask the peer for its mempool after the handshake.
    #[arg(long)]
    send_mempool: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Observation {
    Block {
        hash: String,
        size: usize,
        time: u64,
    },
    Tx {
        kind: &'static str,
        size: usize,
        txid: String,
        time: u64,
        block: Option<String>,
    },
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

struct Reporter {
    json: bool,
    only_unusual: bool,
    skip_block_txs: bool,
    out: Mutex<io::Stdout>,
}

impl Reporter {
    fn emit(&self, observation: &Observation) {
        let line = match serde_json::to_string(observation) {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "could not encode observation");
                return;
            }
        };

        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        // stdout closed (e.g. a finished pipe): nothing left to report to.
        if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
            panic!("stdout is closed");
        }
    }
}

impl Consumer for Reporter {
    fn on_block(&self, received: SystemTime, block: &Block) {
        let hash = block.hash();
        if self.json {
            self.emit(&Observation::Block {
                hash: hash.to_string(),
                size: block.serialized_size,
                time: unix_secs(received),
            });
        } else {
            info!(
                %hash,
                txs = block.transactions.len(),
                size = block.serialized_size,
                "saw block"
            );
        }
    }

    fn on_transaction(&self, tx: TxWithContext) {
        if self.skip_block_txs && !tx.is_loose() {
            return;
        }
        let kind = script::transaction_kind(&tx.tx);
        if self.only_unusual && kind == ScriptClass::PubKeyHash {
            return;
        }

        let txid = tx.tx.txid();
        if self.json {
            self.emit(&Observation::Tx {
                kind: kind.name(),
                size: tx.tx.serialized_size(),
                txid: txid.to_string(),
                time: unix_secs(tx.seen),
                block: tx.block.map(|hash| hash.to_string()),
            });
        } else {
            match tx.block {
                Some(block) => info!(%txid, %kind, %block, "saw tx"),
                None => info!(%txid, %kind, "saw tx"),
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&cli.log_level) {
        eprintln!("watchtower: {err}");
        std::process::exit(2);
    }

    let mut config = SessionConfig::new(cli.peer, cli.network);
    config.start_height = cli.start_height;
    config.connect_timeout = Duration::from_millis(cli.connect_timeout_ms);
    if cli.send_mempool {
        config.extra_messages.push(Message::bare(Command::Mempool));
    }

    info!(peer = %config.peer, network = %config.network, "watchtower v{}", env!("CARGO_PKG_VERSION"));

    let reporter = Arc::new(Reporter {
        json: cli.json,
        only_unusual: cli.only_unusual,
        skip_block_txs: cli.skip_block_txs,
        out: Mutex::new(io::stdout()),
    });

    match Session::new(config).run(reporter) {
        Ok(never) => match never {},
        Err(err) => {
            error!(error = %err, "watchtower stopped");
            std::process::exit(1);
        }
    }
}
