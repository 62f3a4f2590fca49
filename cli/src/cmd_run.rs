//! `bridgescan run` — replay a recorded block-event file through a scanner.
//!
//! The event file is JSON Lines, one block-source event per line:
//!
//! ```text
//! {"forward":{"block":{"hash":"..","parent_hash":"..","height":100},"transactions":[..]}}
//! {"backward":{"hash":"..","parent_hash":"..","height":100}}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Transactions that
//! don't parse as the configured chain's format are skipped with a warning.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{info, warn};

use bridgescan_core::{
    Block, BlockStore, Extractor, LaneState, RecordStore, Scanner, ScannerBuilder,
};
use bridgescan_extractors::{
    CardanoObservationExtractor, ErgoBox, ErgoBoxExtractor, ErgoTransaction, EventTriggerExtractor,
    KoiosTransaction, TxIdExtractor,
};
use bridgescan_storage::SqliteStorage;

use crate::config::{Chain, ExtractorConfig, RunConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// One line of the event file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockEvent {
    Forward {
        block: Block,
        #[serde(default)]
        transactions: Vec<serde_json::Value>,
    },
    Backward(Block),
}

/// What a replay did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub forwarded: usize,
    pub forked: usize,
    pub skipped_transactions: usize,
}

/// How the lane ended up once it stopped making progress.
#[derive(Debug, PartialEq, Eq)]
pub enum Settled {
    Drained,
    Halted { height: u64 },
    Stuck { height: u64 },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub async fn run(config: RunConfig, events: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(events)
        .with_context(|| format!("reading events {}", events.display()))?;
    let lines = parse_events(&raw)?;

    let store = Arc::new(
        SqliteStorage::open(&config.database)
            .await
            .with_context(|| format!("opening database {}", config.database))?,
    );

    let settled = match config.chain {
        Chain::Ergo => {
            let scanner = ScannerBuilder::from_config(config.scanner.clone())
                .build::<ErgoTransaction>(store.clone())?;
            for extractor in &config.extractors {
                match extractor {
                    ExtractorConfig::ErgoBox { id, addresses, token_id, seed } => {
                        let ergo = Arc::new(ErgoBoxExtractor::new(
                            id.clone(),
                            store.clone(),
                            addresses.clone(),
                            token_id.clone(),
                        ));
                        if let Some(seed) = seed {
                            let raw = std::fs::read_to_string(&seed.boxes).with_context(|| {
                                format!("reading seed {}", seed.boxes.display())
                            })?;
                            let boxes: Vec<ErgoBox> = serde_json::from_str(&raw).with_context(
                                || format!("parsing seed {}", seed.boxes.display()),
                            )?;
                            ergo.warm_start(ergo.seed_records(&boxes), seed.height).await?;
                        }
                        register(&scanner, ergo)?;
                    }
                    ExtractorConfig::EventTrigger { id, address, rwt_token_id } => {
                        let triggers = EventTriggerExtractor::new(
                            id.clone(),
                            store.clone(),
                            address.clone(),
                            rwt_token_id.clone(),
                        );
                        register(&scanner, Arc::new(triggers))?;
                    }
                    ExtractorConfig::TxId { id } => {
                        register(&scanner, Arc::new(TxIdExtractor::new(id.clone(), store.clone())))?;
                    }
                    ExtractorConfig::CardanoObservation { .. } => {}
                }
            }
            drive(scanner, lines).await?
        }
        Chain::Cardano => {
            let scanner = ScannerBuilder::from_config(config.scanner.clone())
                .build::<KoiosTransaction>(store.clone())?;
            for extractor in &config.extractors {
                match extractor {
                    ExtractorConfig::CardanoObservation { id, lock_address } => {
                        let cardano = Arc::new(CardanoObservationExtractor::new(
                            id.clone(),
                            store.clone(),
                            lock_address.clone(),
                        ));
                        register(&scanner, cardano)?;
                    }
                    ExtractorConfig::TxId { id } => {
                        register(&scanner, Arc::new(TxIdExtractor::new(id.clone(), store.clone())))?;
                    }
                    ExtractorConfig::ErgoBox { .. } | ExtractorConfig::EventTrigger { .. } => {}
                }
            }
            drive(scanner, lines).await?
        }
    };

    report(store.as_ref(), &config).await?;
    store.close().await;

    match settled {
        Settled::Drained => Ok(()),
        Settled::Halted { height } => Err(anyhow!(
            "scanner halted at height {height} after {} failed attempts",
            config.scanner.retry_ceiling
        )),
        Settled::Stuck { height } => Err(anyhow!(
            "block at height {height} exhausted its retries; replay more events to retry it"
        )),
    }
}

fn register<T, E>(scanner: &Scanner<T>, extractor: Arc<E>) -> Result<()>
where
    T: Send + Sync + 'static,
    E: Extractor<T> + 'static,
{
    let id = extractor.id().to_string();
    if !scanner.register_extractor(extractor) {
        bail!("duplicate extractor id '{id}'");
    }
    Ok(())
}

// ─── Replay ──────────────────────────────────────────────────────────────────

/// Parse every event line, failing on the first malformed one.
pub fn parse_events(raw: &str) -> Result<Vec<BlockEvent>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("event line {}", index + 1))
        })
        .collect()
}

/// Feed `events` into `scanner`, converting raw transactions to `T`.
pub fn feed<T>(scanner: &Scanner<T>, events: Vec<BlockEvent>) -> ReplayStats
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let mut stats = ReplayStats::default();
    for event in events {
        match event {
            BlockEvent::Forward { block, transactions } => {
                let mut parsed = Vec::with_capacity(transactions.len());
                for (index, raw) in transactions.into_iter().enumerate() {
                    match serde_json::from_value::<T>(raw) {
                        Ok(tx) => parsed.push(tx),
                        Err(e) => {
                            warn!(height = block.height, index, error = %e, "skipping unparsable transaction");
                            stats.skipped_transactions += 1;
                        }
                    }
                }
                scanner.forward_block(block, parsed);
                stats.forwarded += 1;
            }
            BlockEvent::Backward(block) => {
                scanner.backward_block(block);
                stats.forked += 1;
            }
        }
    }
    stats
}

/// Block until the lane has drained, halted, or is waiting on an exhausted
/// block that only a new event would retry.
pub async fn wait_settled<T: Send + Sync + 'static>(scanner: &Scanner<T>) -> Settled {
    let ceiling = scanner.config().retry_ceiling;
    loop {
        let head = scanner.queue().head();
        match (scanner.lane_state(), head) {
            (LaneState::Halted, Some(head)) => {
                return Settled::Halted {
                    height: head.block.height,
                }
            }
            (LaneState::Idle, None) => return Settled::Drained,
            (LaneState::Idle, Some(head)) if head.retry_count >= ceiling => {
                return Settled::Stuck {
                    height: head.block.height,
                }
            }
            _ => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
}

async fn drive<T>(scanner: Scanner<T>, events: Vec<BlockEvent>) -> Result<Settled>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let lane = tokio::spawn(scanner.clone().run(async {
        let _ = stop_rx.await;
    }));

    let stats = feed(&scanner, events);
    info!(
        forwarded = stats.forwarded,
        forked = stats.forked,
        skipped = stats.skipped_transactions,
        "events queued"
    );

    let settled = wait_settled(&scanner).await;
    let _ = stop_tx.send(());
    lane.await.context("scanner lane panicked")?;
    Ok(settled)
}

async fn report(store: &SqliteStorage, config: &RunConfig) -> Result<()> {
    let name = &config.scanner.name;
    match store.last_done(name).await? {
        Some(block) => println!(
            "scanner '{name}': last applied block {} at height {}",
            block.hash, block.height
        ),
        None => println!("scanner '{name}': no applied blocks"),
    }
    for extractor in &config.extractors {
        let id = extractor.id();
        let total = store.count(id).await?;
        let unspent = store.unspent(id).await?.len();
        println!("  {id:<24} {total:>8} records  {unspent:>8} unspent");
    }
    Ok(())
}
