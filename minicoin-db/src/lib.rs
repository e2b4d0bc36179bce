//! redb-backed [`ChainStore`]: two buckets, one for blocks (plus the tip
//! pointer under a reserved key) and one for UTXOs keyed `"{tx_id}_{index}"`.
//! Every logical mutation happens inside a single write transaction.

use minicoin_core::store::{ChainStore, StoreError};
use minicoin_core::utxo::UtxoMap;
use minicoin_core::{Block, Transaction, Utxo};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use tracing::debug;

const BLOCKS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("blocks");
const UTXOS_TABLE: TableDefinition<&str, Vec<u8>> = TableDefinition::new("utxos");

/// Reserved key in the blocks table holding the current tip hash.
const TIP_KEY: &str = "tip";

pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the store at `path` and ensure both buckets exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(backend_err)?;
        Self::with_database(db)
    }

    /// A store backed by memory only; used by tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(backend_err)?;
        Self::with_database(db)
    }

    fn with_database(db: Database) -> Result<Self, StoreError> {
        let write_tx = db.begin_write().map_err(backend_err)?;
        {
            write_tx.open_table(BLOCKS_TABLE).map_err(backend_err)?;
            write_tx.open_table(UTXOS_TABLE).map_err(backend_err)?;
        }
        write_tx.commit().map_err(backend_err)?;
        Ok(Self { db })
    }
}

impl ChainStore for RedbStore {
    fn write_block(&self, block: &Block) -> Result<(), StoreError> {
        let bytes = bincode::serialize(block).map_err(codec_err)?;

        let write_tx = self.db.begin_write().map_err(backend_err)?;
        {
            let mut blocks = write_tx.open_table(BLOCKS_TABLE).map_err(backend_err)?;
            blocks
                .insert(block.hash.as_str(), bytes)
                .map_err(backend_err)?;
            blocks
                .insert(TIP_KEY, block.hash.clone().into_bytes())
                .map_err(backend_err)?;
        }
        write_tx.commit().map_err(backend_err)?;
        debug!(hash = %block.hash, height = block.height, "block persisted");
        Ok(())
    }

    fn load_blocks_from_tip(&self) -> Result<Vec<Block>, StoreError> {
        let read_tx = self.db.begin_read().map_err(backend_err)?;
        let blocks = read_tx.open_table(BLOCKS_TABLE).map_err(backend_err)?;

        let Some(tip) = blocks.get(TIP_KEY).map_err(backend_err)? else {
            return Ok(Vec::new());
        };
        let mut cursor = String::from_utf8(tip.value())
            .map_err(|e| StoreError::TipCorrupt(e.to_string()))?;

        let mut chain = Vec::new();
        loop {
            let record = blocks
                .get(cursor.as_str())
                .map_err(backend_err)?
                .ok_or_else(|| StoreError::TipCorrupt(format!("missing block {}", cursor)))?;
            let block: Block = bincode::deserialize(&record.value()).map_err(codec_err)?;
            let prev_hash = block.prev_hash.clone();
            chain.push(block);
            if prev_hash.is_empty() {
                break;
            }
            cursor = prev_hash;
        }
        chain.reverse();
        Ok(chain)
    }

    fn write_utxos(&self, tx: &Transaction) -> Result<(), StoreError> {
        let write_tx = self.db.begin_write().map_err(backend_err)?;
        {
            let mut utxos = write_tx.open_table(UTXOS_TABLE).map_err(backend_err)?;
            for input in &tx.inputs {
                let key = format!("{}_{}", input.prev_tx_id, input.output_index);
                utxos.remove(key.as_str()).map_err(backend_err)?;
            }
            for (index, output) in tx.outputs.iter().enumerate() {
                let key = format!("{}_{}", tx.tx_id, index);
                let record = Utxo {
                    tx_id: tx.tx_id.clone(),
                    output_index: index as u32,
                    value: output.value,
                    script_pub_key: output.script_pub_key.clone(),
                };
                let bytes = bincode::serialize(&record).map_err(codec_err)?;
                utxos.insert(key.as_str(), bytes).map_err(backend_err)?;
            }
        }
        write_tx.commit().map_err(backend_err)
    }

    fn load_utxos(&self) -> Result<UtxoMap, StoreError> {
        let read_tx = self.db.begin_read().map_err(backend_err)?;
        let utxos = read_tx.open_table(UTXOS_TABLE).map_err(backend_err)?;

        let mut map = UtxoMap::new();
        for entry in utxos.iter().map_err(backend_err)? {
            let (_, value) = entry.map_err(backend_err)?;
            let utxo: Utxo = bincode::deserialize(&value.value()).map_err(codec_err)?;
            map.entry(utxo.tx_id.clone())
                .or_default()
                .insert(utxo.output_index, utxo);
        }
        Ok(map)
    }
}

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn codec_err(e: bincode::Error) -> StoreError {
    StoreError::Codec(e.to_string())
}
