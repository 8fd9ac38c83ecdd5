use super::memory::MemoryState;
use super::segment::Segment;
use super::{PersistError, PersistResult, PersistenceGateway, UnitOfWork, Watermarks};
use crate::engine::entry::{Order, OrderSide, Trade};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    version: u32,
    work: UnitOfWork,
}

struct Inner {
    segment: Segment,
    state: MemoryState,
}

/// Durable gateway backed by a single append-only segment file.
///
/// Every committed unit of work is one journal entry, synced before the
/// commit returns. Opening the journal replays all entries into memory.
pub struct JournalGateway {
    inner: Mutex<Inner>,
}

impl JournalGateway {
    pub fn open<P: AsRef<Path>>(path: P) -> PersistResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut segment = Segment::open(path, 1)?;
        let mut state = MemoryState::default();
        for (offset, bytes) in segment.read_all()?.into_iter().enumerate() {
            let index = segment.first_index() + offset as u64;
            let record: JournalRecord = bincode::deserialize(&bytes).map_err(|e| {
                PersistError::Corrupt(format!("journal entry {}: {}", index, e))
            })?;
            if record.version != RECORD_VERSION {
                return Err(PersistError::Corrupt(format!(
                    "journal entry {} has version {}",
                    index, record.version
                )));
            }
            state.check(&record.work).map_err(|e| {
                PersistError::Corrupt(format!("journal entry {} does not replay: {}", index, e))
            })?;
            state.apply(&record.work);
        }
        log::info!(
            "journal {} replayed {} entries",
            path.display(),
            segment.len()
        );

        Ok(Self {
            inner: Mutex::new(Inner { segment, state }),
        })
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> PersistResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| PersistError::Unavailable("journal lock poisoned".to_string()))?;
        Ok(f(&mut inner))
    }
}

#[async_trait]
impl PersistenceGateway for JournalGateway {
    async fn commit(&self, work: &UnitOfWork) -> PersistResult<()> {
        self.with_inner(|inner| -> PersistResult<()> {
            inner.state.check(work)?;
            let record = JournalRecord {
                version: RECORD_VERSION,
                work: work.clone(),
            };
            let bytes = bincode::serialize(&record)?;
            let index = inner.segment.append(&[bytes])?;
            inner.state.apply(work);
            log::debug!("journal entry {} appended", index);
            Ok(())
        })?
    }

    async fn get_order(&self, id: u64) -> PersistResult<Option<Order>> {
        self.with_inner(|inner| inner.state.get_order(id))
    }

    async fn list_trades(&self, symbol: Option<&str>) -> PersistResult<Vec<Trade>> {
        self.with_inner(|inner| inner.state.list_trades(symbol))
    }

    async fn open_orders(&self, symbol: &str, side: OrderSide) -> PersistResult<Vec<Order>> {
        self.with_inner(|inner| inner.state.open_orders(symbol, side))
    }

    async fn open_symbols(&self) -> PersistResult<Vec<String>> {
        self.with_inner(|inner| inner.state.open_symbols())
    }

    async fn watermarks(&self) -> PersistResult<Watermarks> {
        self.with_inner(|inner| inner.state.watermarks())
    }

    fn name(&self) -> &'static str {
        "journal"
    }
}
