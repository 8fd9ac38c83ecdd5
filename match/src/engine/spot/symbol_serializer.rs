//! Per-symbol admission
//!
//! Every symbol owns one slot holding its [`Matcher`]. Holding the slot's
//! guard is the only way to read or change that symbol's book, so operations
//! on one symbol run one at a time while different symbols proceed in
//! parallel.

use crate::engine::matchlogic::Matcher;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

type Slot = Arc<Mutex<Matcher>>;

#[derive(Debug, Default)]
pub struct SymbolSerializer {
    slots: RwLock<HashMap<String, Slot>>,
}

impl SymbolSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the symbol's slot, creating an empty book on first use
    pub async fn admit(&self, symbol: &str) -> OwnedMutexGuard<Matcher> {
        let existing = self.slots.read().await.get(symbol).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write().await;
                slots
                    .entry(symbol.to_string())
                    .or_insert_with(|| {
                        log::info!("new order book for {}", symbol);
                        Arc::new(Mutex::new(Matcher::new(symbol.to_string())))
                    })
                    .clone()
            }
        };
        slot.lock_owned().await
    }

    /// Waits for the slot of a symbol that already has a book
    pub async fn admit_existing(&self, symbol: &str) -> Option<OwnedMutexGuard<Matcher>> {
        let slot = self.slots.read().await.get(symbol).cloned()?;
        Some(slot.lock_owned().await)
    }

    /// Installs a recovered book, replacing any slot for the same symbol
    pub async fn install(&self, matcher: Matcher) {
        let symbol = matcher.orderbook().symbol.clone();
        self.slots
            .write()
            .await
            .insert(symbol, Arc::new(Mutex::new(matcher)));
    }

    /// Symbols that have a book, sorted
    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.slots.read().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_admit_creates_one_book_per_symbol() {
        let serializer = SymbolSerializer::new();
        drop(serializer.admit("BTC").await);
        drop(serializer.admit("BTC").await);
        drop(serializer.admit("ETH").await);
        assert_eq!(serializer.symbols().await, vec!["BTC", "ETH"]);
        assert!(serializer.admit_existing("DOGE").await.is_none());
    }

    #[tokio::test]
    async fn test_same_symbol_is_exclusive() {
        let serializer = Arc::new(SymbolSerializer::new());
        let guard = serializer.admit("BTC").await;

        let other = serializer.clone();
        let waiting = tokio::spawn(async move {
            let _guard = other.admit("BTC").await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        // a different symbol is not blocked
        let eth = tokio::time::timeout(Duration::from_millis(100), serializer.admit("ETH")).await;
        assert!(eth.is_ok());

        drop(guard);
        tokio::time::timeout(Duration::from_millis(100), waiting)
            .await
            .unwrap()
            .unwrap();
    }
}
