//! Server state management for the rule server

use crate::board::{BoardItem, ItemId};
use crate::engine::{CompileError, DrcEngine, PopulateStats};
use indexmap::IndexMap;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

/// Result of a background cache pre-population
#[derive(Debug)]
pub struct PopulateAsyncResult {
    pub stats: PopulateStats,
    pub elapsed_ms: f64,
}

/// Engine plus the board items the client has sent
pub struct ServerState {
    pub engine: DrcEngine,
    /// Items by id, in the order they were loaded
    pub items: IndexMap<ItemId, BoardItem>,
    /// Compile error of the most recent session initialization, if any
    pub last_compile_error: Option<CompileError>,
    /// Raised to stop a running pre-population
    pub cancel: Arc<AtomicBool>,
    /// Whether a background pre-population is in flight
    pub populate_running: bool,
    pub populate_tx: Sender<PopulateAsyncResult>,
    pub populate_rx: Receiver<PopulateAsyncResult>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    pub fn new() -> Self {
        let (populate_tx, populate_rx) = mpsc::channel();
        Self {
            engine: DrcEngine::new(),
            items: IndexMap::new(),
            last_compile_error: None,
            cancel: Arc::new(AtomicBool::new(false)),
            populate_running: false,
            populate_tx,
            populate_rx,
        }
    }

    pub fn item(&self, id: ItemId) -> Option<&BoardItem> {
        self.items.get(&id)
    }

    /// Items in load order, copied out for a worker thread
    pub fn item_list(&self) -> Vec<BoardItem> {
        self.items.values().cloned().collect()
    }
}
