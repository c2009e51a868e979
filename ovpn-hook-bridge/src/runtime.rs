//! Process-wide Wasm runtime
//!
//! Every plugin instance in the process shares one `wasmtime::Engine`.
//! The first [`Runtime::acquire`] builds it, and it is torn down when the
//! last handle is dropped. The eager-cache source keeps a handle for the
//! instance's whole life. The per-call source holds one only for the
//! duration of a dispatch.

use crate::error::LoadError;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use wasmtime::{Config, Engine, Store};

static RUNTIME: Mutex<Weak<RuntimeInner>> = Mutex::new(Weak::new());

/// Shared handle to the process-wide engine
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    engine: Engine,
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        tracing::debug!("Wasm runtime torn down");
    }
}

impl Runtime {
    /// Get the running engine, starting it if no one holds it
    pub fn acquire() -> Result<Self, LoadError> {
        let mut slot = RUNTIME.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(inner) = slot.upgrade() {
            return Ok(Self { inner });
        }

        let mut config = Config::new();
        config.consume_fuel(true);
        config.wasm_memory64(false);

        let engine = Engine::new(&config).map_err(LoadError::Runtime)?;
        let inner = Arc::new(RuntimeInner { engine });
        *slot = Arc::downgrade(&inner);

        tracing::debug!("Wasm runtime initialized");
        Ok(Self { inner })
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Number of live handles on this runtime
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Live handles on the process-wide runtime, 0 once it is torn down
    pub fn active_owners() -> usize {
        RUNTIME
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strong_count()
    }

    /// Create a store with no host state
    pub fn new_store(&self) -> Store<()> {
        Store::new(&self.inner.engine, ())
    }
}

/// Refill a store's fuel before a guest call
///
/// `None` means unbounded execution.
pub fn arm_fuel(store: &mut Store<()>, fuel: Option<u64>) -> anyhow::Result<()> {
    store.set_fuel(fuel.unwrap_or(u64::MAX))
}
