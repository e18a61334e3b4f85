//! Per-address decode materials and the cache that keeps one tracer from
//! fetching them twice.

use std::sync::Arc;

use ahash::AHashMap;
use evmtrace_decoder::{Address, CallTraceMaterials};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::debug;

use crate::{artifacts::ArtifactStore, endpoint::CodeProvider};

/// Produces [`CallTraceMaterials`] for a contract.
///
/// `Ok(None)` means no materials exist for the address (unknown bytecode,
/// no code at all); the trace is still decoded, without source
/// correlation. `Err` means the lookup itself failed and aborts the trace.
pub trait MaterialsSource: Send + Sync {
    fn fetch(
        &self,
        address: &Address,
        is_creation: bool,
    ) -> anyhow::Result<Option<CallTraceMaterials>>;
}

/// Never correlates source.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMaterials;

impl MaterialsSource for NoMaterials {
    fn fetch(&self, _: &Address, _: bool) -> anyhow::Result<Option<CallTraceMaterials>> {
        Ok(None)
    }
}

/// Matches the code deployed at an address against compiled artifacts.
pub struct ArtifactMaterials<C> {
    code: C,
    store: ArtifactStore,
}

impl<C: CodeProvider> ArtifactMaterials<C> {
    pub fn new(code: C, store: ArtifactStore) -> Self {
        Self { code, store }
    }
}

impl<C: CodeProvider> MaterialsSource for ArtifactMaterials<C> {
    fn fetch(
        &self,
        address: &Address,
        is_creation: bool,
    ) -> anyhow::Result<Option<CallTraceMaterials>> {
        let Some(code) = self.code.code(address)? else {
            debug!(%address, "no code deployed");
            return Ok(None);
        };
        let Some(artifact) = self.store.find_by_runtime_code(&code) else {
            debug!(%address, "no artifact matches deployed code");
            return Ok(None);
        };
        debug!(%address, contract = %artifact.name, is_creation, "matched artifact");
        Ok(Some(self.store.materials(artifact, is_creation)?))
    }
}

type Slot = Arc<OnceCell<Option<Arc<CallTraceMaterials>>>>;

/// Memo of message-call materials by address.
///
/// A caller that asks for an address whose fetch is already running blocks
/// until that fetch finishes instead of starting another. Failed fetches
/// are not remembered. Creation materials are never cached: they describe
/// init code, not the code that ends up deployed at the address.
#[derive(Default)]
pub struct MaterialsCache {
    slots: Mutex<AHashMap<Address, Slot>>,
}

impl MaterialsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        source: &dyn MaterialsSource,
        address: &Address,
        is_creation: bool,
    ) -> anyhow::Result<Option<Arc<CallTraceMaterials>>> {
        if is_creation {
            debug!(%address, "fetching creation materials");
            return Ok(source.fetch(address, true)?.map(Arc::new));
        }

        let slot = self.slots.lock().entry(*address).or_default().clone();
        slot.get_or_try_init(|| {
            debug!(%address, "fetching materials");
            source.fetch(address, false).map(|m| m.map(Arc::new))
        })
        .cloned()
    }

    /// Addresses with a finished fetch.
    pub fn cached(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }
}
