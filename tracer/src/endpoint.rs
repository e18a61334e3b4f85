//! Collaborators that talk to a node: the debugger endpoint that produces
//! raw traces and the code provider that returns deployed bytecode.

use std::{collections::BTreeMap, fs, path::Path};

use ahash::AHashMap;
use anyhow::{anyhow, Context};
use evmtrace_decoder::{Address, RawTrace, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::TraceError;

/// Replays a transaction and returns its step-by-step trace
/// (`debug_traceTransaction`).
pub trait DebugEndpoint: Send + Sync {
    fn trace_transaction(&self, tx: &TxHash) -> anyhow::Result<RawTrace>;
}

/// Returns the runtime bytecode deployed at an address, or `None` for
/// accounts without code.
pub trait CodeProvider: Send + Sync {
    fn code(&self, address: &Address) -> anyhow::Result<Option<Vec<u8>>>;
}

/// The subset of a transaction receipt the tracer needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub to: Option<Address>,
    #[serde(default)]
    pub contract_address: Option<Address>,
}

/// Where execution of a transaction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint {
    pub address: Address,
    pub is_creation: bool,
}

impl Receipt {
    pub fn entry(&self) -> Result<EntryPoint, TraceError> {
        match (self.contract_address, self.to) {
            (Some(address), _) => Ok(EntryPoint {
                address,
                is_creation: true,
            }),
            (None, Some(address)) => Ok(EntryPoint {
                address,
                is_creation: false,
            }),
            (None, None) => Err(TraceError::MissingEntry),
        }
    }
}

/// Serves traces captured ahead of time.
#[derive(Debug, Clone, Default)]
pub struct RecordedEndpoint {
    traces: AHashMap<TxHash, RawTrace>,
}

impl RecordedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self, tx: TxHash, trace: RawTrace) -> Self {
        self.traces.insert(tx, trace);
        self
    }
}

impl DebugEndpoint for RecordedEndpoint {
    fn trace_transaction(&self, tx: &TxHash) -> anyhow::Result<RawTrace> {
        self.traces
            .get(tx)
            .cloned()
            .ok_or_else(|| anyhow!("no recorded trace for {tx}"))
    }
}

/// Bytecode from a fixed `{address: hex}` table.
#[derive(Debug, Clone, Default)]
pub struct StaticCode {
    code: AHashMap<Address, Vec<u8>>,
}

impl StaticCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code(mut self, address: Address, code: Vec<u8>) -> Self {
        self.code.insert(address, code);
        self
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let table: BTreeMap<Address, String> = serde_json::from_str(json)?;
        let code = table
            .into_iter()
            .map(|(address, hex_code)| {
                let digits = hex_code.strip_prefix("0x").unwrap_or(&hex_code);
                let bytes = hex::decode(digits).with_context(|| format!("code of {address}"))?;
                Ok((address, bytes))
            })
            .collect::<anyhow::Result<_>>()?;
        Ok(Self { code })
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading code table {}", path.display()))?;
        Self::from_json(&contents)
    }
}

impl CodeProvider for StaticCode {
    fn code(&self, address: &Address) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.code.get(address).filter(|code| !code.is_empty()).cloned())
    }
}
