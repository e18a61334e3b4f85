use evmtrace_decoder::{Address, SourceMapError};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Receipt has neither a created contract nor a recipient")]
    MissingEntry,

    #[error("Step {step} (pc={pc}, op={op}) leaves a call frame that was never entered")]
    FrameStackUnderflow { step: usize, pc: u64, op: String },

    #[error("Failed to fetch decode materials for {address}")]
    MaterialsFetchFailed {
        address: Address,
        #[source]
        source: BoxError,
    },

    #[error("Debugger endpoint failed")]
    Endpoint(#[source] BoxError),

    #[error("Trace sink failed")]
    Sink(#[source] BoxError),
}

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read artifacts: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid artifacts JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Contract {contract} has a malformed `{field}` entry")]
    BadBytecode {
        contract: String,
        field: &'static str,
    },

    #[error("Contract {contract} has an invalid source map: {source}")]
    SourceMap {
        contract: String,
        #[source]
        source: SourceMapError,
    },
}
