//! Annotated EVM transaction traces.
//!
//! A [`Tracer`] folds a debugger trace through the symbolic decoder of
//! [`evmtrace_decoder`], tracks message-call frames to attribute gas to
//! whole sub-calls, and correlates each step with the Solidity source that
//! produced it.

mod annotated;
mod artifacts;
mod config;
mod endpoint;
mod error;
mod materials;
mod pipeline;
mod profile;
mod sink;
mod util;

pub use annotated::{AnnotatedStep, AnnotatedTrace, Diagnostic, TraceInfo};
pub use artifacts::{strip_metadata, Artifact, ArtifactStore};
pub use config::{
    load_constants, AnnotatedFilter, RawTraceHook, StepFilter, TraceOptions, TracerConfig,
};
pub use endpoint::{CodeProvider, DebugEndpoint, EntryPoint, Receipt, RecordedEndpoint, StaticCode};
pub use error::{ArtifactError, BoxError, TraceError};
pub use materials::{ArtifactMaterials, MaterialsCache, MaterialsSource, NoMaterials};
pub use pipeline::Tracer;
pub use profile::{GasProfile, OpcodeGas};
pub use sink::{deliver, PrintSink, TraceSink};
pub use util::{init_logger, LogGuard};
