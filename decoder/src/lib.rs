//! Symbolic decoding of EVM execution traces.
//!
//! This crate holds the I/O-free parts of the tracer: the opcode table, the
//! inversion map that explains produced values in terms of the operations
//! that produced them, the per-step operation decoder, and the source-map
//! machinery that correlates program counters with source code.

pub mod decoder;
pub mod inversion;
pub mod opcodes;
pub mod source;
pub mod step;
pub mod word;

pub use decoder::{Decoded, Decoder, MAX_PREIMAGE_BYTES};
pub use inversion::{
    InversionMap, Operation, ProvenanceRecord, RenderSession, DEFAULT_SMALL_VALUE_THRESHOLD,
};
pub use opcodes::{lookup, Opcode, OpcodeSpec};
pub use source::{
    parse_source_map, resolve, CallTraceMaterials, Highlight, LineColumn, SourceContext,
    SourceFile, SourceMapError, SourceRange,
};
pub use step::{InstructionStep, RawTrace};
pub use word::{Address, TxHash, Word, WordError, ADDRESS_BYTES, WORD_BYTES};
