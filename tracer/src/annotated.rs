//! The pipeline's output: raw steps enriched with symbolic descriptions,
//! corrected gas and source context.

use std::fmt;

use ahash::AHashMap;
use colored::Colorize;
use evmtrace_decoder::{Address, InstructionStep, InversionMap, RenderSession, Word};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotatedStep {
    /// Position of the step in the raw trace.
    pub index: usize,
    #[serde(flatten)]
    pub step: InstructionStep,
    pub description: String,
    pub operand_words: Vec<Word>,
    pub result_words: Vec<Word>,
    pub corrected_gas_cost: u64,
    /// The contract executing the step; unknown inside creation frames.
    pub contract_address: Option<Address>,
    pub call_depth_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_snippet: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_location_label: Option<String>,
    /// Raw-trace index of the annotated step before this one.
    pub previous: Option<usize>,
}

impl AnnotatedStep {
    pub fn op(&self) -> &str {
        &self.step.op
    }

    pub fn pc(&self) -> u64 {
        self.step.pc
    }

    pub fn has_source(&self) -> bool {
        self.source_snippet.is_some()
    }
}

impl fmt::Display for AnnotatedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source_snippet, &self.source_location_label) {
            (Some(snippet), Some(label)) => {
                writeln!(
                    f,
                    "{}       pc={} op={} source={}",
                    "Log".bright_black(),
                    self.step.pc,
                    self.step.op,
                    label
                )?;
                writeln!(f, "Solidity  {}", snippet.trim())?;
                writeln!(f, "          ↓")?;
                write!(f, "EVM Asm   {}", self.description.bright_blue())
            }
            _ => write!(f, "{}", self.description.bright_blue()),
        }
    }
}

/// A degradation that did not stop the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// No source correlation for a contract. `step` is the raw index of the
    /// call that entered it, or `None` for the transaction's entry contract.
    MaterialsUnavailable {
        address: Address,
        step: Option<usize>,
    },
    /// A step decoded as an opaque mnemonic.
    DecodeUnmodeled { step: usize, op: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MaterialsUnavailable {
                address,
                step: Some(step),
            } => write!(f, "no source materials for {address} (entered at step {step})"),
            Diagnostic::MaterialsUnavailable { address, step: None } => {
                write!(f, "no source materials for entry contract {address}")
            }
            Diagnostic::DecodeUnmodeled { step, op } => {
                write!(f, "step {step}: {op} decoded as an opaque instruction")
            }
        }
    }
}

/// Decoder state left over after the fold, shared with sinks.
#[derive(Debug, Clone, Default)]
pub struct TraceInfo {
    pub inversion: InversionMap,
    pub preimages: AHashMap<Word, Word>,
    pub diagnostics: Vec<Diagnostic>,
    pub small_value_threshold: u64,
}

impl TraceInfo {
    /// Renders `word` in a fresh session.
    pub fn render(&self, word: &Word) -> String {
        let mut session = RenderSession::new(self.small_value_threshold);
        self.inversion.render(word, &mut session)
    }

    pub fn preimage(&self, digest: &Word) -> Option<&Word> {
        self.preimages.get(digest)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotatedTrace {
    pub steps: Vec<AnnotatedStep>,
    /// Gas used as reported by the VM.
    pub gas: u64,
    pub failed: bool,
    pub return_value: String,
    pub info: TraceInfo,
}

impl AnnotatedTrace {
    /// The step annotated at raw-trace position `index`, if it was kept.
    pub fn step_at(&self, index: usize) -> Option<&AnnotatedStep> {
        self.steps
            .binary_search_by_key(&index, |step| step.index)
            .ok()
            .map(|i| &self.steps[i])
    }

    pub fn previous(&self, step: &AnnotatedStep) -> Option<&AnnotatedStep> {
        step.previous.and_then(|index| self.step_at(index))
    }

    pub fn total_corrected_gas(&self) -> u64 {
        self.steps.iter().map(|step| step.corrected_gas_cost).sum()
    }
}
