//! Raw execution snapshots as returned by a `debug_traceTransaction`-style
//! debugger endpoint.

use std::collections::BTreeMap;

use serde::{de, Deserialize, Deserializer, Serialize};

use crate::{opcodes::Opcode, word::Word};

/// One executed instruction, captured before it runs.
///
/// The stack is in VM order: the top of the stack is the last element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionStep {
    pub depth: u32,
    pub op: String,
    pub pc: u64,
    #[serde(deserialize_with = "quantity")]
    pub gas: u64,
    #[serde(deserialize_with = "quantity")]
    pub gas_cost: u64,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub stack: Vec<Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Vec<Word>>,
    #[serde(default, rename = "storage", deserialize_with = "nullable_map")]
    pub storage_delta: BTreeMap<Word, Word>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstructionStep {
    /// The parsed mnemonic, if it belongs to the instruction set.
    pub fn opcode(&self) -> Option<Opcode> {
        self.op.parse().ok()
    }

    /// The stack word `depth` slots below the top (0 is the top).
    pub fn stack_from_top(&self, depth: usize) -> Option<&Word> {
        stack_from_top(&self.stack, depth)
    }

    /// Memory contents as one contiguous byte image.
    pub fn memory_image(&self) -> Vec<u8> {
        self.memory
            .iter()
            .flatten()
            .flat_map(|word| word.as_bytes().iter().copied())
            .collect()
    }
}

/// The word `depth` slots below the top of a VM-ordered stack.
pub fn stack_from_top(stack: &[Word], depth: usize) -> Option<&Word> {
    stack.len().checked_sub(depth + 1).map(|index| &stack[index])
}

/// The top `n` words of a VM-ordered stack, in stack order. Shorter stacks
/// yield everything they hold.
pub fn stack_top_n(stack: &[Word], n: usize) -> &[Word] {
    &stack[stack.len().saturating_sub(n)..]
}

/// A complete debugger response for one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTrace {
    #[serde(deserialize_with = "quantity")]
    pub gas: u64,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub return_value: String,
    pub struct_logs: Vec<InstructionStep>,
}

/// Either a bare trace or a JSON-RPC envelope around one.
#[derive(Deserialize)]
#[serde(untagged)]
enum TraceDocument {
    Envelope { result: RawTrace },
    Bare(RawTrace),
}

impl RawTrace {
    /// Parses a trace from JSON, accepting both the bare result object and
    /// the JSON-RPC response wrapping it.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let doc: TraceDocument = serde_json::from_str(json)?;
        Ok(match doc {
            TraceDocument::Envelope { result } => result,
            TraceDocument::Bare(trace) => trace,
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Quantity {
    Number(u64),
    Text(String),
}

/// Gas quantities are plain numbers on most endpoints and hex strings on a
/// few.
fn quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match Quantity::deserialize(deserializer)? {
        Quantity::Number(n) => Ok(n),
        Quantity::Text(s) => match s.strip_prefix("0x") {
            Some(digits) => u64::from_str_radix(digits, 16).map_err(de::Error::custom),
            None => s.parse().map_err(de::Error::custom),
        },
    }
}

fn nullable_vec<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Word>, D::Error> {
    Ok(Option::<Vec<Word>>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<Word, Word>, D::Error> {
    Ok(Option::<BTreeMap<Word, Word>>::deserialize(deserializer)?.unwrap_or_default())
}
