//! The Operation Decoder: turns one instruction snapshot, plus the stack of
//! the snapshot after it, into a symbolic description.

use ahash::AHashMap;
use tracing::trace;

use crate::{
    inversion::{InversionMap, Operation, RenderSession},
    opcodes::{Opcode, OpcodeSpec},
    step::{stack_from_top, stack_top_n, InstructionStep},
    word::Word,
};

/// Hash windows larger than this are not sliced out of memory.
pub const MAX_PREIMAGE_BYTES: usize = 1 << 20;

/// The annotation produced for one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub description: String,
    pub operands: Vec<Word>,
    pub results: Vec<Word>,
    /// False when the step was decoded as an opaque mnemonic.
    pub modeled: bool,
}

impl Decoded {
    fn opaque(op: &str) -> Self {
        Self {
            description: op.to_string(),
            ..Default::default()
        }
    }
}

/// Forward-pass state: the inversion map, the hash preimage table and the
/// session used to render descriptions.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    inversion: InversionMap,
    preimages: AHashMap<Word, Word>,
    session: RenderSession,
}

impl Decoder {
    pub fn new(inversion: InversionMap, threshold: u64) -> Self {
        Self {
            inversion,
            preimages: AHashMap::new(),
            session: RenderSession::new(threshold),
        }
    }

    pub fn inversion(&self) -> &InversionMap {
        &self.inversion
    }

    /// Digest to preimage pairs seen at hashing steps.
    pub fn preimages(&self) -> &AHashMap<Word, Word> {
        &self.preimages
    }

    pub fn preimage(&self, digest: &Word) -> Option<&Word> {
        self.preimages.get(digest)
    }

    pub fn render(&mut self, word: &Word) -> String {
        self.inversion.render(word, &mut self.session)
    }

    pub fn into_parts(self) -> (InversionMap, AHashMap<Word, Word>) {
        (self.inversion, self.preimages)
    }

    /// Decodes `step`. `next_stack` is the stack of the following step, or
    /// `None` at the end of the trace, where nothing produced is observable.
    pub fn decode(&mut self, step: &InstructionStep, next_stack: Option<&[Word]>) -> Decoded {
        let Some(opcode) = step.opcode() else {
            trace!(op = %step.op, "unknown mnemonic");
            return Decoded::opaque(&step.op);
        };
        let next = next_stack.unwrap_or_default();

        let (operands, results, operation) = match opcode.spec() {
            OpcodeSpec::FixedArity {
                inputs,
                outputs,
                registers,
            } => {
                let operands = stack_top_n(&step.stack, inputs).to_vec();
                let results = stack_top_n(next, outputs).to_vec();
                (operands, results, registers.then_some(Operation::Opcode(opcode)))
            }
            OpcodeSpec::Push { .. } => {
                let results = stack_top_n(next, 1).to_vec();
                (vec![], results, Some(Operation::Push(opcode)))
            }
            OpcodeSpec::Dup { n } => {
                let window = stack_top_n(next, n).to_vec();
                (window.clone(), window, None)
            }
            OpcodeSpec::Swap { n } => {
                let operands = stack_from_top(next, 0).cloned().into_iter().collect();
                let results = stack_from_top(next, n).cloned().into_iter().collect();
                (operands, results, None)
            }
            // Topics are on the stack before the log executes.
            OpcodeSpec::Log { topics } => {
                let operands = stack_top_n(&step.stack, topics).to_vec();
                (operands, vec![], None)
            }
            OpcodeSpec::Hash => match hash_window(step) {
                Some(preimage) => {
                    let results: Vec<Word> = stack_top_n(next, 1).to_vec();
                    if let Some(digest) = results.first() {
                        self.preimages.insert(digest.clone(), preimage.clone());
                    }
                    (vec![preimage], results, Some(Operation::Opcode(opcode)))
                }
                None => {
                    trace!(pc = step.pc, "hash window out of range");
                    return Decoded::opaque(&step.op);
                }
            },
            OpcodeSpec::Unmodeled => return Decoded::opaque(&step.op),
        };

        let description = self.describe(opcode, &operands, &results);
        if let Some(operation) = operation {
            self.inversion.register(&results, operation, &operands);
        }
        trace!(pc = step.pc, %description);

        Decoded {
            description,
            operands,
            results,
            modeled: true,
        }
    }

    /// `OP(inputs) -> results`, with inputs rendered against the map as it
    /// stood before this step.
    fn describe(&mut self, opcode: Opcode, operands: &[Word], results: &[Word]) -> String {
        let mut description = opcode.mnemonic().to_string();
        if !operands.is_empty() {
            let rendered: Vec<_> = operands.iter().map(|w| self.render(w)).collect();
            description.push('(');
            description.push_str(&rendered.join(","));
            description.push(')');
        }
        if !results.is_empty() {
            let shown: Vec<_> = results.iter().map(Word::to_string).collect();
            description.push_str(" -> ");
            description.push_str(&shown.join(","));
        }
        description
    }
}

/// The memory window a hashing step reads: offset on top of the stack, size
/// below it. Bytes past the end of memory read as zero.
fn hash_window(step: &InstructionStep) -> Option<Word> {
    let offset = usize::try_from(step.stack_from_top(0)?.to_u64()?).ok()?;
    let size = usize::try_from(step.stack_from_top(1)?.to_u64()?).ok()?;
    if size > MAX_PREIMAGE_BYTES {
        return None;
    }
    let end = offset.checked_add(size)?;

    let memory = step.memory_image();
    let mut window = vec![0u8; size];
    if offset < memory.len() {
        let available = &memory[offset..end.min(memory.len())];
        window[..available.len()].copy_from_slice(available);
    }
    Some(Word::from_bytes(&window))
}
