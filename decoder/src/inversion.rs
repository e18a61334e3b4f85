//! Dataflow index from produced values back to the operations that produced
//! them.
//!
//! The decoder records, for every value an instruction produces, which
//! operation produced it and from which inputs. Rendering a value walks those
//! records recursively, so an opaque 32-byte digest can be shown as the
//! expression it was computed from, e.g. `SHA3(ADD(CALLER,0x4))`.
//!
//! Rendering is memoised through a [`RenderSession`], which is owned by
//! whoever renders (one pipeline run, one report) and dropped with it.

use std::fmt;

use ahash::AHashMap;
use smallvec::SmallVec;
use tracing::trace;

use crate::{opcodes::Opcode, word::Word};

/// Values below this are shown as plain literals rather than expanded.
pub const DEFAULT_SMALL_VALUE_THRESHOLD: u64 = 10_000;

/// What produced a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A caller-supplied named constant.
    Constant(String),
    /// A literal introduced into the program by a PUSH.
    Push(Opcode),
    /// The result of executing an instruction.
    Opcode(Opcode),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Constant(name) => f.write_str(name),
            Operation::Push(op) | Operation::Opcode(op) => f.write_str(op.mnemonic()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvenanceRecord {
    pub operation: Operation,
    pub inputs: Vec<Word>,
}

#[derive(Debug, Clone, Default)]
pub struct InversionMap {
    entries: AHashMap<Word, SmallVec<[ProvenanceRecord; 1]>>,
    /// Bumped whenever a value gains its first producer, which is the only
    /// change that can alter how anything renders.
    revision: u64,
}

impl InversionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the map with named constants.
    pub fn with_constants<I, S>(constants: I) -> Self
    where
        I: IntoIterator<Item = (S, Word)>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for (name, value) in constants {
            map.insert(
                value,
                ProvenanceRecord {
                    operation: Operation::Constant(name.into()),
                    inputs: vec![],
                },
            );
        }
        map
    }

    /// Records that `operation` applied to `inputs` produced each of
    /// `outputs`. Records are appended; earlier producers keep precedence.
    ///
    /// An output that is also one of the inputs (`AND(x, mask) == x`) gains
    /// nothing from the record and is skipped.
    pub fn register(&mut self, outputs: &[Word], operation: Operation, inputs: &[Word]) {
        for output in outputs {
            if inputs.contains(output) {
                trace!(%output, %operation, "skipping self-referential record");
                continue;
            }
            self.insert(
                output.clone(),
                ProvenanceRecord {
                    operation: operation.clone(),
                    inputs: inputs.to_vec(),
                },
            );
        }
    }

    fn insert(&mut self, key: Word, record: ProvenanceRecord) {
        let records = self.entries.entry(key).or_default();
        if records.is_empty() {
            self.revision += 1;
        }
        records.push(record);
    }

    /// Every record for `word`, oldest first.
    pub fn records(&self, word: &Word) -> &[ProvenanceRecord] {
        self.entries.get(word).map_or(&[], |records| records.as_slice())
    }

    /// The producer used for rendering: the first one recorded.
    pub fn producer(&self, word: &Word) -> Option<&ProvenanceRecord> {
        self.records(word).first()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Renders `word` as the expression that produced it.
    ///
    /// Words wider than a stack slot are split into slots, rendered one by
    /// one and joined as `CONCAT(..)`.
    pub fn render(&self, word: &Word, session: &mut RenderSession) -> String {
        session.sync(self.revision);
        self.render_any(word, session, &mut Expansion::default())
    }

    fn render_any(
        &self,
        word: &Word,
        session: &mut RenderSession,
        walk: &mut Expansion,
    ) -> String {
        if word.is_wide() {
            let parts: Vec<_> = word
                .chunks()
                .map(|chunk| self.render_slot(&chunk, session, walk))
                .collect();
            format!("CONCAT({})", parts.join(","))
        } else {
            self.render_slot(word, session, walk)
        }
    }

    fn render_slot(
        &self,
        word: &Word,
        session: &mut RenderSession,
        walk: &mut Expansion,
    ) -> String {
        if let Some(hit) = session.memo.get(word) {
            return hit.clone();
        }
        let cuts = walk.cuts;

        let rendered = if word.is_below(session.threshold) {
            word.to_string()
        } else {
            match self.producer(word) {
                None => word.to_string(),
                Some(record) => match &record.operation {
                    Operation::Constant(name) => name.clone(),
                    Operation::Push(_) => word.to_string(),
                    Operation::Opcode(op) if record.inputs.is_empty() => op.to_string(),
                    Operation::Opcode(op) => {
                        if walk.visiting.contains(word) {
                            // A value met again while it is being expanded.
                            trace!(%word, "cycle in provenance, rendering literal");
                            walk.cuts += 1;
                            return word.to_string();
                        }
                        walk.visiting.push(word.clone());
                        let inputs: Vec<_> = record
                            .inputs
                            .iter()
                            .map(|input| self.render_any(input, session, walk))
                            .collect();
                        walk.visiting.pop();
                        format!("{op}({})", inputs.join(","))
                    }
                },
            }
        };

        // A rendering cut short by a cycle depends on where the walk started.
        if walk.cuts == cuts {
            session.memo.insert(word.clone(), rendered.clone());
        }
        rendered
    }
}

/// Words on the current expansion path, and how many cycles were cut.
#[derive(Default)]
struct Expansion {
    visiting: SmallVec<[Word; 8]>,
    cuts: usize,
}

/// Memo table for one rendering session.
///
/// A session can be reused across a map that keeps growing: it discards its
/// memo as soon as the map reports a new revision.
#[derive(Debug, Clone)]
pub struct RenderSession {
    threshold: u64,
    revision: u64,
    memo: AHashMap<Word, String>,
}

impl RenderSession {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            revision: 0,
            memo: AHashMap::new(),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn cached(&self) -> usize {
        self.memo.len()
    }

    fn sync(&mut self, revision: u64) {
        if self.revision != revision {
            self.memo.clear();
            self.revision = revision;
        }
    }
}

impl Default for RenderSession {
    fn default() -> Self {
        Self::new(DEFAULT_SMALL_VALUE_THRESHOLD)
    }
}
