#![allow(dead_code)]

use evmtrace_decoder::{Decoded, Decoder, InstructionStep, Word, WORD_BYTES};

/// A toy stack machine that records a snapshot before every instruction,
/// the way a debugger endpoint does.
///
/// Only stack and memory shape are modelled; gas drops by a flat 3 per step.
pub struct Machine {
    stack: Vec<Word>,
    memory: Vec<u8>,
    depth: u32,
    pc: u64,
    gas: u64,
    steps: Vec<InstructionStep>,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl Machine {
    pub fn new(gas: u64) -> Self {
        Self {
            stack: vec![],
            memory: vec![],
            depth: 1,
            pc: 0,
            gas,
            steps: vec![],
        }
    }

    pub fn stack(&self) -> &[Word] {
        &self.stack
    }

    fn record(&mut self, op: &str, immediate: u64) {
        let memory = self.memory.chunks(WORD_BYTES).map(Word::from_bytes).collect();
        self.steps.push(InstructionStep {
            depth: self.depth,
            op: op.to_string(),
            pc: self.pc,
            gas: self.gas,
            gas_cost: 3,
            stack: self.stack.clone(),
            memory: Some(memory),
            ..Default::default()
        });
        self.pc += 1 + immediate;
        self.gas -= 3;
    }

    fn pop(&mut self) -> Word {
        self.stack.pop().expect("stack underflow in test program")
    }

    fn pop_usize(&mut self) -> usize {
        self.pop().to_u64().expect("small operand") as usize
    }

    pub fn push(&mut self, value: u64) -> &mut Self {
        let width = (8 - value.leading_zeros() as usize / 8).max(1);
        self.record(&format!("PUSH{width}"), width as u64);
        self.stack.push(Word::from_u64(value));
        self
    }

    pub fn add(&mut self) -> &mut Self {
        self.record("ADD", 0);
        let a = self.pop().to_u64().unwrap_or(u64::MAX);
        let b = self.pop().to_u64().unwrap_or(u64::MAX);
        self.stack.push(Word::from_u64(a.wrapping_add(b)));
        self
    }

    pub fn dup(&mut self, n: usize) -> &mut Self {
        self.record(&format!("DUP{n}"), 0);
        let value = self.stack[self.stack.len() - n].clone();
        self.stack.push(value);
        self
    }

    pub fn swap(&mut self, n: usize) -> &mut Self {
        self.record(&format!("SWAP{n}"), 0);
        let top = self.stack.len() - 1;
        self.stack.swap(top, top - n);
        self
    }

    pub fn discard(&mut self) -> &mut Self {
        self.record("POP", 0);
        self.pop();
        self
    }

    /// MSTORE: offset on top, value below.
    pub fn mstore(&mut self) -> &mut Self {
        self.record("MSTORE", 0);
        let offset = self.pop_usize();
        let value = self.pop();
        if self.memory.len() < offset + WORD_BYTES {
            let size = (offset + WORD_BYTES).div_ceil(WORD_BYTES) * WORD_BYTES;
            self.memory.resize(size, 0);
        }
        self.memory[offset..offset + WORD_BYTES].copy_from_slice(value.as_bytes());
        self
    }

    /// SHA3 with a caller-chosen digest: offset on top, size below.
    pub fn sha3(&mut self, digest: Word) -> &mut Self {
        self.record("SHA3", 0);
        self.pop();
        self.pop();
        self.stack.push(digest);
        self
    }

    /// Any instruction, by mnemonic, with an explicit stack effect.
    pub fn op(&mut self, mnemonic: &str, pops: usize, pushes: &[Word]) -> &mut Self {
        self.record(mnemonic, 0);
        for _ in 0..pops {
            self.pop();
        }
        self.stack.extend_from_slice(pushes);
        self
    }

    pub fn stop(&mut self) -> &mut Self {
        self.record("STOP", 0);
        self
    }

    pub fn steps(&self) -> Vec<InstructionStep> {
        self.steps.clone()
    }
}

/// Decodes every step with the following step's stack as lookahead.
pub fn decode_all(decoder: &mut Decoder, steps: &[InstructionStep]) -> Vec<Decoded> {
    steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            let next = steps.get(i + 1).map(|s| s.stack.as_slice());
            decoder.decode(step, next)
        })
        .collect()
}
