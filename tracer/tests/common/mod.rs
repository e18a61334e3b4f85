#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::anyhow;
use evmtrace::{EntryPoint, MaterialsSource};
use evmtrace_decoder::{Address, CallTraceMaterials, InstructionStep, RawTrace, Word};

pub fn address(byte: u8) -> Address {
    Address([byte; 20])
}

pub fn call_into(address: Address) -> EntryPoint {
    EntryPoint {
        address,
        is_creation: false,
    }
}

/// Records debugger snapshots with explicit depth and gas columns.
pub struct TraceBuilder {
    steps: Vec<InstructionStep>,
    stack: Vec<Word>,
    saved: Vec<Vec<Word>>,
    depth: u32,
    pc: u64,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::at_depth(1)
    }
}

impl TraceBuilder {
    pub fn at_depth(depth: u32) -> Self {
        Self {
            steps: vec![],
            stack: vec![],
            saved: vec![],
            depth,
            pc: 0,
        }
    }

    /// Records `op` with `gas` left, reporting `gas_cost` the way the
    /// endpoint does.
    pub fn step(&mut self, op: &str, gas: u64, gas_cost: u64) -> &mut Self {
        self.steps.push(InstructionStep {
            depth: self.depth,
            op: op.to_string(),
            pc: self.pc,
            gas,
            gas_cost,
            stack: self.stack.clone(),
            ..Default::default()
        });
        self.pc += 1;
        self
    }

    /// Stack seen by the following steps.
    pub fn with_stack(&mut self, stack: Vec<Word>) -> &mut Self {
        self.stack = stack;
        self
    }

    /// A CALL to `callee`, followed by steps one level deeper.
    pub fn call(&mut self, callee: Address, gas: u64, gas_cost: u64) -> &mut Self {
        self.stack.push(Word::from(callee));
        self.stack.push(Word::from_u64(gas));
        self.step("CALL", gas, gas_cost);
        self.stack.truncate(self.stack.len() - 2);
        self.enter()
    }

    pub fn enter(&mut self) -> &mut Self {
        self.saved.push(std::mem::take(&mut self.stack));
        self.depth += 1;
        self.pc = 0;
        self
    }

    pub fn leave(&mut self) -> &mut Self {
        self.stack = self.saved.pop().unwrap_or_default();
        self.stack.push(Word::from_u64(1));
        self.depth -= 1;
        self
    }

    pub fn build(&self) -> RawTrace {
        RawTrace {
            gas: self
                .steps
                .first()
                .zip(self.steps.last())
                .map_or(0, |(first, last)| first.gas - last.gas),
            struct_logs: self.steps.clone(),
            ..Default::default()
        }
    }
}

/// Serves empty materials for every address except `missing`, and fails
/// for `broken`, counting every fetch.
#[derive(Default)]
pub struct CountingMaterials {
    pub fetches: AtomicUsize,
    pub missing: Option<Address>,
    pub broken: Option<Address>,
}

impl CountingMaterials {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl MaterialsSource for CountingMaterials {
    fn fetch(
        &self,
        address: &Address,
        _is_creation: bool,
    ) -> anyhow::Result<Option<CallTraceMaterials>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken == Some(*address) {
            return Err(anyhow!("node unavailable"));
        }
        if self.missing == Some(*address) {
            return Ok(None);
        }
        Ok(Some(CallTraceMaterials::default()))
    }
}
