//! The Trace Pipeline: folds a raw trace through the decoder while
//! tracking call frames, correcting gas and attaching source context.

use std::sync::Arc;

use evmtrace_decoder::{
    Address, CallTraceMaterials, Decoder, InstructionStep, InversionMap, RawTrace, Word,
};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    annotated::{AnnotatedStep, AnnotatedTrace, Diagnostic, TraceInfo},
    config::{TraceOptions, TracerConfig},
    endpoint::{DebugEndpoint, EntryPoint, Receipt},
    error::TraceError,
    materials::{MaterialsCache, MaterialsSource},
    sink::deliver,
};

/// One entry of the call-frame stack.
#[derive(Debug, Clone, Default)]
struct CallFrame {
    /// `None` inside creation frames, where the new address is not yet on
    /// the stack.
    address: Option<Address>,
    materials: Option<Arc<CallTraceMaterials>>,
    /// Gas available to the first step inside the frame.
    gas_at_call_site: u64,
    /// Position in the output of the step that opened the frame.
    call_index: Option<usize>,
}

pub struct Tracer {
    endpoint: Arc<dyn DebugEndpoint>,
    materials: Arc<dyn MaterialsSource>,
    cache: MaterialsCache,
    config: TracerConfig,
}

impl Tracer {
    pub fn new(
        endpoint: Arc<dyn DebugEndpoint>,
        materials: Arc<dyn MaterialsSource>,
        config: TracerConfig,
    ) -> Self {
        Self {
            endpoint,
            materials,
            cache: MaterialsCache::new(),
            config,
        }
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Number of contracts whose materials are memoised.
    pub fn cached_materials(&self) -> usize {
        self.cache.cached()
    }

    /// Fetches the trace of the receipt's transaction and annotates it.
    #[instrument(skip_all, fields(tx = %receipt.transaction_hash))]
    pub fn trace(
        &self,
        receipt: &Receipt,
        options: &TraceOptions<'_>,
    ) -> Result<AnnotatedTrace, TraceError> {
        let entry = receipt.entry()?;
        let raw = self
            .endpoint
            .trace_transaction(&receipt.transaction_hash)
            .map_err(|e| TraceError::Endpoint(e.into()))?;
        self.trace_raw(entry, raw, options)
    }

    /// Annotates an already fetched trace whose execution starts at `entry`.
    #[instrument(
        skip_all,
        fields(entry = %entry.address, creation = entry.is_creation, steps = raw.struct_logs.len())
    )]
    pub fn trace_raw(
        &self,
        entry: EntryPoint,
        raw: RawTrace,
        options: &TraceOptions<'_>,
    ) -> Result<AnnotatedTrace, TraceError> {
        let mut diagnostics = Vec::new();
        let entry_materials =
            self.materials_for(&entry.address, entry.is_creation, None, &mut diagnostics)?;

        if let Some(hook) = &options.on_raw_trace {
            hook(&raw);
        }

        let mut decoder = Decoder::new(
            InversionMap::with_constants(options.constants.clone()),
            self.config.small_value_threshold,
        );
        let mut frames = vec![CallFrame {
            address: Some(entry.address),
            materials: entry_materials,
            ..Default::default()
        }];
        let mut annotated: Vec<AnnotatedStep> = Vec::new();
        let steps = &raw.struct_logs;

        for (index, step) in steps.iter().enumerate() {
            let next = steps.get(index + 1);
            let decoded = decoder.decode(step, next.map(|n| n.stack.as_slice()));
            trace!(index, description = %decoded.description, "decoded");
            if !decoded.modeled {
                diagnostics.push(Diagnostic::DecodeUnmodeled {
                    step: index,
                    op: step.op.clone(),
                });
            }

            let boundary = next.is_some_and(|next| next.depth != step.depth);
            let included = boundary || options.pre_filter.as_ref().map_or(true, |keep| keep(step));

            // The executing frame, read before any transition below.
            let (contract_address, call_depth_index, source) = {
                let frame = frames.last().ok_or_else(|| underflow(index, step))?;
                let source = frame
                    .materials
                    .as_deref()
                    .filter(|_| included)
                    .and_then(|materials| materials.resolve(step.pc, &self.config.highlight));
                (frame.address, frames.len() - 1, source)
            };

            let corrected_gas_cost = match next {
                None => 0,
                Some(next) if next.depth > step.depth => {
                    self.enter(index, step, next, annotated.len(), &mut frames, &mut diagnostics)?;
                    // Provisional; replaced once the frame returns.
                    next.gas_cost
                }
                Some(next) if next.depth < step.depth => {
                    exit(index, step, next, &mut frames, &mut annotated)?;
                    0
                }
                Some(next) => next.gas_cost,
            };

            if !included {
                continue;
            }
            let (source_snippet, source_location_label) = match source {
                Some(context) => (Some(context.snippet), Some(context.label)),
                None => (None, None),
            };
            annotated.push(AnnotatedStep {
                index,
                step: step.clone(),
                description: decoded.description,
                operand_words: decoded.operands,
                result_words: decoded.results,
                corrected_gas_cost,
                contract_address,
                call_depth_index,
                source_snippet,
                source_location_label,
                previous: None,
            });
        }

        if let Some(keep) = &options.post_filter {
            annotated.retain(|step| keep(step));
        }
        let mut previous = None;
        for step in &mut annotated {
            step.previous = previous;
            previous = Some(step.index);
        }

        let opaque = diagnostics
            .iter()
            .filter(|d| matches!(d, Diagnostic::DecodeUnmodeled { .. }))
            .count();
        if opaque > 0 {
            warn!(opaque, "some steps decoded as opaque instructions");
        }

        let (inversion, preimages) = decoder.into_parts();
        let trace = AnnotatedTrace {
            steps: annotated,
            gas: raw.gas,
            failed: raw.failed,
            return_value: raw.return_value,
            info: TraceInfo {
                inversion,
                preimages,
                diagnostics,
                small_value_threshold: self.config.small_value_threshold,
            },
        };

        deliver(&trace, &options.sinks, self.config.concurrent_sinks)?;
        info!(
            annotated = trace.steps.len(),
            gas = trace.gas,
            diagnostics = trace.info.diagnostics.len(),
            "trace annotated"
        );
        Ok(trace)
    }

    /// Opens the frame(s) entered after `step`. The step itself will be
    /// stored at `call_index`.
    fn enter(
        &self,
        index: usize,
        step: &InstructionStep,
        next: &InstructionStep,
        call_index: usize,
        frames: &mut Vec<CallFrame>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), TraceError> {
        let address = match step.opcode() {
            Some(op) if op.is_call() => step.stack_from_top(1).map(Word::to_address),
            _ => None,
        };
        let materials = match &address {
            Some(address) => self.materials_for(address, false, Some(index), diagnostics)?,
            None => None,
        };
        debug!(index, op = %step.op, callee = ?address, depth = next.depth, "entering call frame");

        // A trace never skips a level; if one does, the gap is filled with
        // anonymous frames so exits still balance.
        for _ in step.depth + 1..next.depth {
            frames.push(CallFrame::default());
        }
        frames.push(CallFrame {
            address,
            materials,
            gas_at_call_site: next.gas,
            call_index: Some(call_index),
        });
        Ok(())
    }

    fn materials_for(
        &self,
        address: &Address,
        is_creation: bool,
        step: Option<usize>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<Arc<CallTraceMaterials>>, TraceError> {
        match self.cache.get(self.materials.as_ref(), address, is_creation) {
            Ok(Some(materials)) => Ok(Some(materials)),
            Ok(None) => {
                warn!(%address, "no source materials, continuing without source context");
                diagnostics.push(Diagnostic::MaterialsUnavailable {
                    address: *address,
                    step,
                });
                Ok(None)
            }
            Err(source) => Err(TraceError::MaterialsFetchFailed {
                address: *address,
                source: source.into(),
            }),
        }
    }
}

fn underflow(index: usize, step: &InstructionStep) -> TraceError {
    TraceError::FrameStackUnderflow {
        step: index,
        pc: step.pc,
        op: step.op.clone(),
    }
}

/// Closes the frame(s) left after `step` and charges each opening step
/// with the gas its whole sub-call consumed.
fn exit(
    index: usize,
    step: &InstructionStep,
    next: &InstructionStep,
    frames: &mut Vec<CallFrame>,
    annotated: &mut [AnnotatedStep],
) -> Result<(), TraceError> {
    for _ in next.depth..step.depth {
        let frame = match frames.pop() {
            Some(frame) if !frames.is_empty() => frame,
            _ => return Err(underflow(index, step)),
        };
        let consumed = frame.gas_at_call_site.saturating_sub(next.gas);
        if let Some(call) = frame.call_index.and_then(|i| annotated.get_mut(i)) {
            call.corrected_gas_cost = consumed;
        }
        debug!(index, op = %step.op, consumed, depth = next.depth, "leaving call frame");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use evmtrace_decoder::TxHash;

    use super::*;
    use crate::{endpoint::RecordedEndpoint, materials::NoMaterials};

    fn step(depth: u32, op: &str, gas: u64, gas_cost: u64) -> InstructionStep {
        InstructionStep {
            depth,
            op: op.to_string(),
            gas,
            gas_cost,
            ..Default::default()
        }
    }

    fn tracer() -> Tracer {
        Tracer::new(
            Arc::new(RecordedEndpoint::new()),
            Arc::new(NoMaterials),
            TracerConfig::default(),
        )
    }

    fn entry() -> EntryPoint {
        EntryPoint {
            address: Address([0xaa; 20]),
            is_creation: false,
        }
    }

    fn raw(steps: Vec<InstructionStep>) -> RawTrace {
        RawTrace {
            struct_logs: steps,
            ..Default::default()
        }
    }

    #[test]
    fn test_costs_look_ahead_one_step() {
        let trace = tracer()
            .trace_raw(
                entry(),
                raw(vec![
                    step(1, "PUSH1", 100, 0),
                    step(1, "PUSH1", 97, 3),
                    step(1, "STOP", 94, 3),
                ]),
                &TraceOptions::default(),
            )
            .unwrap();

        let costs: Vec<_> = trace.steps.iter().map(|s| s.corrected_gas_cost).collect();
        assert_eq!(costs, [3, 3, 0]);
        assert_eq!(trace.steps[2].previous, Some(1));
        assert_eq!(trace.steps[0].contract_address, Some(Address([0xaa; 20])));
    }

    #[test]
    fn test_return_without_call_is_fatal() {
        let result = tracer().trace_raw(
            entry(),
            raw(vec![step(2, "RETURN", 50, 0), step(1, "STOP", 40, 0)]),
            &TraceOptions::default(),
        );

        assert!(matches!(
            result,
            Err(TraceError::FrameStackUnderflow { step: 0, ref op, .. }) if op == "RETURN"
        ));
    }

    #[test]
    fn test_unknown_transaction() {
        let receipt = Receipt {
            transaction_hash: TxHash([7; 32]),
            to: Some(Address([1; 20])),
            contract_address: None,
        };

        assert!(matches!(
            tracer().trace(&receipt, &TraceOptions::default()),
            Err(TraceError::Endpoint(_))
        ));
    }

    #[test]
    fn test_unmodeled_steps_are_reported() {
        let trace = tracer()
            .trace_raw(
                entry(),
                raw(vec![step(1, "NOTANOP", 10, 0), step(1, "STOP", 10, 0)]),
                &TraceOptions::default(),
            )
            .unwrap();

        assert_eq!(trace.steps[0].description, "NOTANOP");
        assert!(trace.info.diagnostics.contains(&Diagnostic::DecodeUnmodeled {
            step: 0,
            op: "NOTANOP".to_string()
        }));
    }
}
