use std::{
    io::Write,
    panic::{catch_unwind, AssertUnwindSafe},
};

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use crate::{
    annotated::{AnnotatedStep, AnnotatedTrace, TraceInfo},
    error::TraceError,
};

/// A consumer of finished traces. Sinks only ever see shared references.
pub trait TraceSink: Sync {
    /// Called for every step that survived the post-filter, in order.
    fn on_step(&self, _step: &AnnotatedStep, _info: &TraceInfo) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once with the whole trace, after every `on_step`.
    fn on_trace(&self, _trace: &AnnotatedTrace) -> anyhow::Result<()> {
        Ok(())
    }
}

fn run(sink: &dyn TraceSink, trace: &AnnotatedTrace) -> anyhow::Result<()> {
    for step in &trace.steps {
        sink.on_step(step, &trace.info)?;
    }
    sink.on_trace(trace)
}

fn panicked() -> anyhow::Error {
    anyhow!("trace sink panicked")
}

/// Hands `trace` to every sink, each on its own thread when `concurrent`.
/// The first failure, or panic, is reported once all sinks have finished.
#[instrument(level = "debug", skip_all, fields(sinks = sinks.len()))]
pub fn deliver(
    trace: &AnnotatedTrace,
    sinks: &[&dyn TraceSink],
    concurrent: bool,
) -> Result<(), TraceError> {
    let results: Vec<anyhow::Result<()>> = if concurrent && sinks.len() > 1 {
        std::thread::scope(|s| {
            let handles: Vec<_> = sinks
                .iter()
                .map(|&sink| s.spawn(move || run(sink, trace)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(panicked()))
                })
                .collect()
        })
    } else {
        sinks
            .iter()
            .map(|&sink| {
                catch_unwind(AssertUnwindSafe(|| run(sink, trace)))
                    .unwrap_or_else(|_| Err(panicked()))
            })
            .collect()
    };

    debug!("delivered to sinks");
    results
        .into_iter()
        .collect::<anyhow::Result<()>>()
        .map_err(|e| TraceError::Sink(e.into()))
}

/// Writes each step's human-readable form.
pub struct PrintSink<W> {
    out: Mutex<W>,
}

impl<W: Write + Send> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> TraceSink for PrintSink<W> {
    fn on_step(&self, step: &AnnotatedStep, _info: &TraceInfo) -> anyhow::Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{step}")?;
        if step.has_source() {
            writeln!(out)?;
        }
        Ok(())
    }

    fn on_trace(&self, _trace: &AnnotatedTrace) -> anyhow::Result<()> {
        self.out.lock().flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use evmtrace_decoder::InstructionStep;

    use super::*;

    #[derive(Default)]
    struct Counter {
        steps: AtomicUsize,
        traces: AtomicUsize,
    }

    impl TraceSink for Counter {
        fn on_step(&self, _: &AnnotatedStep, _: &TraceInfo) -> anyhow::Result<()> {
            self.steps.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn on_trace(&self, _: &AnnotatedTrace) -> anyhow::Result<()> {
            self.traces.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl TraceSink for Failing {
        fn on_trace(&self, _: &AnnotatedTrace) -> anyhow::Result<()> {
            Err(anyhow!("disk full"))
        }
    }

    struct Panicking;

    impl TraceSink for Panicking {
        fn on_trace(&self, _: &AnnotatedTrace) -> anyhow::Result<()> {
            panic!("sink bug")
        }
    }

    fn trace_of(ops: &[&str]) -> AnnotatedTrace {
        let steps = ops
            .iter()
            .enumerate()
            .map(|(index, op)| AnnotatedStep {
                index,
                step: InstructionStep {
                    op: op.to_string(),
                    ..Default::default()
                },
                description: op.to_string(),
                operand_words: vec![],
                result_words: vec![],
                corrected_gas_cost: 0,
                contract_address: None,
                call_depth_index: 0,
                source_snippet: None,
                source_location_label: None,
                previous: None,
            })
            .collect();
        AnnotatedTrace {
            steps,
            ..Default::default()
        }
    }

    #[test]
    fn test_every_sink_sees_every_step() {
        let trace = trace_of(&["PUSH1", "PUSH1", "ADD"]);
        let (a, b) = (Counter::default(), Counter::default());

        for concurrent in [true, false] {
            deliver(&trace, &[&a, &b], concurrent).unwrap();
        }

        assert_eq!(a.steps.load(Ordering::SeqCst), 6);
        assert_eq!(b.traces.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failures_surface_after_all_sinks_ran() {
        let trace = trace_of(&["STOP"]);
        let counter = Counter::default();

        let failing: [&dyn TraceSink; 2] = [&Failing, &counter];
        let panicking: [&dyn TraceSink; 2] = [&Panicking, &counter];
        for sinks in [failing, panicking] {
            assert!(matches!(
                deliver(&trace, &sinks, true),
                Err(TraceError::Sink(_))
            ));
        }
        assert_eq!(counter.traces.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_sink_is_an_error_when_delivered_in_order() {
        let trace = trace_of(&["STOP"]);
        let counter = Counter::default();

        for concurrent in [true, false] {
            let result = deliver(&trace, &[&Panicking], concurrent);
            assert!(
                matches!(&result, Err(TraceError::Sink(e)) if e.to_string() == "trace sink panicked")
            );
        }
        assert!(matches!(
            deliver(&trace, &[&Panicking, &counter], false),
            Err(TraceError::Sink(_))
        ));
        assert_eq!(counter.traces.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_print_sink() {
        colored::control::set_override(false);
        let sink = PrintSink::new(Vec::new());
        deliver(&trace_of(&["PUSH1", "STOP"]), &[&sink], false).unwrap();

        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "PUSH1\nSTOP\n");
    }
}
