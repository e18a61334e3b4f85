use std::{collections::BTreeMap, fs, path::Path};

use anyhow::Context;
use evmtrace_decoder::{Highlight, InstructionStep, RawTrace, Word, DEFAULT_SMALL_VALUE_THRESHOLD};
use serde::{Deserialize, Serialize};

use crate::{annotated::AnnotatedStep, sink::TraceSink};

/// Settings fixed for the lifetime of a [`crate::Tracer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct TracerConfig {
    /// Values below this render as plain literals.
    pub small_value_threshold: u64,
    pub highlight: Highlight,
    /// Run sinks on their own threads instead of one after another.
    pub concurrent_sinks: bool,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            small_value_threshold: DEFAULT_SMALL_VALUE_THRESHOLD,
            highlight: Highlight::Ansi,
            concurrent_sinks: true,
        }
    }
}

impl TracerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Reads a `{"NAME": "0x..."}` table of named constants.
pub fn load_constants(path: &Path) -> anyhow::Result<BTreeMap<String, Word>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading constants {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing constants {}", path.display()))
}

pub type StepFilter<'a> = Box<dyn Fn(&InstructionStep) -> bool + 'a>;
pub type AnnotatedFilter<'a> = Box<dyn Fn(&AnnotatedStep) -> bool + 'a>;
pub type RawTraceHook<'a> = Box<dyn Fn(&RawTrace) + 'a>;

/// Per-call options for [`crate::Tracer::trace`].
#[derive(Default)]
pub struct TraceOptions<'a> {
    /// Seeds the inversion map.
    pub constants: BTreeMap<String, Word>,
    /// Selects which raw steps are annotated and returned. Steps that enter
    /// or leave a call frame are always kept.
    pub pre_filter: Option<StepFilter<'a>>,
    pub post_filter: Option<AnnotatedFilter<'a>>,
    pub sinks: Vec<&'a dyn TraceSink>,
    pub on_raw_trace: Option<RawTraceHook<'a>>,
}

impl<'a> TraceOptions<'a> {
    pub fn with_constants(mut self, constants: BTreeMap<String, Word>) -> Self {
        self.constants = constants;
        self
    }

    pub fn with_constant(mut self, name: impl Into<String>, value: Word) -> Self {
        self.constants.insert(name.into(), value);
        self
    }

    pub fn pre_filter(mut self, filter: impl Fn(&InstructionStep) -> bool + 'a) -> Self {
        self.pre_filter = Some(Box::new(filter));
        self
    }

    pub fn post_filter(mut self, filter: impl Fn(&AnnotatedStep) -> bool + 'a) -> Self {
        self.post_filter = Some(Box::new(filter));
        self
    }

    pub fn sink(mut self, sink: &'a dyn TraceSink) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn on_raw_trace(mut self, hook: impl Fn(&RawTrace) + 'a) -> Self {
        self.on_raw_trace = Some(Box::new(hook));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TracerConfig =
            serde_json::from_str(r#"{"small_value_threshold": 256, "highlight": "none"}"#).unwrap();

        assert_eq!(config.small_value_threshold, 256);
        assert_eq!(config.highlight, Highlight::None);
        assert!(config.concurrent_sinks);
    }

    #[test]
    fn test_delimited_highlight() {
        let config: TracerConfig = serde_json::from_str(
            r#"{"highlight": {"delimited": {"open": ">>", "close": "<<"}}}"#,
        )
        .unwrap();

        assert_eq!(
            config.highlight,
            Highlight::Delimited {
                open: ">>".to_string(),
                close: "<<".to_string()
            }
        );
    }

    #[test]
    fn test_constants_table() {
        let constants: BTreeMap<String, Word> =
            serde_json::from_str(r#"{"TRANSFER": "0xa9059cbb"}"#).unwrap();

        assert_eq!(constants["TRANSFER"], Word::from_u64(0xa9059cbb));
    }
}
