use std::{collections::BTreeMap, fmt};

use serde::Serialize;

use crate::annotated::AnnotatedStep;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpcodeGas {
    pub count: u64,
    pub total_gas: u64,
}

impl OpcodeGas {
    fn record(&mut self, gas: u64) {
        self.total_gas += gas;
        self.count += 1;
    }

    pub fn average_gas(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_gas as f64 / self.count as f64
        }
    }
}

/// Corrected gas per mnemonic over a sequence of annotated steps.
#[derive(Debug, Default, Clone, Serialize)]
pub struct GasProfile {
    by_op: BTreeMap<String, OpcodeGas>,
}

impl GasProfile {
    pub fn from_steps<'a>(steps: impl IntoIterator<Item = &'a AnnotatedStep>) -> Self {
        let mut profile = Self::default();
        for step in steps {
            profile
                .by_op
                .entry(step.op().to_string())
                .or_default()
                .record(step.corrected_gas_cost);
        }
        profile
    }

    pub fn get(&self, op: &str) -> Option<OpcodeGas> {
        self.by_op.get(op).copied()
    }

    pub fn total_gas(&self) -> u64 {
        self.by_op.values().map(|stats| stats.total_gas).sum()
    }

    pub fn steps(&self) -> u64 {
        self.by_op.values().map(|stats| stats.count).sum()
    }

    /// Mnemonics ordered by total gas, most expensive first.
    pub fn ranked(&self) -> Vec<(&str, OpcodeGas)> {
        let mut ranked: Vec<_> = self.by_op.iter().map(|(op, s)| (op.as_str(), *s)).collect();
        ranked.sort_by(|a, b| b.1.total_gas.cmp(&a.1.total_gas).then(a.0.cmp(b.0)));
        ranked
    }
}

impl fmt::Display for GasProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<16}{:>10}{:>14}{:>12}", "Opcode", "Count", "Gas", "Average")?;
        for (op, stats) in self.ranked() {
            writeln!(
                f,
                "{:<16}{:>10}{:>14}{:>12.2}",
                op,
                stats.count,
                stats.total_gas,
                stats.average_gas()
            )?;
        }
        write!(f, "{:<16}{:>10}{:>14}", "Total", self.steps(), self.total_gas())
    }
}

#[cfg(test)]
mod tests {
    use evmtrace_decoder::InstructionStep;

    use super::*;

    fn costing(op: &str, gas: u64) -> AnnotatedStep {
        AnnotatedStep {
            index: 0,
            step: InstructionStep {
                op: op.to_string(),
                ..Default::default()
            },
            description: op.to_string(),
            operand_words: vec![],
            result_words: vec![],
            corrected_gas_cost: gas,
            contract_address: None,
            call_depth_index: 0,
            source_snippet: None,
            source_location_label: None,
            previous: None,
        }
    }

    #[test]
    fn test_profile_totals() {
        let steps = [
            costing("PUSH1", 3),
            costing("SSTORE", 20_000),
            costing("PUSH1", 3),
            costing("STOP", 0),
        ];
        let profile = GasProfile::from_steps(&steps);

        assert_eq!(profile.get("PUSH1"), Some(OpcodeGas { count: 2, total_gas: 6 }));
        assert_eq!(profile.total_gas(), 20_006);
        assert_eq!(profile.steps(), 4);
        assert_eq!(profile.ranked()[0].0, "SSTORE");
        assert_eq!(profile.ranked()[2].0, "STOP");
        assert!(profile.get("ADD").is_none());
    }
}
