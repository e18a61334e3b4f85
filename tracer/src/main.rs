use std::{fs, io, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::Parser;
use evmtrace::{
    init_logger, load_constants, AnnotatedStep, ArtifactMaterials, ArtifactStore, GasProfile,
    MaterialsSource, NoMaterials, PrintSink, Receipt, RecordedEndpoint, StaticCode, TraceOptions,
    Tracer, TracerConfig,
};
use evmtrace_decoder::{Address, RawTrace};

#[derive(Parser)]
#[clap(name = "evmtrace", about = "Annotate an EVM debugger trace")]
struct Opts {
    /// `debug_traceTransaction` output, bare or inside its JSON-RPC response.
    #[clap(long)]
    trace: PathBuf,
    /// Transaction receipt naming the entry contract.
    #[clap(long, conflicts_with = "entry")]
    receipt: Option<PathBuf>,
    /// Entry contract, when no receipt is at hand.
    #[clap(long)]
    entry: Option<Address>,
    /// The entry contract is being created by the transaction.
    #[clap(long, requires = "entry")]
    creation: bool,
    /// `solc --combined-json bin,bin-runtime,srcmap,srcmap-runtime,metadata` output.
    #[clap(long, requires = "code")]
    artifacts: Option<PathBuf>,
    /// `{"0xaddress": "0xbytecode"}` table of deployed code.
    #[clap(long)]
    code: Option<PathBuf>,
    /// `{"NAME": "0xvalue"}` table of named constants.
    #[clap(long)]
    constants: Option<PathBuf>,
    #[clap(long)]
    config: Option<PathBuf>,
    /// Only annotate steps with this mnemonic. Repeatable.
    #[clap(long = "op")]
    ops: Vec<String>,
    /// Only keep steps with source context.
    #[clap(long)]
    source_only: bool,
    /// Values below this print as literals.
    #[clap(long)]
    threshold: Option<u64>,
    #[clap(long)]
    no_color: bool,
    /// Print annotated steps as JSON instead of text.
    #[clap(long)]
    json: bool,
    /// Print corrected gas per opcode.
    #[clap(long)]
    gas_summary: bool,
}

fn receipt(opts: &Opts) -> anyhow::Result<Receipt> {
    match (&opts.receipt, opts.entry) {
        (Some(path), _) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading receipt {}", path.display()))?;
            Ok(serde_json::from_str(&contents)?)
        }
        (None, Some(address)) if opts.creation => Ok(Receipt {
            contract_address: Some(address),
            ..Default::default()
        }),
        (None, Some(address)) => Ok(Receipt {
            to: Some(address),
            ..Default::default()
        }),
        (None, None) => bail!("one of --receipt or --entry is required"),
    }
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    let _guard = init_logger()?;
    if opts.no_color {
        colored::control::set_override(false);
    }

    let mut config = match &opts.config {
        Some(path) => TracerConfig::load(path)?,
        None => TracerConfig::default(),
    };
    if let Some(threshold) = opts.threshold {
        config.small_value_threshold = threshold;
    }

    let contents = fs::read_to_string(&opts.trace)
        .with_context(|| format!("reading trace {}", opts.trace.display()))?;
    let raw = RawTrace::from_json(&contents).context("parsing trace")?;
    let receipt = receipt(&opts)?;
    let endpoint = RecordedEndpoint::new().with_trace(receipt.transaction_hash, raw);

    let materials: Arc<dyn MaterialsSource> = match (&opts.artifacts, &opts.code) {
        (Some(artifacts), Some(code)) => Arc::new(ArtifactMaterials::new(
            StaticCode::load(code)?,
            ArtifactStore::load(artifacts)
                .with_context(|| format!("loading artifacts {}", artifacts.display()))?,
        )),
        _ => Arc::new(NoMaterials),
    };

    let constants = match &opts.constants {
        Some(path) => load_constants(path)?,
        None => Default::default(),
    };
    let ops: Vec<String> = opts.ops.iter().map(|op| op.to_uppercase()).collect();
    let printer = PrintSink::new(io::stdout());

    let mut options = TraceOptions::default().with_constants(constants);
    if !ops.is_empty() {
        options = options.pre_filter(|step| ops.iter().any(|op| *op == step.op));
    }
    if opts.source_only {
        options = options.post_filter(AnnotatedStep::has_source);
    }
    if !opts.json {
        options = options.sink(&printer);
    }

    let tracer = Tracer::new(Arc::new(endpoint), materials, config);
    let trace = tracer.trace(&receipt, &options)?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&trace.steps)?);
    }
    if opts.gas_summary {
        println!("{}", GasProfile::from_steps(&trace.steps));
        println!("Reported gas used: {}", trace.gas);
    }
    if trace.failed {
        println!("Transaction reverted: {}", trace.return_value);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use evmtrace_decoder::TxHash;

    use super::*;

    #[test]
    fn test_entry_flags() {
        let opts = Opts::parse_from([
            "evmtrace",
            "--trace",
            "trace.json",
            "--entry",
            "0x2222222222222222222222222222222222222222",
            "--creation",
            "--op",
            "sload",
            "--op",
            "SSTORE",
        ]);

        let receipt = receipt(&opts).unwrap();
        assert_eq!(receipt.contract_address, Some(Address([0x22; 20])));
        assert_eq!(receipt.transaction_hash, TxHash::default());
        assert_eq!(opts.ops, ["sload", "SSTORE"]);
    }

    #[test]
    fn test_receipt_conflicts_with_entry() {
        assert!(Opts::try_parse_from([
            "evmtrace",
            "--trace",
            "t.json",
            "--receipt",
            "r.json",
            "--entry",
            "0x2222222222222222222222222222222222222222",
        ])
        .is_err());
    }
}
