use pest::{iterators::Pair, Parser};
use thiserror::Error;

#[derive(pest_derive::Parser)]
#[grammar = "source/srcmap.pest"]
pub(crate) struct SourceMapParser;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceMapError {
    #[error("Malformed source map: {0}")]
    Syntax(String),

    #[error("Source map entry {entry} has out-of-range value `{value}`")]
    BadNumber { entry: usize, value: String },
}

/// How an instruction moves control flow, as annotated by the compiler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JumpType {
    IntoFunction,
    OutOfFunction,
    #[default]
    Regular,
}

/// One decompressed source-map entry; the i-th entry belongs to the i-th
/// instruction of the bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapEntry {
    /// Byte offset into the source file.
    pub offset: u32,
    /// Length in bytes.
    pub length: u32,
    /// Source file index, or -1 for compiler-generated code.
    pub file: i32,
    pub jump: JumpType,
    pub modifier_depth: u32,
}

impl Default for SourceMapEntry {
    fn default() -> Self {
        Self {
            offset: 0,
            length: 0,
            file: -1,
            jump: JumpType::Regular,
            modifier_depth: 0,
        }
    }
}

fn number<T: std::str::FromStr>(pair: &Pair<'_, Rule>, entry: usize) -> Result<T, SourceMapError> {
    pair.as_str().parse().map_err(|_| SourceMapError::BadNumber {
        entry,
        value: pair.as_str().to_string(),
    })
}

/// Decompresses a solc source map. Fields left empty repeat the value of the
/// previous entry.
pub fn parse_source_map(input: &str) -> Result<Vec<SourceMapEntry>, SourceMapError> {
    let source_map = SourceMapParser::parse(Rule::source_map, input.trim())
        .map_err(|e| SourceMapError::Syntax(e.to_string()))?
        .next()
        .ok_or_else(|| SourceMapError::Syntax("empty input".to_string()))?;

    let mut entries = Vec::new();
    let mut current = SourceMapEntry::default();

    for (index, entry) in source_map
        .into_inner()
        .filter(|pair| pair.as_rule() == Rule::entry)
        .enumerate()
    {
        for field in entry.into_inner() {
            match field.as_rule() {
                Rule::offset => current.offset = number(&field, index)?,
                Rule::length => current.length = number(&field, index)?,
                Rule::file => current.file = number(&field, index)?,
                Rule::modifier_depth => current.modifier_depth = number(&field, index)?,
                Rule::jump => {
                    current.jump = match field.as_str() {
                        "i" => JumpType::IntoFunction,
                        "o" => JumpType::OutOfFunction,
                        _ => JumpType::Regular,
                    }
                }
                _ => unreachable!("entry only contains field rules"),
            }
        }
        entries.push(current);
    }

    Ok(entries)
}
