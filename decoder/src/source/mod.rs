//! Correlates program counters with the source code they were compiled
//! from.

use std::fmt;

use ahash::AHashMap;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::debug;

mod srcmap;

pub use srcmap::{parse_source_map, JumpType, SourceMapEntry, SourceMapError};

use crate::opcodes::Opcode;

/// A position in a source file: 1-based line, 0-based character column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LineColumn {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub file: String,
    pub start: LineColumn,
    pub end: LineColumn,
}

impl SourceRange {
    /// `file:line[col-col]` on one line, `file:line[col]-line[col]` across
    /// lines.
    pub fn label(&self) -> String {
        if self.start.line == self.end.line {
            format!(
                "{}:{}[{}-{}]",
                self.file, self.start.line, self.start.column, self.end.column
            )
        } else {
            format!(
                "{}:{}[{}]-{}[{}]",
                self.file, self.start.line, self.start.column, self.end.line, self.end.column
            )
        }
    }
}

/// How the mapped span is marked inside a snippet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Highlight {
    /// Bright blue terminal colour.
    #[default]
    Ansi,
    Delimited {
        open: String,
        close: String,
    },
    None,
}

impl Highlight {
    fn apply(&self, text: &str) -> String {
        match self {
            Highlight::Ansi => text.bright_blue().to_string(),
            Highlight::Delimited { open, close } => format!("{open}{text}{close}"),
            Highlight::None => text.to_string(),
        }
    }
}

/// A compiled source file as referenced by a source map's file index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// The highlighted source behind one program counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContext {
    pub snippet: String,
    pub label: String,
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.label, self.snippet.trim())
    }
}

/// Everything needed to correlate one contract's program counters with
/// source: the PC table and the source files split into lines.
#[derive(Debug, Clone, Default)]
pub struct CallTraceMaterials {
    pc_to_source: AHashMap<u64, SourceRange>,
    sources: AHashMap<String, Vec<String>>,
}

impl CallTraceMaterials {
    pub fn new(
        pc_to_source: AHashMap<u64, SourceRange>,
        sources: AHashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            pc_to_source,
            sources,
        }
    }

    /// Builds materials from bytecode and the source map compiled for it.
    /// `files` is indexed by the source map's file index; entries pointing
    /// at files without content stay unmapped.
    pub fn from_compiled(
        bytecode: &[u8],
        source_map: &str,
        files: &[SourceFile],
    ) -> Result<Self, SourceMapError> {
        let entries = parse_source_map(source_map)?;
        let indices: Vec<LineIndex> = files.iter().map(|f| LineIndex::new(&f.content)).collect();

        let mut pc_to_source = AHashMap::new();
        let mut pc = 0usize;
        for entry in &entries {
            let Some(&byte) = bytecode.get(pc) else {
                break;
            };
            let file = usize::try_from(entry.file)
                .ok()
                .and_then(|i| Some((files.get(i)?, &indices[i])))
                .filter(|(file, _)| !file.content.is_empty());
            if let Some((file, index)) = file {
                let start = entry.offset as usize;
                let end = start.saturating_add(entry.length as usize);
                pc_to_source.insert(
                    pc as u64,
                    SourceRange {
                        file: file.path.clone(),
                        start: index.locate(&file.content, start),
                        end: index.locate(&file.content, end),
                    },
                );
            }
            let width = Opcode::try_from(byte).map_or(0, Opcode::immediate_width);
            pc += 1 + width;
        }
        debug!(
            entries = entries.len(),
            mapped = pc_to_source.len(),
            "built pc table"
        );

        let sources = files
            .iter()
            .map(|f| (f.path.clone(), f.content.split('\n').map(str::to_string).collect()))
            .collect();

        Ok(Self::new(pc_to_source, sources))
    }

    pub fn range(&self, pc: u64) -> Option<&SourceRange> {
        self.pc_to_source.get(&pc)
    }

    pub fn lines(&self, file: &str) -> Option<&[String]> {
        self.sources.get(file).map(Vec::as_slice)
    }

    pub fn mapped_pcs(&self) -> usize {
        self.pc_to_source.len()
    }

    pub fn resolve(&self, pc: u64, highlight: &Highlight) -> Option<SourceContext> {
        resolve(pc, self, highlight)
    }
}

/// Byte offsets of the start of each line.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(content: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn locate(&self, content: &str, offset: usize) -> LineColumn {
        let offset = offset.min(content.len());
        let line = self.starts.partition_point(|start| *start <= offset);
        let line_start = self.starts[line - 1];
        let prefix = &content.as_bytes()[line_start..offset];
        let column = String::from_utf8_lossy(prefix).chars().count();
        LineColumn { line, column }
    }
}

fn split_at_char(line: &str, column: usize) -> (&str, &str) {
    let at = line.char_indices().nth(column).map_or(line.len(), |(i, _)| i);
    line.split_at(at)
}

/// Resolves `pc` to its highlighted source, or `None` when the counter has
/// no mapping (compiler-generated code, dispatchers) or the file is missing.
pub fn resolve(
    pc: u64,
    materials: &CallTraceMaterials,
    highlight: &Highlight,
) -> Option<SourceContext> {
    let range = materials.range(pc)?;
    let lines = materials.lines(&range.file)?;
    let selected = lines.get(range.start.line.checked_sub(1)?..range.end.line.min(lines.len()))?;

    let last = selected.len().checked_sub(1)?;
    let snippet = selected
        .iter()
        .enumerate()
        .map(|(i, line)| match (i == 0, i == last) {
            (true, true) => {
                let (head, rest) = split_at_char(line, range.start.column);
                let width = range.end.column.saturating_sub(range.start.column);
                let (body, tail) = split_at_char(rest, width);
                format!("{head}{}{tail}", highlight.apply(body))
            }
            (true, false) => {
                let (head, body) = split_at_char(line, range.start.column);
                format!("{head}{}", highlight.apply(body))
            }
            (false, true) => {
                let (body, tail) = split_at_char(line, range.end.column);
                format!("{}{tail}", highlight.apply(body))
            }
            (false, false) => highlight.apply(line),
        })
        .collect::<Vec<_>>()
        .join("\n");

    Some(SourceContext {
        snippet,
        label: range.label(),
    })
}
