//! Compiled contracts from `solc --combined-json`, matched against deployed
//! bytecode to produce decode materials.

use std::{fs, path::Path};

use ahash::AHashMap;
use evmtrace_decoder::{CallTraceMaterials, SourceFile};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::error::ArtifactError;

#[derive(Deserialize)]
struct CombinedJson {
    contracts: Map<String, Value>,
    #[serde(default, rename = "sourceList")]
    source_list: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct CombinedContract {
    #[serde(default)]
    bin: String,
    #[serde(default, rename = "bin-runtime")]
    bin_runtime: String,
    #[serde(default)]
    srcmap: String,
    #[serde(default, rename = "srcmap-runtime")]
    srcmap_runtime: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize, Default)]
struct Metadata {
    #[serde(default)]
    sources: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub creation_code: Vec<u8>,
    pub runtime_code: Vec<u8>,
    pub source_map: String,
    pub runtime_source_map: String,
}

/// Every compiled contract of one build, with the source files their
/// source maps index into.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: Vec<Artifact>,
    by_runtime_code: AHashMap<Vec<u8>, usize>,
    files: Vec<SourceFile>,
}

/// Deployed code ends with a CBOR metadata blob whose length is stored in
/// the final two bytes. It differs between otherwise identical builds.
pub fn strip_metadata(code: &[u8]) -> &[u8] {
    let Some(split) = code.len().checked_sub(2) else {
        return code;
    };
    let length = usize::from(u16::from_be_bytes([code[split], code[split + 1]]));
    match split.checked_sub(length) {
        Some(end) if length > 0 => &code[..end],
        _ => code,
    }
}

fn decode_code(contract: &str, field: &'static str, hex_code: &str) -> Result<Vec<u8>, ArtifactError> {
    let digits = hex_code.strip_prefix("0x").unwrap_or(hex_code);
    hex::decode(digits).map_err(|_| ArtifactError::BadBytecode {
        contract: contract.to_string(),
        field,
    })
}

/// The metadata field is a JSON document embedded as a string, or already
/// an object with newer compilers.
fn parse_metadata(value: Value) -> Metadata {
    let parsed = match value {
        Value::String(text) => serde_json::from_str(&text).ok(),
        Value::Object(_) => serde_json::from_value(value).ok(),
        _ => None,
    };
    parsed.unwrap_or_default()
}

impl ArtifactStore {
    #[instrument(level = "debug", skip_all)]
    pub fn from_combined_json(json: &str) -> Result<Self, ArtifactError> {
        let combined: CombinedJson = serde_json::from_str(json)?;

        let mut contents: AHashMap<String, String> = AHashMap::new();
        let mut first_seen: Vec<String> = Vec::new();
        let mut artifacts = Vec::new();

        for (name, value) in combined.contracts {
            let contract: CombinedContract = serde_json::from_value(value)?;
            for (path, source) in parse_metadata(contract.metadata).sources {
                if !contents.contains_key(&path) {
                    first_seen.push(path.clone());
                }
                if let Some(content) = source.get("content").and_then(Value::as_str) {
                    contents.insert(path, content.to_string());
                } else {
                    contents.entry(path).or_default();
                }
            }

            if contract.bin_runtime.is_empty() {
                debug!(%name, "skipping contract without runtime code");
                continue;
            }
            if contract.bin_runtime.contains("__") {
                debug!(%name, "skipping unlinked contract");
                continue;
            }
            artifacts.push(Artifact {
                creation_code: decode_code(&name, "bin", &contract.bin)?,
                runtime_code: decode_code(&name, "bin-runtime", &contract.bin_runtime)?,
                source_map: contract.srcmap,
                runtime_source_map: contract.srcmap_runtime,
                name,
            });
        }

        let files = combined
            .source_list
            .unwrap_or(first_seen)
            .into_iter()
            .map(|path| SourceFile {
                content: contents.get(&path).cloned().unwrap_or_default(),
                path,
            })
            .collect();

        let by_runtime_code = artifacts
            .iter()
            .enumerate()
            .map(|(i, artifact)| (strip_metadata(&artifact.runtime_code).to_vec(), i))
            .collect();

        debug!(contracts = artifacts.len(), "loaded artifacts");
        Ok(Self {
            artifacts,
            by_runtime_code,
            files,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        Self::from_combined_json(&fs::read_to_string(path)?)
    }

    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn find_by_runtime_code(&self, code: &[u8]) -> Option<&Artifact> {
        self.by_runtime_code
            .get(strip_metadata(code))
            .map(|&i| &self.artifacts[i])
    }

    /// Materials for `artifact`: creation code and source map for contract
    /// creation calls, runtime code and source map otherwise.
    pub fn materials(
        &self,
        artifact: &Artifact,
        is_creation: bool,
    ) -> Result<CallTraceMaterials, ArtifactError> {
        let (code, source_map) = if is_creation {
            (&artifact.creation_code, &artifact.source_map)
        } else {
            (&artifact.runtime_code, &artifact.runtime_source_map)
        };
        CallTraceMaterials::from_compiled(code, source_map, &self.files).map_err(|source| {
            ArtifactError::SourceMap {
                contract: artifact.name.clone(),
                source,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_metadata() {
        let code = [0x60, 0x80, 0xa1, 0x65, 0x00, 0x02];
        assert_eq!(strip_metadata(&code), &[0x60, 0x80][..]);
        assert_eq!(strip_metadata(&[0x00]), &[0x00][..]);
        assert_eq!(strip_metadata(&[0x60, 0x00, 0x00]), &[0x60, 0x00, 0x00][..]);
        assert_eq!(strip_metadata(&[0x60, 0x00, 0x09]), &[0x60, 0x00, 0x09][..]);
    }

    #[test]
    fn test_source_list_orders_files() {
        let json = r#"{
            "contracts": {
                "b.sol:B": {"bin": "00", "bin-runtime": "00", "srcmap": "", "srcmap-runtime": "",
                            "metadata": "{\"sources\":{\"b.sol\":{\"content\":\"contract B {}\"}}}"},
                "a.sol:I": {"bin": "", "bin-runtime": "", "metadata": "{\"sources\":{\"a.sol\":{\"content\":\"interface I {}\"}}}"}
            },
            "sourceList": ["a.sol", "b.sol"]
        }"#;
        let store = ArtifactStore::from_combined_json(json).unwrap();

        assert_eq!(store.artifacts().len(), 1);
        let paths: Vec<_> = store.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, ["a.sol", "b.sol"]);
        assert_eq!(store.files()[1].content, "contract B {}");
    }

    #[test]
    fn test_files_fall_back_to_metadata_order() {
        let json = r#"{
            "contracts": {
                "z.sol:Z": {"bin": "00", "bin-runtime": "00",
                            "metadata": {"sources": {"z.sol": {"content": "z"}, "lib.sol": {}}}}
            }
        }"#;
        let store = ArtifactStore::from_combined_json(json).unwrap();
        let paths: Vec<_> = store.files().iter().map(|f| f.path.as_str()).collect();

        assert_eq!(paths, ["z.sol", "lib.sol"]);
        assert!(store.files()[1].content.is_empty());
    }

    #[test]
    fn test_bad_bytecode() {
        let json = r#"{"contracts": {"x.sol:X": {"bin": "zz", "bin-runtime": "00"}}}"#;

        assert!(matches!(
            ArtifactStore::from_combined_json(json),
            Err(ArtifactError::BadBytecode { field: "bin", .. })
        ));
    }
}
