use ethers::{
    abi::{Abi, Token},
    types::Bytes,
};
use serde_json::Value;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use crate::error::ArtifactError;

/// Compiled contract: ABI plus creation bytecode.
#[derive(Clone, Debug)]
pub struct Artifact {
    name: String,
    abi: Abi,
    bytecode: Bytes,
}

impl Artifact {
    /// Parses a compiler output document. Truffle and Brownie keep the
    /// creation code under `bytecode`, solc standard JSON under
    /// `evm.bytecode.object`.
    pub fn from_json(name: &str, contents: &str) -> Result<Self, String> {
        let document: Value =
            serde_json::from_str(contents).map_err(|e| format!("not valid JSON: {}", e))?;

        let abi = document
            .get("abi")
            .ok_or_else(|| "missing `abi`".to_string())?;
        let abi: Abi =
            serde_json::from_value(abi.clone()).map_err(|e| format!("invalid `abi`: {}", e))?;

        let bytecode = document
            .get("bytecode")
            .and_then(bytecode_object)
            .or_else(|| document.pointer("/evm/bytecode").and_then(bytecode_object))
            .ok_or_else(|| "missing `bytecode`".to_string())?;
        let bytecode = decode_hex(bytecode)?;
        if bytecode.is_empty() {
            return Err("empty bytecode, is the contract abstract?".to_string());
        }

        Ok(Self {
            name: name.to_string(),
            abi,
            bytecode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn bytecode(&self) -> &Bytes {
        &self.bytecode
    }

    /// Creation code followed by the ABI-encoded constructor arguments.
    pub fn deployment_data(&self, args: &[Token]) -> Result<Bytes, String> {
        match &self.abi.constructor {
            Some(constructor) => constructor
                .encode_input(self.bytecode.to_vec(), args)
                .map(Bytes::from)
                .map_err(|e| format!("constructor arguments do not match the ABI: {}", e)),
            None if args.is_empty() => Ok(self.bytecode.clone()),
            None => Err(format!(
                "{} has no constructor but {} arguments were given",
                self.name,
                args.len()
            )),
        }
    }
}

fn bytecode_object(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s.as_str()),
        Value::Object(_) => value.get("object").and_then(Value::as_str),
        _ => None,
    }
}

/// Decodes `0x`-prefixed or bare hex.
pub fn decode_hex(code: &str) -> Result<Bytes, String> {
    let code = code.trim();
    let code = code.strip_prefix("0x").unwrap_or(code);
    hex::decode(code)
        .map(Bytes::from)
        .map_err(|e| format!("bytecode is not valid hex (unlinked library?): {}", e))
}

/// Read-only directory of compiled artifacts keyed by contract name.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `dir/<name>.json`, or `dir/<override_path>` when given.
    pub fn path_for(&self, name: &str, override_path: Option<&Path>) -> PathBuf {
        match override_path {
            Some(path) => self.dir.join(path),
            None => self.dir.join(format!("{}.json", name)),
        }
    }

    pub async fn load(
        &self,
        name: &str,
        override_path: Option<&Path>,
    ) -> Result<Artifact, ArtifactError> {
        let path = self.path_for(name, override_path);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ArtifactError::NotFound(path)),
            Err(source) => return Err(ArtifactError::Io { path, source }),
        };
        Artifact::from_json(name, &contents).map_err(|reason| ArtifactError::Invalid { path, reason })
    }
}
