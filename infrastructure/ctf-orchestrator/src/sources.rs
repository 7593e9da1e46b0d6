use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use std::path::Path;

use crate::error::ConfigError;

/// Source files shown to players, read once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChallengeSources {
    files: Vec<SourceFile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

impl ChallengeSources {
    /// Reads every file in `names` relative to `dir`. Any unreadable file
    /// fails the whole load.
    pub fn load<P: AsRef<Path>>(dir: P, names: &[String]) -> Result<Self, ConfigError> {
        let dir = dir.as_ref();
        let files = names
            .iter()
            .map(|name| {
                let path = dir.join(name);
                debug!("Loading challenge source {}", path.display());
                std::fs::read_to_string(&path)
                    .map(|contents| SourceFile {
                        name: name.clone(),
                        contents,
                    })
                    .map_err(|source| ConfigError::Source { path, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { files })
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Contents of each file, base64 encoded, in configuration order.
    pub fn base64_encoded(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|file| STANDARD.encode(file.contents.as_bytes()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_dir;

    #[test]
    fn it_encodes_in_configured_order() {
        let dir = temp_dir("sources").unwrap();
        std::fs::write(dir.join("Setup.sol"), "contract Setup {}").unwrap();
        std::fs::write(dir.join("SolveMe.sol"), "contract SolveMe {}").unwrap();

        let sources = ChallengeSources::load(
            &dir,
            &["SolveMe.sol".to_string(), "Setup.sol".to_string()],
        )
        .unwrap();

        assert_eq!(sources.files()[0].name, "SolveMe.sol");
        assert_eq!(
            sources.base64_encoded(),
            vec![
                STANDARD.encode("contract SolveMe {}"),
                STANDARD.encode("contract Setup {}")
            ]
        );
    }

    #[test]
    fn missing_files_fail_the_load() {
        let dir = temp_dir("sources-missing").unwrap();
        let err = ChallengeSources::load(&dir, &["Nope.sol".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::Source { .. }));
    }

    #[test]
    fn no_files_is_fine() {
        assert!(ChallengeSources::load("/does/not/matter", &[]).unwrap().is_empty());
    }
}
