// Loading a code set from the file system

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::grammar::Language;
use crate::pipeline::PipelineInput;
use crate::resolver::{CodeSet, FileInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Files to analyze, shared by every command that takes source.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Primary file (entry point)
    pub primary: PathBuf,

    /// Auxiliary files
    pub auxiliary: Vec<PathBuf>,

    /// Import every source file of the language under this directory
    #[arg(short = 'D', long)]
    pub dir: Option<PathBuf>,

    /// Language (inferred from the primary file's extension if omitted)
    #[arg(short, long)]
    pub language: Option<String>,
}

impl SourceArgs {
    /// Directory the code set's relative paths are taken from.
    pub fn base_dir(&self) -> PathBuf {
        match &self.dir {
            Some(dir) => dir.clone(),
            None => self
                .primary
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn language(&self) -> Result<Language> {
        match &self.language {
            Some(name) => Ok(Language::from_str(name)?),
            None => {
                let path = self.primary.to_string_lossy();
                Language::from_path(&path)
                    .ok_or_else(|| anyhow::anyhow!("Cannot infer language of {}; pass --language", path))
            }
        }
    }

    /// Read the primary file, the listed auxiliaries and, with `--dir`,
    /// every matching file under the directory.
    pub fn load(&self, config: &Config) -> Result<PipelineInput> {
        let language = self.language()?;
        let base = self.base_dir();

        let primary_rel = relative_to(&base, &self.primary);
        let primary = read_file(&self.primary, &primary_rel)?;

        let mut auxiliary: BTreeMap<String, FileInput> = BTreeMap::new();
        for path in &self.auxiliary {
            let rel = relative_to(&base, path);
            auxiliary.insert(rel.clone(), read_file(path, &rel)?);
        }

        if let Some(dir) = &self.dir {
            for path in discover(dir, language, config) {
                let rel = relative_to(dir, &path);
                if rel == primary_rel || auxiliary.contains_key(&rel) {
                    continue;
                }
                auxiliary.insert(rel.clone(), read_file(&path, &rel)?);
            }
        }

        info!(
            "Loaded {} ({}) with {} auxiliary files",
            primary_rel,
            language,
            auxiliary.len()
        );
        Ok(CodeSet::new(language, primary, auxiliary.into_values().collect()))
    }
}

fn read_file(path: &Path, rel: &str) -> Result<FileInput> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(FileInput::new(rel, content))
}

/// `path` relative to `base` with forward slashes; the bare file name when
/// it lies outside `base`.
pub fn relative_to(base: &Path, path: &Path) -> String {
    let rel = path
        .strip_prefix(base)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| path.file_name().map(PathBuf::from))
        .unwrap_or_else(|| path.to_path_buf());
    rel.to_string_lossy().replace('\\', "/")
}

/// Source files of `language` under `dir`, sorted, honoring the
/// configured exclusions.
pub fn discover(dir: &Path, language: Language, config: &Config) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| language.extensions().contains(&ext.to_ascii_lowercase().as_str()))
        })
        .filter(|path| config.should_import_file(&relative_to(dir, path)))
        .collect();
    files.sort();
    debug!("Discovered {} {} files under {}", files.len(), language, dir.display());
    files
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(primary: PathBuf, dir: Option<PathBuf>) -> SourceArgs {
        SourceArgs {
            primary,
            auxiliary: vec![],
            dir,
            language: None,
        }
    }

    #[test]
    fn test_directory_import() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("pkg")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();
        std::fs::write(root.join("main.py"), "import pkg.util\n").unwrap();
        std::fs::write(root.join("pkg/util.py"), "def f():\n    pass\n").unwrap();
        std::fs::write(root.join("__pycache__/old.py"), "x = 1\n").unwrap();
        std::fs::write(root.join("notes.txt"), "not code").unwrap();

        let input = args(root.join("main.py"), Some(root.to_path_buf()))
            .load(&Config::default())
            .unwrap();
        assert_eq!(input.language, Language::Python);
        assert_eq!(input.primary_file.path, "main.py");
        let aux: Vec<&str> = input.auxiliary_files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(aux, vec!["pkg/util.py"]);
    }

    #[test]
    fn test_language_inference() {
        assert_eq!(args(PathBuf::from("a/Main.java"), None).language().unwrap(), Language::Java);
        assert!(args(PathBuf::from("a/README"), None).language().is_err());

        let mut explicit = args(PathBuf::from("prog.h"), None);
        explicit.language = Some("c++".to_string());
        assert_eq!(explicit.language().unwrap(), Language::Cpp);
    }

    #[test]
    fn test_relative_paths() {
        assert_eq!(relative_to(Path::new("proj"), Path::new("proj/src/a.rs")), "src/a.rs");
        assert_eq!(relative_to(Path::new("proj"), Path::new("other/b.rs")), "b.rs");
    }
}
