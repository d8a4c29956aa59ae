use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "captionforge-tools.toml";

/// Defaults shared by the CLI binaries, overridable through a TOML file
/// found next to the invocation (or named by `CAPTIONFORGE_TOOLS_CONFIG`).
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub images_root: PathBuf,
    pub annotations_path: PathBuf,
    pub captions_path: PathBuf,
    pub batch_size: usize,
    pub target_size: (u32, u32),
}

impl Default for ToolConfig {
    fn default() -> Self {
        let assets_root = PathBuf::from("assets");
        Self {
            images_root: assets_root.join("images"),
            annotations_path: assets_root.join("annotations/captions.json"),
            captions_path: assets_root.join("captions/index.json"),
            batch_size: 32,
            target_size: (299, 299),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ToolConfigFile {
    images_root: Option<String>,
    annotations_path: Option<String>,
    captions_path: Option<String>,
    batch: Option<BatchSection>,
}

#[derive(Debug, Deserialize, Default)]
struct BatchSection {
    size: Option<usize>,
    width: Option<u32>,
    height: Option<u32>,
}

impl ToolConfig {
    pub fn load() -> Self {
        let cfg = if let Ok(path) = std::env::var("CAPTIONFORGE_TOOLS_CONFIG") {
            Self::from_path(Path::new(&path)).unwrap_or_default()
        } else {
            Self::from_path(Path::new(DEFAULT_CONFIG_NAME)).unwrap_or_default()
        };
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(path).ok()?;
        let file: ToolConfigFile = toml::from_str(&raw).ok()?;
        Some(Self::from_file(file))
    }

    fn from_file(file: ToolConfigFile) -> Self {
        let defaults = Self::default();
        let batch = file.batch.unwrap_or_default();
        ToolConfig {
            images_root: file
                .images_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.images_root),
            annotations_path: file
                .annotations_path
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.annotations_path),
            captions_path: file
                .captions_path
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.captions_path),
            batch_size: batch.size.filter(|s| *s > 0).unwrap_or(defaults.batch_size),
            target_size: (
                batch.width.unwrap_or(defaults.target_size.0),
                batch.height.unwrap_or(defaults.target_size.1),
            ),
        }
    }

    fn warn_if_invalid(&self) {
        if self.images_root.as_os_str().is_empty() {
            eprintln!("tools config: images_root is empty; listing will fail");
        }
        if self.annotations_path.as_os_str().is_empty() {
            eprintln!("tools config: annotations_path is empty; inference tools will fail");
        }
    }
}

fn expand_path(raw: &str) -> PathBuf {
    let expanded = match raw.strip_prefix('~') {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{home}{rest}"),
            Err(_) => raw.to_string(),
        },
        None => raw.to_string(),
    };
    PathBuf::from(expand_env(&expanded))
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find('}') {
            Some(end) => {
                let key = &rest[start + 2..start + 2 + end];
                match std::env::var(key) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &rest[start + 2 + end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
