use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Largest accepted upload, in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Largest accepted number of data rows per file.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
    /// Directory for staged uploads. Defaults to the system temp directory.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: default_max_upload_bytes(),
            max_rows: default_max_rows(),
            staging_dir: None,
        }
    }
}

fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}
fn default_max_rows() -> usize {
    200_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u64,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

fn default_page_size() -> u64 {
    100
}
fn default_max_page_size() -> u64 {
    1000
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate ingest limits
    if config.ingest.max_upload_bytes == 0 {
        anyhow::bail!("ingest.max_upload_bytes must be >= 1");
    }
    if config.ingest.max_rows == 0 {
        anyhow::bail!("ingest.max_rows must be >= 1");
    }

    // Validate paging
    if config.export.default_page_size < 1 || config.export.max_page_size < 1 {
        anyhow::bail!("export page sizes must be >= 1");
    }
    if config.export.default_page_size > config.export.max_page_size {
        anyhow::bail!(
            "export.default_page_size ({}) must not exceed export.max_page_size ({})",
            config.export.default_page_size,
            config.export.max_page_size
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn optional_sections_take_defaults() {
        let f = write("[db]\npath = \"./data/ledger.sqlite\"\n");
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:7340");
        assert_eq!(config.ingest.max_rows, 200_000);
        assert_eq!(config.export.default_page_size, 100);
        assert_eq!(config.export.max_page_size, 1000);
    }

    #[test]
    fn default_page_size_must_fit_under_max() {
        let f = write(
            "[db]\npath = \"x.sqlite\"\n[export]\ndefault_page_size = 50\nmax_page_size = 10\n",
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("default_page_size"));
    }

    #[test]
    fn zero_row_limit_is_rejected() {
        let f = write("[db]\npath = \"x.sqlite\"\n[ingest]\nmax_rows = 0\n");
        assert!(load_config(f.path()).is_err());
    }
}
