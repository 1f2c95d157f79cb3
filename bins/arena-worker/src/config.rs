// Worker settings and language toolchain configuration
use crate::error::GradeError;
use anyhow::{bail, Context, Result};
use arena_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const MIN_TIMEOUT_MS: u64 = 100;
pub const MAX_TIMEOUT_MS: u64 = 30_000;

/// Which sandbox backend runs generated programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Docker,
    Process,
}

impl FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "docker" => Ok(EngineKind::Docker),
            "process" | "native" => Ok(EngineKind::Process),
            other => bail!("Unknown JUDGE_ENGINE '{}' (expected docker or process)", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub languages_path: PathBuf,
    pub engine: EngineKind,
    pub timeout_ms: u64,
    pub compile_timeout_ms: u64,
    pub scratch_root: PathBuf,
    pub output_limit_bytes: usize,
    pub result_ttl_secs: u64,
    /// Jobs processed in parallel by one worker process.
    pub concurrency: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            languages_path: PathBuf::from("config/languages.json"),
            engine: EngineKind::Docker,
            timeout_ms: 5000,
            compile_timeout_ms: 15_000,
            scratch_root: std::env::temp_dir().join("arena-scratch"),
            output_limit_bytes: 64 * 1024,
            result_ttl_secs: 86_400,
            concurrency: 1,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Read settings from the environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Settings::default();
        Ok(Self {
            redis_url: env_or("REDIS_URL", defaults.redis_url)?,
            languages_path: env_or("LANGUAGES_CONFIG", defaults.languages_path)?,
            engine: env_or("JUDGE_ENGINE", defaults.engine)?,
            timeout_ms: env_or("JUDGE_TIMEOUT_MS", defaults.timeout_ms)?,
            compile_timeout_ms: env_or("JUDGE_COMPILE_TIMEOUT_MS", defaults.compile_timeout_ms)?,
            scratch_root: env_or("JUDGE_SCRATCH_DIR", defaults.scratch_root)?,
            output_limit_bytes: env_or("JUDGE_OUTPUT_LIMIT_BYTES", defaults.output_limit_bytes)?,
            result_ttl_secs: env_or("RESULT_TTL_SECS", defaults.result_ttl_secs)?,
            concurrency: env_or("WORKER_CONCURRENCY", defaults.concurrency)?.max(1),
        })
    }

    /// Per-request timeout, falling back to the configured default and clamped to sane bounds.
    pub fn effective_timeout_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.timeout_ms)
            .clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
    }
}

/// A toolchain invocation. Arguments are passed as an argv vector, never through a shell.
/// `{source}` and `{binary}` inside an argument are replaced with the artifact file names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub version: String,
    pub image: String,
    pub source_file: String,
    #[serde(default)]
    pub binary_file: Option<String>,
    #[serde(default)]
    pub compile: Option<CommandSpec>,
    pub run: CommandSpec,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,
    /// Apply an address-space rlimit in the process engine. Runtimes that
    /// reserve large virtual regions up front (node, mono) must leave this off
    /// and are held to a data-segment limit instead.
    #[serde(default)]
    pub limit_address_space: bool,
}

fn default_pids_limit() -> i64 {
    64
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    allowed_binaries: Vec<String>,
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
    allowed_binaries: HashSet<String>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        Self::from_json(&content)
            .with_context(|| format!("Invalid language config in {}", config_path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let languages_json: LanguagesJson =
            serde_json::from_str(content).context("Failed to parse languages.json")?;

        let allowed_binaries: HashSet<String> =
            languages_json.allowed_binaries.into_iter().collect();

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            let language = Language::from_str(&lang.name)
                .ok_or_else(|| anyhow::anyhow!("Unknown language '{}' in languages.json", lang.name))?;

            let programs = lang.compile.iter().chain(std::iter::once(&lang.run));
            for spec in programs {
                if !allowed_binaries.contains(&spec.command) {
                    bail!(
                        "Language '{}' uses '{}' which is not in allowed_binaries",
                        lang.name,
                        spec.command
                    );
                }
            }
            if lang.compile.is_some() && lang.binary_file.is_none() {
                bail!("Language '{}' has a compile step but no binary_file", lang.name);
            }

            configs.insert(language, lang);
        }

        if configs.is_empty() {
            bail!("No languages configured in languages.json");
        }

        Ok(Self {
            configs,
            allowed_binaries,
        })
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig, GradeError> {
        self.configs
            .get(language)
            .ok_or_else(|| GradeError::ToolchainUnavailable {
                language: language.to_string(),
                reason: "no toolchain configured".to_string(),
            })
    }

    pub fn allowed_binaries(&self) -> &HashSet<String> {
        &self.allowed_binaries
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.configs.keys().map(|l| l.to_string()).collect();
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) const TEST_LANGUAGES_JSON: &str = r#"{
    "allowed_binaries": ["node", "python3", "mcs", "mono"],
    "languages": [
        {
            "name": "javascript", "version": "20", "image": "node:20-alpine",
            "source_file": "main.js",
            "run": { "command": "node", "args": ["{source}"] },
            "memory_limit_mb": 256, "cpu_limit": 0.5
        },
        {
            "name": "python", "version": "3", "image": "python:3.12-alpine",
            "source_file": "main.py",
            "run": { "command": "python3", "args": ["{source}"] },
            "memory_limit_mb": 256, "cpu_limit": 0.5, "limit_address_space": true
        },
        {
            "name": "csharp", "version": "6.12", "image": "mono:6.12",
            "source_file": "Program.cs", "binary_file": "main.exe",
            "compile": { "command": "mcs", "args": ["-nologo", "-out:{binary}", "{source}"] },
            "run": { "command": "mono", "args": ["{binary}"] },
            "memory_limit_mb": 512, "cpu_limit": 1.0, "pids_limit": 128
        }
    ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_json() {
        let manager = LanguageConfigManager::from_json(TEST_LANGUAGES_JSON).unwrap();
        assert_eq!(manager.list_languages(), vec!["csharp", "javascript", "python"]);

        let python = manager.get_config(&Language::Python).unwrap();
        assert_eq!(python.source_file, "main.py");
        assert_eq!(python.pids_limit, 64);
        assert!(python.limit_address_space);

        let csharp = manager.get_config(&Language::CSharp).unwrap();
        assert_eq!(csharp.compile.as_ref().unwrap().command, "mcs");
        assert!(manager.allowed_binaries().contains("mono"));
        assert!(!manager.allowed_binaries().contains("sh"));
    }

    #[test]
    fn test_rejects_binary_outside_allow_list() {
        let json = r#"{
            "allowed_binaries": ["python3"],
            "languages": [{
                "name": "python", "version": "3", "image": "python",
                "source_file": "main.py",
                "run": { "command": "bash", "args": ["-c", "{source}"] },
                "memory_limit_mb": 64, "cpu_limit": 0.5
            }]
        }"#;
        let err = LanguageConfigManager::from_json(json).unwrap_err();
        assert!(err.to_string().contains("allowed_binaries"));
    }

    #[test]
    fn test_rejects_unknown_language() {
        let json = r#"{
            "allowed_binaries": ["ruby"],
            "languages": [{
                "name": "ruby", "version": "3", "image": "ruby",
                "source_file": "main.rb",
                "run": { "command": "ruby", "args": ["{source}"] },
                "memory_limit_mb": 64, "cpu_limit": 0.5
            }]
        }"#;
        assert!(LanguageConfigManager::from_json(json).is_err());
    }

    #[test]
    fn test_missing_language_is_toolchain_unavailable() {
        let json = r#"{
            "allowed_binaries": ["python3"],
            "languages": [{
                "name": "python", "version": "3", "image": "python",
                "source_file": "main.py",
                "run": { "command": "python3", "args": ["{source}"] },
                "memory_limit_mb": 64, "cpu_limit": 0.5
            }]
        }"#;
        let manager = LanguageConfigManager::from_json(json).unwrap();
        let err = manager.get_config(&Language::CSharp).unwrap_err();
        assert!(matches!(err, GradeError::ToolchainUnavailable { .. }));
    }

    #[test]
    fn test_timeout_clamping() {
        let settings = Settings::default();
        assert_eq!(settings.effective_timeout_ms(None), 5000);
        assert_eq!(settings.effective_timeout_ms(Some(1)), MIN_TIMEOUT_MS);
        assert_eq!(settings.effective_timeout_ms(Some(999_999)), MAX_TIMEOUT_MS);
        assert_eq!(settings.effective_timeout_ms(Some(2500)), 2500);
    }

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("docker".parse::<EngineKind>().unwrap(), EngineKind::Docker);
        assert_eq!("Process".parse::<EngineKind>().unwrap(), EngineKind::Process);
        assert!("vm".parse::<EngineKind>().is_err());
    }
}
