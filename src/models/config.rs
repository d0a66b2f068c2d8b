//! Configuration models for organelle-batch.
//!
//! Every field has a default, so a missing config file reproduces the
//! standard plastid + mitochondrion assembly run. The user overrides tools,
//! paths and policy via a TOML file and the CLI.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Top-level configuration for organelle-batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input dataset settings
    pub dataset: DatasetConfig,

    /// Checkpoint and failure log locations
    pub state: StateConfig,

    /// Working directory, output layout and failure policy
    pub execution: ExecutionConfig,

    /// External tools invoked per item
    pub tools: ToolsConfig,

    /// Best-effort cleanup targets
    pub cleanup: CleanupConfig,

    /// Extraction target types, run in this order
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset: DatasetConfig::default(),
            state: StateConfig::default(),
            execution: ExecutionConfig::default(),
            tools: ToolsConfig::default(),
            cleanup: CleanupConfig::default(),
            targets: default_targets(),
        }
    }
}

/// Input dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Path to the delimited input file
    pub path: PathBuf,

    /// Field delimiter (single byte)
    pub delimiter: char,

    /// Column holding the item identifier
    pub id_column: String,

    /// Grouping columns, outermost first; they form the output path
    pub group_columns: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("input.csv"),
            delimiter: ',',
            id_column: "sra".to_string(),
            group_columns: vec![
                "order".to_string(),
                "family".to_string(),
                "genus".to_string(),
            ],
        }
    }
}

/// Durable state locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Checkpoint file holding the index of the next item
    pub checkpoint: PathBuf,

    /// JSONL side log of failed items
    pub failure_log: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::from("progress"),
            failure_log: PathBuf::from("failed.jsonl"),
        }
    }
}

/// What to do when a mandatory step of an item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure, advance the checkpoint, go on with the next item
    #[default]
    Continue,
    /// Record the failure and stop; the item is retried on the next run
    Abort,
}

/// Execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Directory every command runs in
    pub work_dir: PathBuf,

    /// Root of the permanent output tree (relative to `work_dir`)
    pub output_root: PathBuf,

    /// Thread hint passed to tools as `{threads}`
    pub threads: usize,

    /// Policy on mandatory step failure
    pub failure_policy: FailurePolicy,

    /// Per-step timeout; unset means wait for the tool indefinitely
    pub step_timeout_secs: Option<u64>,

    /// Shell used for shell-string commands
    pub shell: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            output_root: PathBuf::from("data"),
            threads: 24,
            failure_policy: FailurePolicy::default(),
            step_timeout_secs: None,
            shell: "sh".to_string(),
        }
    }
}

/// An external tool invocation template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Program name or path (`${VAR}` expanded)
    pub program: String,

    /// Argument templates
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolSpec {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// External tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Run once before the first item (reference database setup)
    pub setup: Option<ToolSpec>,

    /// Fetches an item's raw data
    pub fetch: ToolSpec,

    /// Splits fetched data into the working set
    pub split: ToolSpec,

    /// Extraction tool, run once per target type
    pub extract: ToolSpec,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            setup: Some(ToolSpec::new(
                "get_organelle_config.py",
                &["-a", "embplant_pt,embplant_mt"],
            )),
            fetch: ToolSpec::new("prefetch", &["-p", "{id}", "--max-size", "150G"]),
            split: ToolSpec::new("fastq-dump", &["-I", "--split-files", "{id}"]),
            extract: ToolSpec::new(
                "get_organelle_from_reads.py",
                &[
                    "-1",
                    "{id}_1.fastq",
                    "-2",
                    "{id}_2.fastq",
                    "-o",
                    "{output}",
                    "-R",
                    "30",
                    "-k",
                    "21,45,65,85,105",
                    "-F",
                    "{mode}",
                    "-t",
                    "{threads}",
                ],
            ),
        }
    }
}

/// Cleanup targets, all relative to the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Shell globs left over from an aborted attempt, removed first
    pub stale: Vec<String>,

    /// Fetch artifacts removed after the split step
    pub fetch_artifacts: Vec<String>,

    /// Working files removed after extraction
    pub work_files: Vec<String>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            stale: vec!["SRR*".to_string()],
            fetch_artifacts: vec!["{id}".to_string()],
            work_files: vec!["{id}_1.fastq".to_string(), "{id}_2.fastq".to_string()],
        }
    }
}

/// One extraction target type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Output subdirectory name
    pub name: String,

    /// Mode flag passed to the extraction tool as `{mode}`
    pub mode: String,
}

fn default_targets() -> Vec<TargetSpec> {
    vec![
        TargetSpec {
            name: "pt".to_string(),
            mode: "embplant_pt".to_string(),
        },
        TargetSpec {
            name: "mt".to_string(),
            mode: "embplant_mt".to_string(),
        },
    ]
}

/// Placeholders available to per-item templates.
pub const ITEM_PLACEHOLDERS: &[&str] = &["id", "threads"];

/// Placeholders available to extraction templates.
pub const EXTRACT_PLACEHOLDERS: &[&str] = &["id", "threads", "output", "target", "mode"];

/// Placeholders available to the setup command.
pub const SETUP_PLACEHOLDERS: &[&str] = &["threads"];

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Toml(source) => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::Toml)?;
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise use the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Expand `${VAR}` in program paths and the working directory.
    fn expand_env(&mut self) {
        let tools = &mut self.tools;
        for tool in tools
            .setup
            .iter_mut()
            .chain([&mut tools.fetch, &mut tools.split, &mut tools.extract])
        {
            tool.program = expand_env_vars(&tool.program);
        }
        self.execution.work_dir =
            PathBuf::from(expand_env_vars(&self.execution.work_dir.to_string_lossy()));
    }

    /// Check invariants the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.group_columns.is_empty() {
            return Err(ConfigError::Invalid(
                "dataset.group_columns must name at least one column".to_string(),
            ));
        }
        if !self.dataset.delimiter.is_ascii() {
            return Err(ConfigError::Invalid(format!(
                "dataset.delimiter must be a single ASCII character, got {:?}",
                self.dataset.delimiter
            )));
        }
        if self.execution.threads == 0 {
            return Err(ConfigError::Invalid(
                "execution.threads must be at least 1".to_string(),
            ));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[targets]] entry is required".to_string(),
            ));
        }

        let mut names = BTreeSet::new();
        for target in &self.targets {
            if target.name.is_empty() || target.name.contains('/') {
                return Err(ConfigError::Invalid(format!(
                    "target name {:?} must be a non-empty path segment",
                    target.name
                )));
            }
            if !names.insert(target.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate target name '{}'",
                    target.name
                )));
            }
        }

        if let Some(setup) = &self.tools.setup {
            check_placeholders("tools.setup", &setup.args, SETUP_PLACEHOLDERS)?;
        }
        check_placeholders("tools.fetch", &self.tools.fetch.args, ITEM_PLACEHOLDERS)?;
        check_placeholders("tools.split", &self.tools.split.args, ITEM_PLACEHOLDERS)?;
        check_placeholders("tools.extract", &self.tools.extract.args, EXTRACT_PLACEHOLDERS)?;
        check_placeholders("cleanup.stale", &self.cleanup.stale, ITEM_PLACEHOLDERS)?;
        check_placeholders(
            "cleanup.fetch_artifacts",
            &self.cleanup.fetch_artifacts,
            ITEM_PLACEHOLDERS,
        )?;
        check_placeholders("cleanup.work_files", &self.cleanup.work_files, ITEM_PLACEHOLDERS)?;

        Ok(())
    }

    /// Example configuration matching the defaults.
    pub fn example_toml() -> &'static str {
        EXAMPLE_CONFIG
    }
}

const EXAMPLE_CONFIG: &str = r#"# organelle-batch configuration file

[dataset]
path = "input.csv"
delimiter = ","
id_column = "sra"
group_columns = ["order", "family", "genus"]

[state]
checkpoint = "progress"
failure_log = "failed.jsonl"

[execution]
work_dir = "."
output_root = "data"
threads = 24
failure_policy = "continue"   # or "abort"
# step_timeout_secs = 86400
shell = "sh"

[tools.setup]
program = "get_organelle_config.py"
args = ["-a", "embplant_pt,embplant_mt"]

[tools.fetch]
program = "prefetch"
args = ["-p", "{id}", "--max-size", "150G"]

[tools.split]
program = "fastq-dump"
args = ["-I", "--split-files", "{id}"]

[tools.extract]
program = "get_organelle_from_reads.py"
args = ["-1", "{id}_1.fastq", "-2", "{id}_2.fastq", "-o", "{output}",
        "-R", "30", "-k", "21,45,65,85,105", "-F", "{mode}", "-t", "{threads}"]

[cleanup]
stale = ["SRR*"]
fetch_artifacts = ["{id}"]
work_files = ["{id}_1.fastq", "{id}_2.fastq"]

[[targets]]
name = "pt"
mode = "embplant_pt"

[[targets]]
name = "mt"
mode = "embplant_mt"
"#;

fn placeholder_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\{([A-Za-z_]+)\}").expect("valid placeholder regex"))
}

fn env_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env regex"))
}

fn check_placeholders(field: &str, templates: &[String], allowed: &[&str]) -> Result<(), ConfigError> {
    for template in templates {
        for cap in placeholder_regex().captures_iter(template) {
            // `${VAR}` is env syntax, not a placeholder
            let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
            if start > 0 && template.as_bytes()[start - 1] == b'$' {
                continue;
            }
            if !allowed.contains(&&cap[1]) {
                return Err(ConfigError::UnknownPlaceholder {
                    field: field.to_string(),
                    placeholder: cap[1].to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Substitute `{name}` placeholders from `vars`.
///
/// Placeholders without a value are left as written; `validate` rejects
/// unknown names up front.
pub fn render_template(template: &str, vars: &HashMap<&str, String>) -> String {
    placeholder_regex()
        .replace_all(template, |cap: &regex::Captures<'_>| {
            vars.get(&cap[1])
                .cloned()
                .unwrap_or_else(|| cap[0].to_string())
        })
        .into_owned()
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    env_regex()
        .replace_all(s, |cap: &regex::Captures<'_>| {
            std::env::var(&cap[1]).unwrap_or_else(|_| cap[0].to_string())
        })
        .into_owned()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to parse config: {0}")]
    Toml(toml::de::Error),

    #[error("Unknown placeholder '{{{placeholder}}}' in {field}")]
    UnknownPlaceholder { field: String, placeholder: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
