use crate::application::analysis_request::{AnalysisKind, AnalysisRequest};
use crate::application::overflow_detector::OverflowRule;
use crate::application::overflow_scanner::{OverflowMode, OverflowSettings};
use crate::application::saturation_service::{SaturationParams, SaturationSettings};
use crate::application::worker_pool::WorkerPool;
use crate::domain::channel::{OverflowConvention, SuffixConvention};
use anyhow::{Context, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG: &str = "config/analysis";
const ENV_PREFIX: &str = "FAULTS";

/// Placeholders the datafind and segment database URL templates may use.
pub const ARCHIVE_PLACEHOLDERS: [&str; 5] = ["host", "site", "type", "start", "end"];
pub const STATE_PLACEHOLDERS: [&str; 4] = ["host", "flag", "start", "end"];

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub analysis: AnalysisSettings,
    #[serde(default)]
    pub saturation: SaturationConfig,
    #[serde(default)]
    pub overflow: OverflowConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisSettings {
    pub site: String,
    pub stream_type: String,
    /// RFC 3339 timestamp or seconds since the Unix epoch
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub state_flag: Option<String>,
    #[serde(default = "default_chunk_seconds")]
    pub chunk_seconds: f64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Worker count; 0 picks one per processor
    #[serde(default)]
    pub nproc: usize,
    #[serde(default)]
    pub round_segments: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SaturationConfig {
    pub precision: f64,
    pub epsilon: f64,
    pub limiter_bit: u32,
    pub skip: Vec<String>,
    pub suffixes: SuffixConvention,
}

impl Default for SaturationConfig {
    fn default() -> Self {
        let params = SaturationParams::default();
        Self {
            precision: params.precision,
            epsilon: params.epsilon,
            limiter_bit: params.limiter_bit,
            skip: Vec::new(),
            suffixes: SuffixConvention::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OverflowConfig {
    pub expansion_seconds: f64,
    pub indicator_rule: OverflowRule,
    pub member_rule: OverflowRule,
    pub mode: OverflowMode,
    pub skip: Vec<String>,
    pub naming: OverflowConvention,
}

impl Default for OverflowConfig {
    fn default() -> Self {
        let settings = OverflowSettings::default();
        Self {
            expansion_seconds: settings.expansion,
            indicator_rule: settings.indicator_rule,
            member_rule: settings.member_rule,
            mode: settings.mode,
            skip: settings.skip,
            naming: settings.naming,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveKind {
    #[default]
    Directory,
    Datafind,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ArchiveConfig {
    pub kind: ArchiveKind,
    /// Directory holding archive units, for `kind = "directory"`
    pub path: Option<PathBuf>,
    /// Discovery service base URL, for `kind = "datafind"`
    pub host: Option<String>,
    pub url_template: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            kind: ArchiveKind::Directory,
            path: None,
            host: None,
            url_template: "${host}/api/v1/${site}/${type}/${start},${end}.json".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StateConfig {
    pub host: Option<String>,
    pub url_template: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            host: None,
            url_template: "${host}/api/v1/flags/${flag}?s=${start}&e=${end}".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub compress: bool,
    pub report: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            compress: false,
            report: true,
        }
    }
}

fn default_chunk_seconds() -> f64 {
    3600.0
}

fn default_max_batch() -> usize {
    1024
}

/// Loads `config/analysis.*` (or `path`), then `FAULTS__SECTION__KEY`
/// environment variables, then `overrides`, later sources winning.
pub fn load_analysis_config(
    path: Option<&Path>,
    overrides: &[(&str, String)],
) -> anyhow::Result<AnalysisConfig> {
    let mut builder = config::Config::builder();
    builder = match path {
        Some(path) => builder.add_source(config::File::from(path)),
        None => builder.add_source(config::File::with_name(DEFAULT_CONFIG).required(false)),
    };
    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("saturation.skip")
            .with_list_parse_key("overflow.skip")
            .try_parsing(true),
    );
    for (key, value) in overrides {
        builder = builder.set_override(*key, value.clone())?;
    }

    let settings = builder.build()?;
    let config: AnalysisConfig = settings
        .try_deserialize()
        .context("invalid analysis configuration")?;
    config.validate()?;
    Ok(config)
}

/// Seconds since the Unix epoch, from either a plain number or RFC 3339.
pub fn parse_time(value: &str) -> anyhow::Result<f64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return Ok(seconds);
    }
    let time = chrono::DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("cannot parse time {:?}", value))?;
    Ok(time.timestamp_millis() as f64 / 1000.0)
}

impl AnalysisConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.analysis.site.is_empty() {
            bail!("analysis.site is required");
        }
        if self.analysis.stream_type.is_empty() {
            bail!("analysis.stream_type is required");
        }
        let (start, end) = (parse_time(&self.analysis.start)?, parse_time(&self.analysis.end)?);
        if end <= start {
            bail!("analysis.end must be after analysis.start");
        }
        if self.analysis.chunk_seconds <= 0.0 {
            bail!("analysis.chunk_seconds must be positive");
        }
        if self.analysis.max_batch == 0 {
            bail!("analysis.max_batch must be positive");
        }
        if !(self.saturation.precision > 0.0 && self.saturation.precision <= 1.0) {
            bail!("saturation.precision must be in (0, 1]");
        }
        if self.saturation.limiter_bit >= 63 {
            bail!("saturation.limiter_bit must be below 63");
        }
        if self.overflow.expansion_seconds < 0.0 {
            bail!("overflow.expansion_seconds must not be negative");
        }
        match self.archive.kind {
            ArchiveKind::Directory if self.archive.path.is_none() => {
                bail!("archive.path is required for a directory archive")
            }
            ArchiveKind::Datafind if self.archive.host.is_none() => {
                bail!("archive.host is required for datafind discovery")
            }
            _ => {}
        }
        if self.analysis.state_flag.is_some() && self.state.host.is_none() {
            bail!("state.host is required when analysis.state_flag is set");
        }
        check_template(
            "archive.url_template",
            &self.archive.url_template,
            &ARCHIVE_PLACEHOLDERS,
        )?;
        check_template("state.url_template", &self.state.url_template, &STATE_PLACEHOLDERS)?;
        Ok(())
    }

    pub fn request(&self) -> anyhow::Result<AnalysisRequest> {
        Ok(AnalysisRequest {
            site: self.analysis.site.clone(),
            stream_type: self.analysis.stream_type.clone(),
            start: parse_time(&self.analysis.start)?,
            end: parse_time(&self.analysis.end)?,
            state_flag: self.analysis.state_flag.clone(),
            chunk_seconds: self.analysis.chunk_seconds,
            max_batch: self.analysis.max_batch,
            round_segments: self.analysis.round_segments,
        })
    }

    pub fn worker_pool(&self) -> WorkerPool {
        match self.analysis.nproc {
            0 => WorkerPool::new(WorkerPool::default_workers()),
            n => WorkerPool::new(n),
        }
    }

    /// Run parameters as shown in the report
    pub fn parameters(&self, kind: AnalysisKind) -> Vec<(String, String)> {
        let mut params = vec![
            ("stream type".to_string(), self.analysis.stream_type.clone()),
            (
                "state flag".to_string(),
                self.analysis.state_flag.clone().unwrap_or_else(|| "none".to_string()),
            ),
            ("chunk seconds".to_string(), self.analysis.chunk_seconds.to_string()),
            ("workers".to_string(), self.worker_pool().workers().to_string()),
        ];
        match kind {
            AnalysisKind::Saturations => {
                params.push(("precision".to_string(), self.saturation.precision.to_string()));
                params.push(("max batch".to_string(), self.analysis.max_batch.to_string()));
                params.push(("limiter bit".to_string(), self.saturation.limiter_bit.to_string()));
            }
            AnalysisKind::Overflows => {
                params.push((
                    "expansion seconds".to_string(),
                    self.overflow.expansion_seconds.to_string(),
                ));
                params.push((
                    "indicator rule".to_string(),
                    format!("{:?}", self.overflow.indicator_rule),
                ));
                params.push((
                    "member rule".to_string(),
                    format!("{:?}", self.overflow.member_rule),
                ));
                params.push(("mode".to_string(), format!("{:?}", self.overflow.mode)));
            }
        }
        params
    }

    pub fn saturation_settings(&self) -> SaturationSettings {
        SaturationSettings {
            params: SaturationParams {
                precision: self.saturation.precision,
                epsilon: self.saturation.epsilon,
                limiter_bit: self.saturation.limiter_bit,
            },
            skip: self.saturation.skip.clone(),
            suffixes: self.saturation.suffixes.clone(),
        }
    }

    pub fn overflow_settings(&self) -> OverflowSettings {
        OverflowSettings {
            expansion: self.overflow.expansion_seconds,
            indicator_rule: self.overflow.indicator_rule,
            member_rule: self.overflow.member_rule,
            mode: self.overflow.mode,
            skip: self.overflow.skip.clone(),
            naming: self.overflow.naming.clone(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("no value for placeholder ${{{0}}}")]
    Unknown(String),
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),
}

/// Fills `${name}` placeholders in one pass. Substituted values are not
/// rescanned, and a placeholder without a value is an error instead of being
/// sent to the server verbatim.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let offset = template.len() - rest.len() + open;
        let after = &rest[open + 2..];
        let close = after.find('}').ok_or(TemplateError::Unterminated(offset))?;
        let name = &after[..close];
        let value = vars
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
            .ok_or_else(|| TemplateError::Unknown(name.to_string()))?;
        out.push_str(value);
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn check_template(field: &str, template: &str, names: &[&str]) -> anyhow::Result<()> {
    let vars: Vec<(&str, String)> = names.iter().map(|name| (*name, String::new())).collect();
    render_template(template, &vars).with_context(|| format!("{} is invalid", field))?;
    Ok(())
}
