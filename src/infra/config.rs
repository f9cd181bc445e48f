use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::cli::{AppContext, InitArgs};
use crate::core::comment::MarkPlacement;

/// How the "×N" marker is placed, or disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DanmuMark
{
    Off,
    Prefix,
    Suffix,
}

impl DanmuMark
{
    pub fn placement(self) -> Option<MarkPlacement>
    {
        match self
        {
            DanmuMark::Off => None,
            DanmuMark::Prefix => Some(MarkPlacement::Prefix),
            DanmuMark::Suffix => Some(MarkPlacement::Suffix),
        }
    }
}

/// Blacklist rule flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind
{
    /// Case-insensitive substring
    Text,
    /// Case-sensitive regular expression
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistRule
{
    pub kind: RuleKind,
    pub pattern: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool
{
    true
}

/// Regex rewrite applied to comparison text before the other passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForceRule
{
    pub pattern: String,
    pub replacement: String,
}

/// Immutable per-session snapshot of every pipeline parameter.
///
/// Keys use the settings collaborator's spelling. Build it with
/// [`Config::from_raw`] (or any loader below) so that every value has
/// been clamped into its documented range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config
{
    /// Merge window in seconds, -1 disables merging (-1..=180)
    pub threshold: i32,
    /// Maximum edit distance for near-duplicates (0..)
    pub max_dist: u32,
    /// Minimum bigram cosine percentage (0..=101, 101 disables)
    pub max_cosine: u32,

    pub trim_pinyin: bool,
    pub trim_ending: bool,
    pub trim_space: bool,
    pub trim_width: bool,

    /// Allow comments of different mode/pool to merge
    pub cross_mode: bool,
    /// Cluster special (type 7) comments
    pub proc_type7: bool,
    /// Cluster bottom/subtitle (type 4) comments
    pub proc_type4: bool,
    /// Cluster subtitle-pool comments
    pub proc_pool1: bool,

    pub danmu_mark: DanmuMark,
    /// Minimum cluster size to receive a marker (1..)
    pub mark_threshold: usize,
    pub danmu_subscript: bool,
    pub enlarge: bool,
    /// Shrink clusters larger than this, 0 disables
    pub shrink_threshold: usize,
    /// Drop clusters larger than this, 0 disables
    pub drop_threshold: usize,
    pub mode_elevation: bool,
    /// Share a text needs to become representative (0..=100)
    pub representative_percent: u32,
    /// Worker count and slot-combination bound (0..=16)
    pub combine_threads: usize,

    pub blacklist: Vec<BlacklistRule>,
    /// Regex patterns exempt from merging
    pub whitelist: Vec<String>,
    pub forcelist: Vec<ForceRule>,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            threshold: 20,
            max_dist: 5,
            max_cosine: 60,
            trim_pinyin: true,
            trim_ending: true,
            trim_space: true,
            trim_width: true,
            cross_mode: true,
            proc_type7: true,
            proc_type4: true,
            proc_pool1: false,
            danmu_mark: DanmuMark::Suffix,
            mark_threshold: 1,
            danmu_subscript: true,
            enlarge: true,
            shrink_threshold: 0,
            drop_threshold: 0,
            mode_elevation: true,
            representative_percent: 20,
            combine_threads: 4,
            blacklist: Vec::new(),
            whitelist: Vec::new(),
            forcelist: Vec::new(),
        }
    }
}

/// Wire shape of a config document; every key optional and lenient
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct RawConfig
{
    #[serde(deserialize_with = "lenient")]
    pub threshold: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub max_dist: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub max_cosine: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub trim_pinyin: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub trim_ending: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub trim_space: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub trim_width: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub cross_mode: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub proc_type7: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub proc_type4: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub proc_pool1: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub danmu_mark: Option<DanmuMark>,
    #[serde(deserialize_with = "lenient")]
    pub mark_threshold: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub danmu_subscript: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub enlarge: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub shrink_threshold: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub drop_threshold: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub mode_elevation: Option<bool>,
    #[serde(deserialize_with = "lenient")]
    pub representative_percent: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub combine_threads: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub blacklist: Option<Vec<BlacklistRule>>,
    #[serde(deserialize_with = "lenient")]
    pub whitelist: Option<Vec<String>>,
    #[serde(deserialize_with = "lenient")]
    pub forcelist: Option<Vec<ForceRule>>,
}

/// Accept any value; yield None when it does not fit `T`.
/// Strings are retried as JSON so env overrides like "20" or "true" work.
fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = serde_json::Value::deserialize(deserializer)?;

    if let Ok(v) = serde_json::from_value::<T>(value.clone())
    {
        return Ok(Some(v));
    }

    if let serde_json::Value::String(s) = &value
        && let Ok(v) = serde_json::from_str::<T>(s)
    {
        return Ok(Some(v));
    }

    warn!(value = %value, "ignoring config value of unexpected type");
    Ok(None)
}

/// Clamp `v` into `lo..=hi`, falling back to `default` when it is absent
/// or out of range
fn ranged(
    key: &str,
    v: Option<i64>,
    lo: i64,
    hi: i64,
    default: i64,
) -> i64
{
    match v
    {
        None => default,
        Some(x) if (lo..=hi).contains(&x) => x,
        Some(x) =>
        {
            warn!(key, value = x, default, "config value out of range, using default");
            default
        }
    }
}

impl Config
{
    /// Validate a raw document into a snapshot. Never fails.
    pub fn from_raw(raw: RawConfig) -> Self
    {
        let d = Config::default();

        Self {
            threshold: ranged("THRESHOLD", raw.threshold, -1, 180, d.threshold as i64) as i32,
            max_dist: ranged("MAX_DIST", raw.max_dist, 0, u32::MAX as i64, d.max_dist as i64)
                as u32,
            max_cosine: ranged("MAX_COSINE", raw.max_cosine, 0, 101, d.max_cosine as i64) as u32,
            trim_pinyin: raw
                .trim_pinyin
                .unwrap_or(d.trim_pinyin),
            trim_ending: raw
                .trim_ending
                .unwrap_or(d.trim_ending),
            trim_space: raw
                .trim_space
                .unwrap_or(d.trim_space),
            trim_width: raw
                .trim_width
                .unwrap_or(d.trim_width),
            cross_mode: raw
                .cross_mode
                .unwrap_or(d.cross_mode),
            proc_type7: raw
                .proc_type7
                .unwrap_or(d.proc_type7),
            proc_type4: raw
                .proc_type4
                .unwrap_or(d.proc_type4),
            proc_pool1: raw
                .proc_pool1
                .unwrap_or(d.proc_pool1),
            danmu_mark: raw
                .danmu_mark
                .unwrap_or(d.danmu_mark),
            mark_threshold: ranged(
                "MARK_THRESHOLD",
                raw.mark_threshold,
                1,
                i64::MAX,
                d.mark_threshold as i64,
            ) as usize,
            danmu_subscript: raw
                .danmu_subscript
                .unwrap_or(d.danmu_subscript),
            enlarge: raw
                .enlarge
                .unwrap_or(d.enlarge),
            shrink_threshold: ranged(
                "SHRINK_THRESHOLD",
                raw.shrink_threshold,
                0,
                i64::MAX,
                d.shrink_threshold as i64,
            ) as usize,
            drop_threshold: ranged(
                "DROP_THRESHOLD",
                raw.drop_threshold,
                0,
                i64::MAX,
                d.drop_threshold as i64,
            ) as usize,
            mode_elevation: raw
                .mode_elevation
                .unwrap_or(d.mode_elevation),
            representative_percent: ranged(
                "REPRESENTATIVE_PERCENT",
                raw.representative_percent,
                0,
                100,
                d.representative_percent as i64,
            ) as u32,
            combine_threads: ranged(
                "COMBINE_THREADS",
                raw.combine_threads,
                0,
                16,
                d.combine_threads as i64,
            ) as usize,
            blacklist: raw
                .blacklist
                .unwrap_or_default(),
            whitelist: raw
                .whitelist
                .unwrap_or_default(),
            forcelist: raw
                .forcelist
                .unwrap_or_default(),
        }
    }

    /// Parse a TOML document (the format `init` writes)
    pub fn from_toml_str(text: &str) -> Result<Self>
    {
        let raw: RawConfig = toml::from_str(text).context("Failed to parse configuration")?;
        Ok(Self::from_raw(raw))
    }

    /// Parse a JSON document (the settings collaborator's export format)
    pub fn from_json_str(text: &str) -> Result<Self>
    {
        let raw: RawConfig = serde_json::from_str(text).context("Failed to parse configuration")?;
        Ok(Self::from_raw(raw))
    }

    /// Merge window in centiseconds, None when merging is disabled
    pub fn threshold_cs(&self) -> Option<i64>
    {
        (self.threshold >= 0).then(|| self.threshold as i64 * 100)
    }
}

/// Load the session config.
///
/// An explicit path wins; otherwise the first of the well-known file
/// names found in the working directory is used. `DANMERGE_*` environment
/// variables override file values.
pub fn load_config(explicit: Option<&Path>) -> Result<Config>
{
    let mut builder = config::Config::builder();

    if let Some(path) = explicit
    {
        builder = builder.add_source(config::File::from(path.to_path_buf()));
    }
    else
    {
        // Load from config files in priority order
        let config_paths = ["danmerge.toml", "danmerge.json", ".danmerge.toml"];

        for path in &config_paths
        {
            if Path::new(path).exists()
            {
                debug!(path, "using config file");
                builder = builder.add_source(config::File::with_name(path));
                break;
            }
        }
    }

    // Add environment variables with DANMERGE_ prefix
    builder = builder.add_source(config::Environment::with_prefix("DANMERGE").prefix_separator("_"));

    let cfg = builder
        .build()
        .context("Failed to load configuration")?;
    let doc: BTreeMap<String, serde_json::Value> = cfg
        .try_deserialize()
        .context("Failed to parse configuration")?;

    // Environment keys arrive lowercased; the document keys are uppercase
    let doc: serde_json::Map<String, serde_json::Value> = doc
        .into_iter()
        .map(|(k, v)| (k.to_ascii_uppercase(), v))
        .collect();
    let raw: RawConfig = serde_json::from_value(serde_json::Value::Object(doc))
        .context("Failed to parse configuration")?;

    Ok(Config::from_raw(raw))
}

pub fn init(
    args: InitArgs,
    ctx: &AppContext,
) -> Result<()>
{
    let config_path: PathBuf = args
        .path
        .join("danmerge.toml");

    if config_path.exists() && !args.force
    {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    let config = Config::default();
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize default config")?;

    std::fs::write(&config_path, toml_string).context("Failed to write config file")?;

    if !ctx.quiet
    {
        println!("Created config file at {}", config_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults_survive_empty_document()
    {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn test_out_of_range_falls_back()
    {
        let cfg = Config::from_toml_str("THRESHOLD = 999\nREPRESENTATIVE_PERCENT = 150\n").unwrap();
        assert_eq!(cfg.threshold, 20);
        assert_eq!(cfg.representative_percent, 20);
    }

    #[test]
    fn test_wrong_type_falls_back()
    {
        let cfg = Config::from_json_str(r#"{"MAX_DIST": "lots", "CROSS_MODE": false}"#).unwrap();
        assert_eq!(cfg.max_dist, 5);
        assert!(!cfg.cross_mode);
    }

    #[test]
    fn test_string_values_are_retried()
    {
        let cfg = Config::from_json_str(r#"{"THRESHOLD": "5", "ENLARGE": "false"}"#).unwrap();
        assert_eq!(cfg.threshold, 5);
        assert!(!cfg.enlarge);
    }

    #[test]
    fn test_rules_parse()
    {
        let cfg = Config::from_toml_str(
            r#"
DANMU_MARK = "prefix"
WHITELIST = ["^前方高能"]

[[BLACKLIST]]
kind = "regex"
pattern = "^广告"

[[FORCELIST]]
pattern = "^(23{2,})$"
replacement = "2333"
"#,
        )
        .unwrap();
        assert_eq!(cfg.danmu_mark, DanmuMark::Prefix);
        assert_eq!(cfg.blacklist.len(), 1);
        assert!(cfg.blacklist[0].enabled);
        assert_eq!(cfg.forcelist[0].replacement, "2333");
        assert_eq!(cfg.whitelist, vec!["^前方高能".to_string()]);
    }

    #[test]
    fn test_threshold_disable()
    {
        let cfg = Config { threshold: -1, ..Config::default() };
        assert_eq!(cfg.threshold_cs(), None);
        assert_eq!(Config::default().threshold_cs(), Some(2000));
    }

    #[test]
    fn test_default_roundtrips_through_toml()
    {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        assert_eq!(Config::from_toml_str(&text).unwrap(), Config::default());
    }
}
