use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::args::Args;
use crate::ensu::*;

/// The optional configuration file.
///
/// All the fields are optional. Relative paths are relative to the directory of the
/// configuration file.
#[derive(Eq, PartialEq, Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EnsuConfig {
    pub input_directory: Option<String>,
    /// A file path, or `stdout`.
    pub output_file: Option<String>,
    pub summary_file: Option<String>,
    pub reference_file: Option<String>,
    pub entity: Option<String>,
    pub group_by_city: Option<bool>,
    pub incremental: Option<bool>,
    pub small_group_threshold: Option<u64>,
    /// `largestMatchedCount` or `mostRecent`
    pub duplicate_policy: Option<String>,
    pub data_markers: Option<Vec<String>>,
    pub exclude_markers: Option<Vec<String>>,
    /// Numeric municipality code -> municipality name
    pub municipality_codes: Option<BTreeMap<String, String>>,
}

pub fn read_config(path: &str) -> EnsuResult<EnsuConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: EnsuConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_config: {:?}", config);
    Ok(config)
}

fn resolve_path(base: &Path, p: &str) -> PathBuf {
    base.join(p)
}

// `stdout` and the empty string both mean the standard output.
fn output_target(p: &str, base: &Path) -> Option<PathBuf> {
    match p.trim() {
        "" | "stdout" => None,
        x => Some(resolve_path(base, x)),
    }
}

fn parse_duplicate_policy(s: &str) -> EnsuResult<DuplicatePolicy> {
    match s {
        "largestMatchedCount" => Ok(DuplicatePolicy::LargestMatchedCount),
        "mostRecent" => Ok(DuplicatePolicy::MostRecent),
        x => whatever!(
            "Cannot use duplicate policy {:?}: expected largestMatchedCount or mostRecent",
            x
        ),
    }
}

/// Merges the configuration file (if any) and the command line. The command line wins.
pub fn build_settings(args: &Args) -> EnsuResult<RunSettings> {
    let (config, base) = match &args.config {
        Some(p) => {
            let config = read_config(p)?;
            let base = Path::new(p)
                .parent()
                .map(|d| d.to_path_buf())
                .unwrap_or_default();
            (config, base)
        }
        None => (EnsuConfig::default(), PathBuf::new()),
    };
    let cwd = PathBuf::new();

    let input_dir = match (&args.input, &config.input_directory) {
        (Some(p), _) => resolve_path(&cwd, p),
        (None, Some(p)) => resolve_path(&base, p),
        (None, None) => whatever!(
            "No input directory: use --input or set inputDirectory in the configuration file"
        ),
    };

    let mut settings = RunSettings::new(&input_dir);
    settings.out = match (&args.out, &config.output_file) {
        (Some(p), _) => output_target(p, &cwd),
        (None, Some(p)) => output_target(p, &base),
        (None, None) => None,
    };
    settings.summary = match (&args.summary, &config.summary_file) {
        (Some(p), _) => Some(resolve_path(&cwd, p)),
        (None, p) => p.as_ref().map(|p| resolve_path(&base, p)),
    };
    settings.reference = match (&args.reference, &config.reference_file) {
        (Some(p), _) => Some(resolve_path(&cwd, p)),
        (None, p) => p.as_ref().map(|p| resolve_path(&base, p)),
    };
    if let Some(e) = args.entity.as_ref().or(config.entity.as_ref()) {
        settings.entity = e.clone();
    }
    settings.rules.group_by_city = args.group_by_city || config.group_by_city.unwrap_or(false);
    settings.incremental = args.incremental || config.incremental.unwrap_or(false);
    if let Some(t) = config.small_group_threshold {
        settings.rules.small_group_threshold = t;
    }
    if let Some(s) = &config.duplicate_policy {
        settings.rules.duplicate_policy = parse_duplicate_policy(s)?;
    }
    if let Some(m) = &config.data_markers {
        settings.markers.data = m.iter().map(|s| s.to_lowercase()).collect();
    }
    if let Some(m) = &config.exclude_markers {
        settings.markers.exclude = m.iter().map(|s| s.to_lowercase()).collect();
    }
    if let Some(codes) = &config.municipality_codes {
        settings.municipality_codes = codes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
    info!("settings: {:?}", settings);
    Ok(settings)
}
