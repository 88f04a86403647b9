use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{CommandFactory, Parser};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{HealthError, Result};
use crate::models::{Bucket, TimeWindow};
use crate::time_utils;

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Ask a language model about your Apple Health, CSV, GPX and FIT exports
#[derive(Parser, Debug, Clone)]
#[command(
    name = "health-query",
    about = "Ask a language model about your Apple Health, CSV, GPX and FIT exports",
    version
)]
pub struct Settings {
    /// Directory to search for data files
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    /// Custom question for the LLM (default: a general health analysis)
    #[arg(long)]
    pub query: Option<String>,

    /// LLM provider
    #[arg(long, default_value = "ollama", value_parser = ["ollama", "openai"])]
    pub provider: String,

    /// Model to use
    #[arg(long, default_value = "deepseek-r1")]
    pub model: String,

    /// Base URL of the inference endpoint (provider default when omitted)
    #[arg(long, env = "HEALTH_QUERY_ENDPOINT")]
    pub endpoint: Option<String>,

    /// API key for remote endpoints
    #[arg(long, env = "HEALTH_QUERY_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Request timeout in seconds (1-3600)
    #[arg(long, default_value = "300", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: u64,

    /// Wait for the full response instead of streaming it
    #[arg(long)]
    pub no_stream: bool,

    /// Only include records on or after this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    pub since: Option<NaiveDate>,

    /// Only include records on or before this date (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date_arg)]
    pub until: Option<NaiveDate>,

    /// Only include the last N days (overrides --since)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub last_days: Option<u32>,

    /// Break the summary down by calendar period
    #[arg(long, default_value = "none", value_parser = ["none", "day", "week", "month"])]
    pub bucket: String,

    /// Timezone for naive timestamps and period buckets (auto-detected if not specified)
    #[arg(long, default_value = "auto")]
    pub timezone: String,

    /// Sample records per file included in the prompt
    #[arg(long, default_value = "5")]
    pub sample_size: usize,

    /// Only scan the top level of --dir
    #[arg(long)]
    pub no_recursive: bool,

    /// Save the LLM response to this file
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Write the metric summary as JSON
    #[arg(long)]
    pub export_summary: Option<PathBuf>,

    /// Write the metric summary as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Print the prompt and exit without contacting the LLM
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Clear saved configuration
    #[arg(long)]
    pub clear: bool,
}

fn parse_date_arg(s: &str) -> std::result::Result<NaiveDate, String> {
    time_utils::parse_date(s).ok_or_else(|| format!("expected YYYY-MM-DD, got \"{s}\""))
}

// ── LastUsedParams ─────────────────────────────────────────────────────────────

/// Persisted last-used parameters saved to `~/.health-query/last_used.json`.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
pub struct LastUsedParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
}

impl LastUsedParams {
    /// Return the default path to the persisted config file.
    pub fn config_path() -> PathBuf {
        Self::config_path_in(&dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
    }

    /// Return the config path rooted at `base_dir` (used for testing).
    pub fn config_path_in(base_dir: &Path) -> PathBuf {
        base_dir.join(".health-query").join("last_used.json")
    }

    /// Load persisted params from an explicit path.
    ///
    /// Returns `Default` when the file is absent or cannot be parsed.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Atomically write params to an explicit path, creating parent
    /// directories if needed.
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, path)?;

        Ok(())
    }

    /// Delete the config file at an explicit path if it exists.
    pub fn clear_at(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse CLI arguments, merge with last-used params where no explicit
    /// value was provided, resolve `"auto"` values, and persist the result.
    pub fn load_with_last_used() -> Self {
        Self::load_with_last_used_impl(
            std::env::args_os().collect(),
            &LastUsedParams::config_path(),
        )
    }

    /// Full implementation; accepts args and an explicit config path so that
    /// tests can redirect to a temporary directory.
    pub fn load_with_last_used_impl(args: Vec<std::ffi::OsString>, config_path: &Path) -> Self {
        let matches = Settings::command().get_matches_from(args.clone());
        let mut settings = Settings::parse_from(args);

        if settings.clear {
            let _ = LastUsedParams::clear_at(config_path);
            return Self::resolve_auto_values(settings);
        }

        let last = LastUsedParams::load_from(config_path);

        // A provider switch on the command line invalidates the saved model
        // and endpoint, which belong to the previous provider.
        let provider_explicit = is_arg_explicitly_set(&matches, "provider");
        let same_provider = match &last.provider {
            Some(p) => !provider_explicit || *p == settings.provider,
            None => true,
        };

        if !provider_explicit {
            if let Some(v) = last.provider.clone() {
                settings.provider = v;
            }
        }
        if same_provider {
            if !is_arg_explicitly_set(&matches, "model") {
                if let Some(v) = last.model {
                    settings.model = v;
                }
            }
            if !is_arg_explicitly_set(&matches, "endpoint") && settings.endpoint.is_none() {
                settings.endpoint = last.endpoint;
            }
        }
        if !is_arg_explicitly_set(&matches, "timezone") {
            if let Some(v) = last.timezone {
                settings.timezone = v;
            }
        }
        if !is_arg_explicitly_set(&matches, "bucket") {
            if let Some(v) = last.bucket {
                settings.bucket = v;
            }
        }

        settings = Self::resolve_auto_values(settings);

        // Only settings that pass validation are remembered for later runs.
        if settings.validate().is_ok() {
            let params = LastUsedParams::from(&settings);
            let _ = params.save_to(config_path);
        }

        settings
    }

    /// Resolve `"auto"` sentinel values and apply the `--debug` flag.
    fn resolve_auto_values(mut settings: Settings) -> Settings {
        if settings.timezone == "auto" {
            settings.timezone = time_utils::get_system_timezone();
        }
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Reject combinations clap cannot express on its own.
    pub fn validate(&self) -> Result<()> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(HealthError::Config(format!(
                    "--since {since} is after --until {until}"
                )));
            }
        }
        let auto = self.timezone.eq_ignore_ascii_case("auto");
        if !auto && !time_utils::validate_timezone(&self.timezone) {
            return Err(HealthError::Config(format!(
                "unknown timezone \"{}\" (expected an IANA name such as Europe/Berlin)",
                self.timezone
            )));
        }
        if self.provider == "openai" && self.api_key.is_none() && self.endpoint.is_none() {
            return Err(HealthError::Config(
                "the openai provider needs --api-key (or HEALTH_QUERY_API_KEY)".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured summary bucket, `None` for `"none"`.
    pub fn bucket(&self) -> Option<Bucket> {
        self.bucket.parse().ok()
    }

    pub fn tz(&self) -> Tz {
        time_utils::resolve_timezone(&self.timezone)
    }

    /// The analysis window; `--last-days` wins over `--since`.
    pub fn time_window(&self, now: DateTime<Utc>) -> TimeWindow {
        let tz = self.tz();
        let dated = TimeWindow::from_dates(self.since, self.until, tz);
        match self.last_days {
            Some(days) => TimeWindow::new(TimeWindow::last_days(days, now).start, dated.end),
            None => dated,
        }
    }
}

// ── Conversion ─────────────────────────────────────────────────────────────────

impl From<&Settings> for LastUsedParams {
    fn from(s: &Settings) -> Self {
        LastUsedParams {
            provider: Some(s.provider.clone()),
            model: Some(s.model.clone()),
            endpoint: s.endpoint.clone(),
            timezone: Some(s.timezone.clone()),
            bucket: Some(s.bucket.clone()),
        }
    }
}

/// Returns `true` when `name` was supplied on the command line or through its
/// environment variable (not via a default value).
fn is_arg_explicitly_set(matches: &clap::ArgMatches, name: &str) -> bool {
    matches!(
        matches.value_source(name),
        Some(clap::parser::ValueSource::CommandLine) | Some(clap::parser::ValueSource::EnvVariable)
    )
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tmp_config_path(tmp: &TempDir) -> PathBuf {
        LastUsedParams::config_path_in(tmp.path())
    }

    fn args(list: &[&str]) -> Vec<std::ffi::OsString> {
        list.iter().map(|s| s.into()).collect()
    }

    // ── LastUsedParams ────────────────────────────────────────────────────────

    #[test]
    fn test_last_used_params_save_load() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        let params = LastUsedParams {
            provider: Some("openai".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            endpoint: Some("https://llm.example.com/v1".to_string()),
            timezone: Some("Europe/Berlin".to_string()),
            bucket: Some("week".to_string()),
        };
        params.save_to(&path).expect("save");

        let loaded = LastUsedParams::load_from(&path);
        assert_eq!(loaded.provider.as_deref(), Some("openai"));
        assert_eq!(loaded.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(loaded.endpoint.as_deref(), Some("https://llm.example.com/v1"));
        assert_eq!(loaded.timezone.as_deref(), Some("Europe/Berlin"));
        assert_eq!(loaded.bucket.as_deref(), Some("week"));
    }

    #[test]
    fn test_last_used_params_clear() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        LastUsedParams {
            model: Some("llama3".to_string()),
            ..Default::default()
        }
        .save_to(&path)
        .expect("save");
        assert!(path.exists());

        LastUsedParams::clear_at(&path).expect("clear");
        assert!(!path.exists());
    }

    #[test]
    fn test_last_used_params_default_when_corrupt() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp_config_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let loaded = LastUsedParams::load_from(&path);
        assert!(loaded.model.is_none());
        assert!(loaded.provider.is_none());
    }

    // ── Settings parsing ──────────────────────────────────────────────────────

    #[test]
    fn test_settings_default_values() {
        let settings = Settings::parse_from(["health-query"]);

        assert_eq!(settings.dir, PathBuf::from("."));
        assert!(settings.query.is_none());
        assert_eq!(settings.provider, "ollama");
        assert_eq!(settings.model, "deepseek-r1");
        assert_eq!(settings.timeout, 300);
        assert_eq!(settings.bucket, "none");
        assert_eq!(settings.timezone, "auto");
        assert_eq!(settings.sample_size, 5);
        assert_eq!(settings.log_level, "INFO");
        assert!(!settings.no_stream);
        assert!(!settings.dry_run);
        assert!(!settings.clear);
        assert!(settings.bucket().is_none());
    }

    #[test]
    fn test_settings_cli_query_and_dir() {
        let settings = Settings::parse_from([
            "health-query",
            "--dir",
            "healthdata",
            "--query",
            "Summarize my running and cycling activities.",
        ]);
        assert_eq!(settings.dir, PathBuf::from("healthdata"));
        assert_eq!(
            settings.query.as_deref(),
            Some("Summarize my running and cycling activities.")
        );
    }

    #[test]
    fn test_settings_cli_dates() {
        let settings =
            Settings::parse_from(["health-query", "--since", "2024-01-01", "--until", "2024-01-31"]);
        assert_eq!(settings.since, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(settings.until, NaiveDate::from_ymd_opt(2024, 1, 31));
    }

    #[test]
    fn test_settings_cli_rejects_bad_date() {
        assert!(Settings::try_parse_from(["health-query", "--since", "01/02/2024"]).is_err());
    }

    #[test]
    fn test_settings_cli_rejects_unknown_provider() {
        assert!(Settings::try_parse_from(["health-query", "--provider", "bard"]).is_err());
    }

    #[test]
    fn test_settings_bucket_accessor() {
        let settings = Settings::parse_from(["health-query", "--bucket", "week"]);
        assert_eq!(settings.bucket(), Some(Bucket::Week));
    }

    #[test]
    fn test_settings_validate_since_after_until() {
        let settings =
            Settings::parse_from(["health-query", "--since", "2024-02-01", "--until", "2024-01-01"]);
        assert!(matches!(settings.validate(), Err(HealthError::Config(_))));
    }

    #[test]
    fn test_settings_validate_rejects_unknown_timezone() {
        let settings = Settings::parse_from(["health-query", "--timezone", "Mars/Olympus"]);
        assert!(matches!(settings.validate(), Err(HealthError::Config(_))));

        let settings = Settings::parse_from(["health-query", "--timezone", "Europe/Berlin"]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_time_window_last_days_overrides_since() {
        let settings = Settings::parse_from([
            "health-query",
            "--timezone",
            "UTC",
            "--since",
            "2020-01-01",
            "--last-days",
            "7",
        ]);
        let now = DateTime::parse_from_rfc3339("2024-01-15T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let window = settings.time_window(now);
        assert_eq!(
            window.start,
            Some(
                DateTime::parse_from_rfc3339("2024-01-08T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc)
            )
        );
    }

    // ── load_with_last_used ───────────────────────────────────────────────────

    #[test]
    fn test_load_with_last_used_merges_persisted_model() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            provider: Some("ollama".to_string()),
            model: Some("llama3.1".to_string()),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings = Settings::load_with_last_used_impl(args(&["health-query"]), &config_path);
        assert_eq!(settings.model, "llama3.1");
        assert_eq!(settings.timezone, "UTC");
    }

    #[test]
    fn test_load_with_last_used_cli_overrides_persisted() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            model: Some("llama3.1".to_string()),
            bucket: Some("day".to_string()),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings = Settings::load_with_last_used_impl(
            args(&["health-query", "--model", "mistral", "--bucket", "month"]),
            &config_path,
        );
        assert_eq!(settings.model, "mistral");
        assert_eq!(settings.bucket, "month");
    }

    #[test]
    fn test_load_with_last_used_provider_switch_drops_saved_model() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            provider: Some("ollama".to_string()),
            model: Some("llama3.1".to_string()),
            endpoint: Some("http://gpu-box:11434".to_string()),
            timezone: Some("UTC".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings = Settings::load_with_last_used_impl(
            args(&["health-query", "--provider", "openai", "--api-key", "sk-test"]),
            &config_path,
        );
        assert_eq!(settings.provider, "openai");
        assert_eq!(settings.model, "deepseek-r1");
        assert!(settings.endpoint.is_none());
    }

    #[test]
    fn test_load_with_last_used_clear_removes_file() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        LastUsedParams {
            model: Some("llama3.1".to_string()),
            ..Default::default()
        }
        .save_to(&config_path)
        .expect("save");

        let settings = Settings::load_with_last_used_impl(
            args(&["health-query", "--clear", "--timezone", "UTC"]),
            &config_path,
        );
        assert!(!config_path.exists());
        assert_eq!(settings.model, "deepseek-r1");
    }

    #[test]
    fn test_load_with_last_used_debug_overrides_log_level() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);
        let settings = Settings::load_with_last_used_impl(
            args(&["health-query", "--debug", "--timezone", "UTC"]),
            &config_path,
        );
        assert_eq!(settings.log_level, "DEBUG");
    }

    #[test]
    fn test_load_with_last_used_persists_after_run() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        Settings::load_with_last_used_impl(
            args(&["health-query", "--model", "phi3", "--timezone", "UTC"]),
            &config_path,
        );

        assert!(config_path.exists());
        let loaded = LastUsedParams::load_from(&config_path);
        assert_eq!(loaded.model.as_deref(), Some("phi3"));
        assert_eq!(loaded.timezone.as_deref(), Some("UTC"));
    }

    #[test]
    fn test_load_with_last_used_does_not_persist_unknown_timezone() {
        let tmp = TempDir::new().expect("tempdir");
        let config_path = tmp_config_path(&tmp);

        let settings = Settings::load_with_last_used_impl(
            args(&["health-query", "--timezone", "Mars/Olympus"]),
            &config_path,
        );

        assert!(matches!(settings.validate(), Err(HealthError::Config(_))));
        assert!(!config_path.exists());
    }
}
