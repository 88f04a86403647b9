mod bootstrap;

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use health_core::error::HealthError;
use health_core::settings::Settings;
use health_data::analysis::{analyze_directory, AnalysisOptions, AnalysisResult};
use health_data::export::{write_summary_csv, write_summary_json};
use health_llm::{create_client, LlmConfig, Prompt, Query, QueryComposer};

fn main() -> Result<()> {
    let settings = Settings::load_with_last_used();

    bootstrap::ensure_directories()?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_ref())?;
    settings.validate()?;

    tracing::info!("health-query v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Provider: {}, Model: {}, Timezone: {}, Bucket: {}",
        settings.provider,
        settings.model,
        settings.timezone,
        settings.bucket
    );

    let tz = settings.tz();
    let now = Utc::now();

    let options = AnalysisOptions {
        root: settings.dir.clone(),
        recursive: !settings.no_recursive,
        window: settings.time_window(now),
        bucket: settings.bucket(),
        timezone: tz,
        sample_size: settings.sample_size,
    };
    let analysis = analyze_directory(&options)?;
    if analysis.records.is_empty() {
        return Err(HealthError::NoRecords(settings.dir.clone()).into());
    }

    write_exports(&settings, &analysis)?;

    let prompt = QueryComposer::default().compose(&Query {
        text: settings.query.as_deref(),
        files: &analysis.files,
        summary: &analysis.summary,
        today: now.with_timezone(&tz).date_naive(),
    });

    if settings.dry_run {
        print_prompt(&prompt)?;
        return Ok(());
    }

    let client = create_client(&LlmConfig {
        provider: settings.provider.clone(),
        model: settings.model.clone(),
        endpoint: settings.endpoint.clone(),
        api_key: settings.api_key.clone(),
        timeout: Duration::from_secs(settings.timeout),
        stream: !settings.no_stream,
    })?;

    let mut stdout = std::io::stdout();
    let answer = client
        .complete(&prompt, &mut |chunk| {
            // A closed stdout must not abort the request; the answer is still saved.
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        })
        .with_context(|| format!("querying {} model {} failed", client.name(), client.model()))?;
    writeln!(stdout)?;

    if let Some(path) = &settings.output {
        save_answer(path, &answer)?;
        tracing::info!("Saved response to {}", path.display());
    }

    Ok(())
}

fn write_exports(settings: &Settings, analysis: &AnalysisResult) -> Result<()> {
    if let Some(path) = &settings.export_summary {
        write_summary_json(&analysis.summary, path)?;
    }
    if let Some(path) = &settings.export_csv {
        write_summary_csv(&analysis.summary, path)?;
    }
    Ok(())
}

fn print_prompt(prompt: &Prompt) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "--- system ---\n{}\n", prompt.system)?;
    writeln!(stdout, "--- user ---\n{}", prompt.user)?;
    Ok(())
}

fn save_answer(path: &Path, answer: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, answer)
        .with_context(|| format!("failed to write response to {}", path.display()))
}
