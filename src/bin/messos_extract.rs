use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use messos_pdf_server_rs::config::Config;
use messos_pdf_server_rs::extractor::Extractor;
use messos_pdf_server_rs::models::ExtractionMethod;
use messos_pdf_server_rs::overrides::OverrideTable;
use messos_pdf_server_rs::pdf::{extract_text_from_pdf, PdfContent};
use messos_pdf_server_rs::report::{write_report, ExtractionReport};

/// Run the heuristic extractor over a Messos statement and write a JSON report.
#[derive(Parser, Debug)]
#[command(name = "messos-extract", version)]
struct Args {
    /// Statement as PDF or as already-extracted text
    input: PathBuf,

    /// Directory for the `heuristic-results-<millis>.json` report
    #[arg(long, default_value = "reports")]
    report_dir: PathBuf,

    /// Skip the built-in corrections for known ISINs
    #[arg(long)]
    no_overrides: bool,
}

fn read_statement(path: &Path) -> Result<String> {
    let is_pdf = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));

    if !is_pdf {
        return std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()));
    }

    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    match extract_text_from_pdf(&bytes) {
        PdfContent::Text(text) => Ok(text),
        PdfContent::ScannedImage => bail!("{} is a scanned PDF with no text layer", path.display()),
        PdfContent::Invalid(e) | PdfContent::ExtractionFailed(e) => bail!("{}: {}", path.display(), e),
    }
}

fn run(args: Args) -> Result<bool> {
    let mut config = Config::from_env()?;
    if args.no_overrides {
        config.extractor.overrides = OverrideTable::new();
    }

    let text = read_statement(&args.input)?;
    let extractor = Extractor::new(config.extractor.clone());
    let result = extractor.extract_result(&text);

    println!("{:<14} {:>14}  {:>5}  {:<10} NAME", "ISIN", "VALUE", "CONF", "SOURCE");
    for s in &result.securities {
        println!(
            "{:<14} {:>14}  {:>5.2}  {:<10} {}{}",
            s.isin,
            s.value.round_dp(2),
            s.confidence,
            format!("{:?}", s.source).to_lowercase(),
            s.name.as_deref().unwrap_or("-"),
            if s.needs_review { "  [review]" } else { "" }
        );
    }
    println!();
    println!("Securities: {}", result.securities.len());
    println!("Total:      {}", result.total_value.round_dp(2));

    let passed = match (result.expected_total, result.accuracy) {
        (Some(expected), Some(accuracy)) => {
            println!("Expected:   {}", expected.round_dp(2));
            println!("Accuracy:   {:.2}% (threshold {:.2}%)", accuracy, config.success_threshold);
            accuracy >= config.success_threshold
        }
        _ => true,
    };

    let source_file = args.input.display().to_string();
    let report = ExtractionReport::new(source_file, ExtractionMethod::Heuristic, result);
    let path = write_report(&args.report_dir, "heuristic", &report)?;
    println!("Report:     {}", path.display());

    Ok(passed)
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    match run(args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("Accuracy below threshold");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults_and_flags() {
        let args = Args::try_parse_from(["messos-extract", "messos.pdf"]).unwrap();
        assert_eq!(args.input, PathBuf::from("messos.pdf"));
        assert_eq!(args.report_dir, PathBuf::from("reports"));
        assert!(!args.no_overrides);

        let args = Args::try_parse_from(["messos-extract", "--report-dir=out", "--no-overrides", "statement.txt"]).unwrap();
        assert_eq!(args.report_dir, PathBuf::from("out"));
        assert!(args.no_overrides);
    }

    #[test]
    fn test_args_reject_extra_inputs() {
        assert!(Args::try_parse_from(["messos-extract", "a.pdf", "b.pdf"]).is_err());
        assert!(Args::try_parse_from(["messos-extract"]).is_err());
    }
}
