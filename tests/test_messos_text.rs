use messos_pdf_server_rs::extractor::{Extractor, ExtractorConfig};
use messos_pdf_server_rs::models::ValueSource;
use messos_pdf_server_rs::overrides::OverrideTable;
use rust_decimal_macros::dec;
use std::fs;
use std::path::PathBuf;

fn load_sample() -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("statements/messos_sample.txt");
    fs::read_to_string(&path).expect("Failed to read statements/messos_sample.txt")
}

#[test]
fn test_heuristic_extraction_of_sample_statement() {
    let text = load_sample();
    let extractor = Extractor::new(ExtractorConfig {
        overrides: OverrideTable::new(),
        expected_total: Some(dec!(1984218)),
        ..Default::default()
    });

    let data = extractor.extract_text(&text);
    let found: Vec<(&str, _)> = data.holdings.iter().map(|s| (s.isin.as_str(), s.value)).collect();
    assert_eq!(
        found,
        vec![
            ("XS2530201644", dec!(199080)),
            ("XS2588105036", dec!(200288)),
            ("XS2692298537", dec!(1483500)),
            ("CH0012032048", dec!(101350)),
        ]
    );

    assert_eq!(data.holdings[0].name.as_deref(), Some("TORONTO DOMINION BANK NOTES"));
    assert_eq!(data.holdings[3].currency, "CHF");
    assert!(data.holdings.iter().all(|s| s.source == ValueSource::Heuristic));
    assert_eq!(data.portfolio_info.stated_total, Some(dec!(1984218)));

    let result = extractor.score(&data);
    assert_eq!(result.total_value, dec!(1984218));
    assert_eq!(result.accuracy, Some(100.0));
}

#[test]
fn test_builtin_overrides_mark_known_bonds() {
    let text = load_sample();
    let extractor = Extractor::new(ExtractorConfig::default());
    let securities = extractor.extract_securities(&text);

    let overridden: Vec<&str> = securities
        .iter()
        .filter(|s| s.source == ValueSource::Override)
        .map(|s| s.isin.as_str())
        .collect();
    assert_eq!(overridden, vec!["XS2530201644", "XS2588105036"]);
    assert!(securities.iter().filter(|s| s.source == ValueSource::Override).all(|s| s.confidence == 1.0));
}

#[test]
fn test_partial_statement_scores_below_full_portfolio() {
    let text = load_sample();
    let extractor = Extractor::new(ExtractorConfig::default());
    let result = extractor.extract_result(&text);

    let accuracy = result.accuracy.expect("default config has an expected total");
    assert!(accuracy > 0.0 && accuracy < 95.0, "accuracy was {}", accuracy);
}
