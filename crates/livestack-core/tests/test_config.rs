use livestack_core::config::SessionConfig;
use livestack_core::error::LiveStackError;
use livestack_core::frame::BayerPattern;
use livestack_core::io::OutputFormat;
use livestack_core::process::StretchMethod;
use livestack_core::stack::{Normalization, StackMethod};

#[test]
fn test_default_config_round_trips_through_toml() {
    let mut config = SessionConfig::new("/data/scan", "/data/work");
    config.bayer_pattern = Some(BayerPattern::Rggb);
    config.preprocess.dark.enabled = true;
    config.preprocess.dark.path = Some("/data/dark.tif".into());
    config.output.format = OutputFormat::Jpeg;

    let text = toml::to_string_pretty(&config).unwrap();
    let parsed: SessionConfig = toml::from_str(&text).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let text = r#"
        workers = 4

        [paths]
        scan_folder = "/in"
        work_folder = "/out"

        [stacking]
        method = "sum"
        normalization = "local"

        [postprocess.autostretch]
        enabled = true
        params = { method = "log", strength = 0.8 }
    "#;
    let config: SessionConfig = toml::from_str(text).unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.queue_size, 8);
    assert_eq!(config.stacking.method, StackMethod::Sum);
    assert_eq!(config.stacking.normalization, Normalization::Local);
    assert_eq!(config.postprocess.autostretch.params.method, StretchMethod::Log);
    assert!(!config.postprocess.levels.enabled);
    assert!(config.alignment.enabled);
    assert_eq!(config.alignment.min_matches, 25);
    assert_eq!(config.output.format, OutputFormat::Tiff);
    assert!(config.validate().is_ok());
}

#[test]
fn test_out_of_range_values_are_rejected() {
    let base = SessionConfig::new("/in", "/out");

    let mut config = base.clone();
    config.workers = 0;
    assert!(matches!(config.validate(), Err(LiveStackError::Config(_))));

    let mut config = base.clone();
    config.queue_size = 0;
    assert!(config.validate().is_err());

    let mut config = base.clone();
    config.web.port = 80;
    assert!(config.validate().is_err());

    let mut config = base.clone();
    config.web.port = 1024;
    assert!(config.validate().is_ok());

    let mut config = base.clone();
    config.alignment.min_matches = 2;
    assert!(config.validate().is_err());

    let mut config = base.clone();
    config.alignment.min_matches = config.alignment.detection.max_stars + 1;
    assert!(matches!(config.validate(), Err(LiveStackError::Config(_))));

    let mut config = base;
    config.alignment.detection.max_stars = 100;
    config.alignment.min_matches = 80;
    assert!(config.validate().is_ok());
}
