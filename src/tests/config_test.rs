//! Configuration loading and validation tests.

use crate::config::{CommandLineArgs, Config};

#[test]
fn defaults_are_valid() {
    let config = Config::default();
    config.validate().expect("defaults validate");

    assert_eq!(config.server.port, 8080);
    assert!(config.sources.maricopa.base_url.starts_with("https://"));
    assert_eq!(config.sources.maricopa.safety_margin, 0.10);
    assert_eq!(config.processing.batch_size, 10);
    assert_eq!(config.extraction.prompt_version, "v2");
    assert!(config.collection.zipcodes.is_empty());
}

#[test]
fn rejects_out_of_range_values() {
    let mut config = Config::default();
    config.server.port = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.database.max_pool_size = 11;
    assert!(config.validate().is_err(), "pool size capped at 10");

    let mut config = Config::default();
    config.sources.maricopa.safety_margin = 1.0;
    assert!(config.validate().is_err(), "margin must stay below 1");

    let mut config = Config::default();
    config.sources.maricopa.base_url = "http://insecure.example.com".to_string();
    assert!(config.validate().is_err(), "HTTPS required");

    let mut config = Config::default();
    config.processing.max_concurrent = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.collection.zipcodes = vec!["85001".to_string(), "bad".to_string()];
    assert!(config.validate().is_err(), "every configured ZIP is checked");
}

#[test]
fn cli_overrides_take_effect() {
    let args = CommandLineArgs {
        server_port: Some(9090),
        zipcodes: Some("85001, 85048".to_string()),
        llm_endpoint: Some("http://localhost:8000/v1".to_string()),
        ..Default::default()
    };

    let config = Config::load_with_args(args).expect("loads");
    assert_eq!(config.server.port, 9090);
    assert_eq!(config.collection.zipcodes, vec!["85001", "85048"]);
    assert_eq!(config.extraction.llm_endpoint, "http://localhost:8000/v1");
}

#[test]
fn parsed_toml_fills_missing_sections_with_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [server]
        port = 9999

        [sources.maricopa]
        base_url = "https://mcassessor.maricopa.gov/api"
        rate_limit_per_window = 500

        [collection]
        zipcodes = ["85001", "85048"]
        "#,
    )
    .expect("parses");

    assert_eq!(parsed.server.port, 9999);
    assert_eq!(parsed.server.host, "0.0.0.0", "missing fields default");
    assert_eq!(parsed.sources.maricopa.rate_limit_per_window, 500);
    assert_eq!(parsed.sources.maricopa.safety_margin, 0.10);
    assert_eq!(parsed.collection.zipcodes.len(), 2);
    assert_eq!(parsed.processing.batch_size, 10);
    parsed.validate().expect("validates");
}

#[test]
fn duration_helpers_convert_seconds() {
    let config = Config::default();
    assert_eq!(config.sources.maricopa.timeout().as_secs(), 30);
    assert_eq!(config.extraction.cache_ttl().as_secs(), 24 * 3600);
    assert_eq!(
        config.sources.phoenix_mls.session_max_age().as_secs(),
        12 * 3600
    );
}
