use super::data::{AnimationSettings, Config};
use super::defaults::{builtin_models, DEFAULT_MAX_EDIT_LENGTH, DEFAULT_MODEL};
use super::io::{ConfigError, EDGE_BASE_URL_ENV};
use crate::api::ModelConfig;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_nonexistent_config() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nonexistent_config.toml");

    let config = Config::load_from_path(&config_path).expect("Failed to load config");

    assert_eq!(config, Config::default());
    assert_eq!(config.max_edit_length, DEFAULT_MAX_EDIT_LENGTH);
    assert_eq!(config.auto_save_interval_ms, Some(2_000));
}

#[test]
fn test_config_persistence_lifecycle() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("nested").join("config.toml");

    let mut config = Config {
        edge_base_url: Some("http://localhost:54321/functions/v1".to_string()),
        auto_save_interval_ms: None,
        animation: AnimationSettings::disabled(),
        ..Default::default()
    };
    config.set_default_model("sonar");
    config.save_to_path(&config_path).expect("save failed");

    let loaded = Config::load_from_path(&config_path).expect("load failed");
    assert_eq!(loaded, config);
    assert_eq!(loaded.auto_save_interval(), None);

    config.default_model = None;
    config.save_to_path(&config_path).expect("second save failed");
    let reloaded = Config::load_from_path(&config_path).expect("reload failed");
    assert_eq!(reloaded.default_model, None);
}

#[test]
fn partial_files_fill_in_defaults() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
        max_edit_length = 500

        [animation]
        chars_per_tick = 3
        "#,
    )
    .expect("write");

    let config = Config::load_from_path(&config_path).expect("load");
    assert_eq!(config.max_edit_length, 500);
    assert_eq!(config.animation.chars_per_tick, 3);
    assert!(config.animation.enabled);
    assert_eq!(config.command_history_limit, 20);
}

#[test]
fn invalid_toml_reports_parse_error_with_path() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "max_edit_length = \"lots\"").expect("write");

    let error = Config::load_from_path(&config_path).expect_err("should fail");
    assert!(matches!(error, ConfigError::Parse { .. }));
    assert!(error.to_string().contains("config.toml"));
}

#[test]
fn builtin_catalog_parses_and_contains_default_model() {
    let models = builtin_models();
    assert!(models.iter().any(|model| model.id == DEFAULT_MODEL));
    assert!(models.iter().any(|model| model.supports_search));
}

#[test]
fn custom_models_override_builtins_by_id() {
    let config = Config {
        models: vec![
            ModelConfig {
                id: "gpt-4o".to_string(),
                display_name: "GPT-4o (team)".to_string(),
                token_parameter: "max_tokens".to_string(),
                supports_custom_temperature: false,
                default_temperature: 0.3,
                supports_search: false,
            },
            ModelConfig {
                id: "local-llama".to_string(),
                display_name: "Local Llama".to_string(),
                token_parameter: "max_tokens".to_string(),
                supports_custom_temperature: true,
                default_temperature: 0.8,
                supports_search: false,
            },
        ],
        ..Default::default()
    };

    let catalog = config.model_catalog();
    let overridden = catalog
        .iter()
        .find(|model| model.id == "gpt-4o")
        .expect("gpt-4o");
    assert_eq!(overridden.display_name, "GPT-4o (team)");
    assert_eq!(catalog.iter().filter(|model| model.id == "gpt-4o").count(), 1);
    assert!(catalog.iter().any(|model| model.id == "local-llama"));
    assert!(catalog[0].supports_search);
}

#[test]
fn unknown_default_model_falls_back() {
    let mut config = Config::default();
    config.set_default_model("retired-model");
    assert_eq!(config.active_model_id(), DEFAULT_MODEL);

    config.set_default_model("sonar-pro");
    assert_eq!(config.active_model_id(), "sonar-pro");
}

#[test]
fn environment_overrides_edge_url() {
    let mut config = Config::default();
    config.apply_env_overrides(|key| {
        (key == EDGE_BASE_URL_ENV).then(|| "https://edge.test/functions/v1".to_string())
    });
    assert_eq!(
        config.edge_base_url.as_deref(),
        Some("https://edge.test/functions/v1")
    );

    config.apply_env_overrides(|_| Some("   ".to_string()));
    assert_eq!(
        config.edge_base_url.as_deref(),
        Some("https://edge.test/functions/v1")
    );
}
