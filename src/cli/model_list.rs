//! Model catalog listing

use std::error::Error;

use crate::api::models::{sort_models, ModelConfig};
use crate::core::config::data::path_display;
use crate::core::config::Config;

pub fn list_models(new_default: Option<String>) -> Result<(), Box<dyn Error>> {
    let config_path = Config::get_config_path()?;
    let mut config = Config::load_from_path(&config_path)?;

    if let Some(model) = new_default {
        set_default_model(&mut config, &model)?;
        config.save_to_path(&config_path)?;
        println!("✅ Set default-model to: {model} ({})", path_display(&config_path));
        return Ok(());
    }

    let active = config.active_model_id();
    let mut models = config.model_catalog();
    sort_models(&mut models);

    println!("🤖 Available Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    for model in &models {
        println!("{}", format_model_line(model, &active));
    }
    println!();
    println!("🎯 Default model: {active}");
    Ok(())
}

/// Validate `model` against the catalog before making it the default.
fn set_default_model(config: &mut Config, model: &str) -> Result<(), Box<dyn Error>> {
    if !config.model_catalog().iter().any(|entry| entry.id == model) {
        return Err(format!("Unknown model '{model}'. Run 'parley models' to see the catalog.").into());
    }
    config.set_default_model(model);
    Ok(())
}

fn format_model_line(model: &ModelConfig, active: &str) -> String {
    let marker = if model.id == active { "*" } else { " " };
    let mut tags = Vec::new();
    if model.supports_search {
        tags.push("search".to_string());
    }
    if !model.supports_custom_temperature {
        tags.push("fixed temperature".to_string());
    }
    if model.token_parameter != "max_tokens" {
        tags.push(model.token_parameter.clone());
    }
    let tags = if tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", tags.join(", "))
    };
    format!("{marker} {:<14} {}{tags}", model.id, model.display_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::defaults::builtin_models;

    #[test]
    fn model_lines_mark_the_active_model_and_capabilities() {
        let models = builtin_models();
        let sonar = models.iter().find(|m| m.id == "sonar").expect("sonar");
        let o3 = models.iter().find(|m| m.id == "o3-mini").expect("o3-mini");

        let line = format_model_line(sonar, "sonar");
        assert!(line.starts_with("* sonar"));
        assert!(line.ends_with("[search]"));
        assert!(format_model_line(o3, "sonar").contains("fixed temperature"));
    }

    #[test]
    fn unknown_defaults_are_rejected() {
        let mut config = Config::default();
        assert!(set_default_model(&mut config, "nope").is_err());
        assert!(config.default_model.is_none());
        set_default_model(&mut config, "gpt-4o").expect("known model");
        assert_eq!(config.active_model_id(), "gpt-4o");
    }
}
