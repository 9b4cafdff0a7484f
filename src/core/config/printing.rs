use crate::core::config::data::Config;

impl Config {
    pub fn print_all(&self) {
        println!("Current configuration:");
        match &self.edge_base_url {
            Some(url) => println!("  edge-base-url: {url}"),
            None => println!("  edge-base-url: (unset)"),
        }
        match &self.default_model {
            Some(model) => println!("  default-model: {model}"),
            None => println!("  default-model: (unset, using {})", self.active_model_id()),
        }
        println!("  request-timeout: {}s", self.request_timeout_secs);
        println!("  max-edit-length: {}", self.max_edit_length);
        match self.auto_save_interval_ms {
            Some(ms) if ms > 0 => println!("  auto-save: every {ms}ms"),
            _ => println!("  auto-save: off"),
        }
        println!(
            "  history limits: regeneration {}, commands {}, events {}",
            self.regeneration_history_limit, self.command_history_limit, self.event_history_limit
        );
        if self.animation.enabled {
            println!(
                "  animation: on ({} chars every {}ms)",
                self.animation.chars_per_tick, self.animation.tick_interval_ms
            );
        } else {
            println!("  animation: off");
        }
        if !self.models.is_empty() {
            println!("  custom models:");
            for model in &self.models {
                println!("    {} ({})", model.id, model.display_name);
            }
        }
    }
}
