//! One-shot prompt: send, search or stream a single message and print the
//! reply.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::ai_client::{AiClient, HttpAiClient};
use crate::core::config::data::AnimationSettings;
use crate::core::config::io::{ACCESS_TOKEN_ENV, EDGE_BASE_URL_ENV};
use crate::core::config::Config;
use crate::core::container::{keys, ServiceContainer};
use crate::core::events;
use crate::core::orchestrator::{ChatOrchestrator, SendOptions};
use crate::core::persistence::{MessagePersistence, NoopPersistence};
use crate::core::plugin::{PluginError, PluginManager};
use crate::core::services::streaming::StreamOptions;
use crate::core::session::{SessionProvider, StaticSessionProvider};
use crate::plugins::{PlainTextRenderer, TranscriptPlugin};

pub const DEFAULT_ROOM_ID: &str = "cli";

#[derive(Debug, Default)]
pub struct SayOptions {
    pub model: Option<String>,
    pub search: bool,
    pub stream: bool,
    pub transcript: Option<PathBuf>,
    pub room: Option<String>,
}

pub async fn run_say(prompt: Vec<String>, options: SayOptions) -> Result<(), Box<dyn Error>> {
    let text = prompt.join(" ");

    let mut config = Config::load()?;
    config.apply_env_overrides(|key| std::env::var(key).ok());
    // Output is printed once per chunk or reply; no reveal animation.
    config.animation = AnimationSettings::disabled();

    let Some(base_url) = config.edge_base_url.clone() else {
        return Err(format!(
            "No edge base URL configured. Set {EDGE_BASE_URL_ENV} or add edge_base_url to the config file."
        )
        .into());
    };

    let container = build_container(&config, &base_url);
    let room_id = options.room.as_deref().unwrap_or(DEFAULT_ROOM_ID);
    let chat = ChatOrchestrator::from_container(&container, &config, room_id)?;

    let plugins = PluginManager::new(Arc::clone(chat.bus()));
    plugins.register(Arc::new(PlainTextRenderer))?;
    if let Some(path) = options.transcript.clone() {
        plugins.register(Arc::new(TranscriptPlugin::new(Some(path))))?;
    }
    let startup = plugins
        .initialize_all()
        .into_iter()
        .chain(plugins.start_all())
        .collect::<Vec<_>>();
    report_plugin_errors(&startup);

    let result = if options.stream {
        stream_reply(&chat, &text, options.model).await
    } else {
        send_reply(&chat, &plugins, &text, options).await
    };

    let shutdown = plugins
        .stop_all()
        .into_iter()
        .chain(plugins.destroy_all())
        .collect::<Vec<_>>();
    report_plugin_errors(&shutdown);
    chat.close_room();
    result
}

fn build_container(config: &Config, base_url: &str) -> ServiceContainer {
    let container = ServiceContainer::new();
    let ai: Arc<dyn AiClient> = Arc::new(HttpAiClient::new(base_url, config.request_timeout()));
    let persistence: Arc<dyn MessagePersistence> = Arc::new(NoopPersistence);
    let token = std::env::var(ACCESS_TOKEN_ENV)
        .ok()
        .filter(|token| !token.trim().is_empty());
    if token.is_none() {
        debug!("no access token set; sending requests anonymously");
    }
    let session: Arc<dyn SessionProvider> = Arc::new(StaticSessionProvider::new(token));

    container.register_singleton(keys::AI_CLIENT, ai);
    container.register_singleton(keys::PERSISTENCE, persistence);
    container.register_singleton(keys::SESSION_PROVIDER, session);
    container
}

async fn send_reply(
    chat: &ChatOrchestrator,
    plugins: &PluginManager,
    text: &str,
    options: SayOptions,
) -> Result<(), Box<dyn Error>> {
    let outcome = chat
        .send_message(
            text,
            SendOptions {
                use_search: options.search,
                model: options.model,
                temperature: None,
            },
        )
        .await?;

    let rendered = chat
        .state()
        .get(&outcome.assistant_id)
        .and_then(|message| plugins.render(&message))
        .unwrap_or(outcome.content);
    println!("{rendered}");
    Ok(())
}

async fn stream_reply(chat: &ChatOrchestrator, text: &str, model: Option<String>) -> Result<(), Box<dyn Error>> {
    let subscription = chat.bus().subscribe(events::STREAM_CHUNK, |event| {
        if let Some(chunk) = event.data.get("chunk").and_then(|chunk| chunk.as_str()) {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        }
        Ok(())
    });

    let result = chat
        .stream_message(
            text,
            StreamOptions {
                model,
                ..StreamOptions::default()
            },
        )
        .await;
    chat.bus().unsubscribe_by_id(subscription);
    println!();

    let summary = result?;
    debug!(
        chunks = summary.quality.chunk_count,
        chars = summary.quality.total_chars,
        elapsed_ms = summary.elapsed_ms as u64,
        "stream finished"
    );
    Ok(())
}

fn report_plugin_errors(errors: &[PluginError]) {
    for error in errors {
        warn!(error = %error, "plugin lifecycle failure");
        eprintln!("⚠️  {error}");
    }
}
