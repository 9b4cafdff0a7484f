//! Plugin contract and lifecycle host.
//!
//! A plugin moves through `uninitialized -> initialized -> running ->
//! stopped -> destroyed`. Capabilities are optional facets exposed through
//! [`Plugin::as_event_handler`], [`Plugin::as_renderer`] and
//! [`Plugin::as_configurable`].

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::event_bus::{BusEvent, EventBus, EventHandler, HandlerError};
use crate::core::events;
use crate::core::message::ConcurrentMessage;
use crate::utils::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
    Destroyed,
}

impl PluginState {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginState::Uninitialized => "uninitialized",
            PluginState::Initialized => "initialized",
            PluginState::Running => "running",
            PluginState::Stopped => "stopped",
            PluginState::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PluginError {
    #[error("cannot {action} plugin {plugin} while it is {state}{hint}")]
    InvalidLifecycle {
        plugin: String,
        action: &'static str,
        state: PluginState,
        hint: &'static str,
    },

    #[error("plugin {plugin} failed during {phase}: {message}")]
    Hook {
        plugin: String,
        phase: &'static str,
        message: String,
    },

    #[error("plugin {plugin} rejected configuration: {reason}")]
    InvalidConfiguration { plugin: String, reason: String },

    #[error("plugin {0} does not accept configuration")]
    NotConfigurable(String),

    #[error("plugin {0} is already registered")]
    Duplicate(String),

    #[error("plugin {0} is not registered")]
    NotFound(String),

    #[error("plugin {plugin} failed to handle {event}: {message}")]
    Handler {
        plugin: String,
        event: String,
        message: String,
    },

    #[error("plugin {plugin} failed to render: {message}")]
    Render { plugin: String, message: String },
}

impl PluginError {
    pub fn hook(plugin: &str, phase: &'static str, message: impl Into<String>) -> Self {
        Self::Hook {
            plugin: plugin.to_string(),
            phase,
            message: message.into(),
        }
    }

    pub fn invalid_configuration(plugin: &str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            plugin: plugin.to_string(),
            reason: reason.into(),
        }
    }
}

pub trait Plugin: Send + Sync {
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Event topics subscribed on initialize. Only used when the plugin
    /// exposes an [`EventHandling`] facet.
    fn supported_event_types(&self) -> Vec<String> {
        Vec::new()
    }

    fn on_initialize(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_start(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_stop(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn on_destroy(&self) -> Result<(), PluginError> {
        Ok(())
    }

    fn as_event_handler(&self) -> Option<&dyn EventHandling> {
        None
    }

    fn as_renderer(&self) -> Option<&dyn MessageRendering> {
        None
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }
}

pub trait EventHandling: Send + Sync {
    fn can_handle_event(&self, event_type: &str) -> bool;

    /// Higher runs first.
    fn event_priority(&self) -> i32 {
        0
    }

    fn handle_event(&self, event: &BusEvent) -> Result<(), PluginError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RenderCapabilities {
    /// Output formats, e.g. `"text/plain"`.
    pub formats: Vec<String>,
    pub supports_partial: bool,
}

pub trait MessageRendering: Send + Sync {
    fn can_render(&self, message: &ConcurrentMessage) -> bool;

    fn render_capabilities(&self) -> RenderCapabilities;

    fn render_priority(&self) -> i32 {
        0
    }

    fn render(&self, message: &ConcurrentMessage) -> Result<String, PluginError>;
}

pub trait Configurable: Send + Sync {
    fn configuration(&self) -> Map<String, Value>;

    /// Validate and apply `settings`. Rejected settings leave the current
    /// configuration untouched.
    fn configure(&self, settings: Map<String, Value>) -> Result<(), PluginError>;
}

struct HostInner {
    state: PluginState,
    subscriptions: Vec<(String, EventHandler)>,
}

/// Drives one plugin through its lifecycle and owns its bus subscriptions.
///
/// Lifecycle hooks run while the host is locked; a hook must not call back
/// into its own host.
pub struct PluginHost {
    plugin: Arc<dyn Plugin>,
    bus: Arc<EventBus>,
    running: Arc<AtomicBool>,
    inner: Mutex<HostInner>,
}

impl PluginHost {
    pub fn new(plugin: Arc<dyn Plugin>, bus: Arc<EventBus>) -> Self {
        Self {
            plugin,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(HostInner {
                state: PluginState::Uninitialized,
                subscriptions: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        self.plugin.id()
    }

    pub fn version(&self) -> &str {
        self.plugin.version()
    }

    pub fn plugin(&self) -> &Arc<dyn Plugin> {
        &self.plugin
    }

    pub fn state(&self) -> PluginState {
        lock(&self.inner).state
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner).subscriptions.len()
    }

    pub fn initialize(&self) -> Result<(), PluginError> {
        let previous = {
            let mut inner = lock(&self.inner);
            match inner.state {
                PluginState::Uninitialized => {}
                PluginState::Destroyed => return Err(self.invalid("initialize", inner.state, "")),
                _ => return Ok(()),
            }
            self.plugin.on_initialize()?;
            inner.subscriptions = self.subscribe_events();
            std::mem::replace(&mut inner.state, PluginState::Initialized)
        };
        self.announce(previous, PluginState::Initialized);
        Ok(())
    }

    pub fn start(&self) -> Result<(), PluginError> {
        let previous = {
            let mut inner = lock(&self.inner);
            match inner.state {
                PluginState::Initialized | PluginState::Stopped => {}
                PluginState::Running => return Ok(()),
                PluginState::Uninitialized => {
                    return Err(self.invalid("start", inner.state, "; call initialize first"))
                }
                PluginState::Destroyed => return Err(self.invalid("start", inner.state, "")),
            }
            self.plugin.on_start()?;
            self.running.store(true, Ordering::SeqCst);
            std::mem::replace(&mut inner.state, PluginState::Running)
        };
        self.announce(previous, PluginState::Running);
        Ok(())
    }

    pub fn stop(&self) -> Result<(), PluginError> {
        let previous = {
            let mut inner = lock(&self.inner);
            match inner.state {
                PluginState::Running => {}
                PluginState::Stopped => return Ok(()),
                PluginState::Uninitialized | PluginState::Initialized => {
                    return Err(self.invalid("stop", inner.state, "; call start first"))
                }
                PluginState::Destroyed => return Err(self.invalid("stop", inner.state, "")),
            }
            self.plugin.on_stop()?;
            self.running.store(false, Ordering::SeqCst);
            std::mem::replace(&mut inner.state, PluginState::Stopped)
        };
        self.announce(previous, PluginState::Stopped);
        Ok(())
    }

    /// Stop if running, run the destroy hook and drop every subscription.
    /// Subscriptions are removed even when a hook fails.
    pub fn destroy(&self) -> Result<(), PluginError> {
        let (previous, hook_result) = {
            let mut inner = lock(&self.inner);
            if inner.state == PluginState::Destroyed {
                return Ok(());
            }
            let mut result = Ok(());
            if inner.state == PluginState::Running {
                result = self.plugin.on_stop();
                self.running.store(false, Ordering::SeqCst);
            }
            let destroyed = self.plugin.on_destroy();
            if result.is_ok() {
                result = destroyed;
            }
            for (event_type, handler) in inner.subscriptions.drain(..) {
                self.bus.unsubscribe(&event_type, &handler);
            }
            (std::mem::replace(&mut inner.state, PluginState::Destroyed), result)
        };
        self.announce(previous, PluginState::Destroyed);
        hook_result
    }

    pub fn configure(&self, settings: Map<String, Value>) -> Result<(), PluginError> {
        let configurable = self
            .plugin
            .as_configurable()
            .ok_or_else(|| PluginError::NotConfigurable(self.id().to_string()))?;
        configurable.configure(settings)
    }

    pub fn configuration(&self) -> Option<Map<String, Value>> {
        self.plugin
            .as_configurable()
            .map(|configurable| configurable.configuration())
    }

    fn subscribe_events(&self) -> Vec<(String, EventHandler)> {
        let Some(facet) = self.plugin.as_event_handler() else {
            return Vec::new();
        };
        let priority = facet.event_priority();
        self.plugin
            .supported_event_types()
            .into_iter()
            .map(|event_type| {
                let handler = plugin_handler(
                    Arc::clone(&self.plugin),
                    Arc::clone(&self.running),
                    Arc::downgrade(&self.bus),
                );
                self.bus
                    .subscribe_handler(&event_type, Arc::clone(&handler), priority);
                (event_type, handler)
            })
            .collect()
    }

    fn invalid(&self, action: &'static str, state: PluginState, hint: &'static str) -> PluginError {
        PluginError::InvalidLifecycle {
            plugin: self.id().to_string(),
            action,
            state,
            hint,
        }
    }

    fn announce(&self, from: PluginState, to: PluginState) {
        debug!(plugin = self.id(), %from, %to, "plugin state changed");
        self.bus.publish_from(
            events::PLUGIN_STATE_CHANGED,
            json!({ "plugin": self.id(), "from": from, "to": to }),
            Some(self.id()),
        );
    }
}

/// Bus handler for one plugin. Events reach the plugin only while it is
/// running; failures and panics are reported as `plugin:error`.
fn plugin_handler(
    plugin: Arc<dyn Plugin>,
    running: Arc<AtomicBool>,
    bus: Weak<EventBus>,
) -> EventHandler {
    Arc::new(move |event: &BusEvent| {
        if !running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(facet) = plugin.as_event_handler() else {
            return Ok(());
        };
        if !facet.can_handle_event(&event.event_type) {
            return Ok(());
        }
        let outcome = match catch_unwind(AssertUnwindSafe(|| facet.handle_event(event))) {
            Ok(result) => result,
            Err(_) => Err(PluginError::Handler {
                plugin: plugin.id().to_string(),
                event: event.event_type.clone(),
                message: "handler panicked".to_string(),
            }),
        };
        let Err(error) = outcome else {
            return Ok(());
        };
        if event.event_type != events::PLUGIN_ERROR {
            if let Some(bus) = bus.upgrade() {
                report_error(&bus, plugin.id(), &error);
            }
        }
        Err(HandlerError::from(error))
    })
}

fn report_error(bus: &EventBus, plugin: &str, error: &PluginError) {
    warn!(plugin, error = %error, "plugin error");
    bus.publish_from(
        events::PLUGIN_ERROR,
        json!({ "plugin": plugin, "error": error.to_string() }),
        Some(plugin),
    );
}

/// Registered plugins of one chat session, in registration order.
pub struct PluginManager {
    bus: Arc<EventBus>,
    hosts: Mutex<Vec<Arc<PluginHost>>>,
}

impl PluginManager {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<Arc<PluginHost>, PluginError> {
        let mut hosts = lock(&self.hosts);
        if hosts
            .iter()
            .any(|host| host.id().eq_ignore_ascii_case(plugin.id()))
        {
            return Err(PluginError::Duplicate(plugin.id().to_string()));
        }
        debug!(plugin = plugin.id(), version = plugin.version(), "plugin registered");
        let host = Arc::new(PluginHost::new(plugin, Arc::clone(&self.bus)));
        hosts.push(Arc::clone(&host));
        Ok(host)
    }

    /// Destroy and remove the plugin `id`.
    pub fn unregister(&self, id: &str) -> Result<(), PluginError> {
        let host = {
            let mut hosts = lock(&self.hosts);
            let position = hosts
                .iter()
                .position(|host| host.id().eq_ignore_ascii_case(id))
                .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
            hosts.remove(position)
        };
        host.destroy()
    }

    pub fn get(&self, id: &str) -> Option<Arc<PluginHost>> {
        lock(&self.hosts)
            .iter()
            .find(|host| host.id().eq_ignore_ascii_case(id))
            .cloned()
    }

    pub fn plugin_ids(&self) -> Vec<String> {
        lock(&self.hosts)
            .iter()
            .map(|host| host.id().to_string())
            .collect()
    }

    pub fn initialize_all(&self) -> Vec<PluginError> {
        self.for_each(false, PluginHost::initialize)
    }

    pub fn start_all(&self) -> Vec<PluginError> {
        self.for_each(false, PluginHost::start)
    }

    /// Stops in reverse registration order.
    pub fn stop_all(&self) -> Vec<PluginError> {
        self.for_each(true, |host| match host.state() {
            PluginState::Running => host.stop(),
            _ => Ok(()),
        })
    }

    pub fn destroy_all(&self) -> Vec<PluginError> {
        self.for_each(true, PluginHost::destroy)
    }

    pub fn configure(&self, id: &str, settings: Map<String, Value>) -> Result<(), PluginError> {
        let host = self
            .get(id)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        host.configure(settings)
    }

    /// Highest-priority running renderer that accepts `message`; earlier
    /// registrations win ties.
    pub fn select_renderer(&self, message: &ConcurrentMessage) -> Option<Arc<PluginHost>> {
        self.renderers_for(message).into_iter().next()
    }

    /// Render with the best renderer, falling back to the next candidate
    /// when one fails or panics.
    pub fn render(&self, message: &ConcurrentMessage) -> Option<String> {
        for host in self.renderers_for(message) {
            let Some(renderer) = host.plugin().as_renderer() else {
                continue;
            };
            let outcome = catch_unwind(AssertUnwindSafe(|| renderer.render(message)))
                .unwrap_or_else(|_| {
                    Err(PluginError::Render {
                        plugin: host.id().to_string(),
                        message: "renderer panicked".to_string(),
                    })
                });
            match outcome {
                Ok(rendered) => return Some(rendered),
                Err(error) => report_error(&self.bus, host.id(), &error),
            }
        }
        None
    }

    fn renderers_for(&self, message: &ConcurrentMessage) -> Vec<Arc<PluginHost>> {
        let mut candidates: Vec<(i32, Arc<PluginHost>)> = lock(&self.hosts)
            .iter()
            .filter(|host| host.state() == PluginState::Running)
            .filter_map(|host| {
                let renderer = host.plugin().as_renderer()?;
                renderer
                    .can_render(message)
                    .then(|| (renderer.render_priority(), Arc::clone(host)))
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().map(|(_, host)| host).collect()
    }

    fn for_each<F>(&self, reverse: bool, phase: F) -> Vec<PluginError>
    where
        F: Fn(&PluginHost) -> Result<(), PluginError>,
    {
        let mut hosts: Vec<Arc<PluginHost>> = lock(&self.hosts).clone();
        if reverse {
            hosts.reverse();
        }
        let mut failures = Vec::new();
        for host in hosts {
            if let Err(error) = phase(&*host) {
                report_error(&self.bus, host.id(), &error);
                failures.push(error);
            }
        }
        failures
    }
}
