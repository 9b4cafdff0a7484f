pub mod activity;
pub mod ai_client;
pub mod animation;
pub mod chat_stream;
pub mod config;
pub mod container;
pub mod event_bus;
pub mod events;
pub mod message;
pub mod orchestrator;
pub mod persistence;
pub mod plugin;
pub mod room;
pub mod services;
pub mod session;
pub mod state;
