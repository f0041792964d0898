//! msgbus-metadata: Configuration types for the message bus output
//!
//! Parses the externally supplied configuration document and the plugin-local
//! settings, and translates them into a validated `PluginConfig`.

pub mod document;
pub mod error;
pub mod plugin;
pub mod settings;
pub mod store;

pub use document::{AppConfig, ConfigDocument, Interfaces, PublisherDocument};
pub use error::ConfigError;
pub use plugin::{
    translate, BusParams, PluginConfig, TopicMode, TransportDescriptor, TransportType,
    WILDCARD_TOPIC,
};
pub use settings::OutputSettings;
pub use store::{ConfigStore, FileConfigStore, StaticConfigStore};
