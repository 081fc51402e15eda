//! Persisted user settings

pub mod schema;
pub mod store;

pub use schema::Settings;
pub use store::{load_settings, save_settings, SettingsError, SettingsPaths};
