//! User preferences (language, theme, notifications, currency).
//!
//! Stored next to the session in the same key-value store. Anything missing
//! or unreadable falls back to defaults.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{KeyValueStore, StorageError, PREFERENCES_KEY};

const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_CURRENCY: &str = "XOF";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationSettings {
    pub order_updates: bool,
    pub promotions: bool,
    pub reservations: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            order_updates: true,
            promotions: true,
            reservations: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub language: String,
    pub theme: Theme,
    pub notifications: NotificationSettings,
    pub currency: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: DEFAULT_LANGUAGE.to_string(),
            theme: Theme::default(),
            notifications: NotificationSettings::default(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

pub struct PreferencesStore {
    store: Arc<dyn KeyValueStore>,
}

impl PreferencesStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn load(&self) -> Preferences {
        match self.store.get(PREFERENCES_KEY) {
            Ok(Some(contents)) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(error = %e, "Stored preferences are malformed, using defaults");
                Preferences::default()
            }),
            Ok(None) => Preferences::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read preferences, using defaults");
                Preferences::default()
            }
        }
    }

    pub fn save(&self, preferences: &Preferences) -> Result<(), StorageError> {
        let contents =
            serde_json::to_string(preferences).map_err(|e| StorageError::Corrupt(e.to_string()))?;
        self.store.set(PREFERENCES_KEY, &contents)
    }

    /// Load, modify and save in one step
    pub fn update<F>(&self, change: F) -> Result<Preferences, StorageError>
    where
        F: FnOnce(&mut Preferences),
    {
        let mut preferences = self.load();
        change(&mut preferences);
        self.save(&preferences)?;
        Ok(preferences)
    }

    /// Forget stored preferences so defaults apply again
    pub fn reset(&self) -> Result<(), StorageError> {
        self.store.delete(PREFERENCES_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> (PreferencesStore, Arc<MemoryStore>) {
        let backing = Arc::new(MemoryStore::new());
        (PreferencesStore::new(backing.clone()), backing)
    }

    #[test]
    fn test_absent_preferences_are_defaults() {
        let (prefs, _) = store();
        let loaded = prefs.load();
        assert_eq!(loaded, Preferences::default());
        assert_eq!(loaded.currency, "XOF");
        assert_eq!(loaded.theme, Theme::System);
        assert!(loaded.notifications.order_updates);
    }

    #[test]
    fn test_malformed_preferences_are_defaults() {
        let (prefs, backing) = store();
        backing.set(PREFERENCES_KEY, "[1, 2").unwrap();
        assert_eq!(prefs.load(), Preferences::default());
    }

    #[test]
    fn test_partial_blob_fills_in_defaults() {
        let (prefs, backing) = store();
        backing
            .set(PREFERENCES_KEY, r#"{"language":"fr","notifications":{"promotions":false}}"#)
            .unwrap();

        let loaded = prefs.load();
        assert_eq!(loaded.language, "fr");
        assert_eq!(loaded.currency, "XOF");
        assert!(!loaded.notifications.promotions);
        assert!(loaded.notifications.reservations);
    }

    #[test]
    fn test_update_and_reset() {
        let (prefs, _) = store();
        let updated = prefs
            .update(|p| {
                p.theme = Theme::Dark;
                p.currency = "GHS".to_string();
            })
            .unwrap();
        assert_eq!(prefs.load(), updated);
        assert_eq!(prefs.load().theme, Theme::Dark);

        prefs.reset().unwrap();
        assert_eq!(prefs.load(), Preferences::default());
    }
}
