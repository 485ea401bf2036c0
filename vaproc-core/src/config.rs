//! # Filter Settings & Variable Store
//!
//! User-facing filter settings and the thread-safe variable store the
//! filters read at open time and subscribe to for live updates.
//!
//! ## Flow
//! ```text
//! settings.json ─► FilterSettings ─► VarStore ─► filter open (read once)
//!                                       │
//!          set_float(name) ──┴──► listeners: check all, then update all
//! ```

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::filter::FilterError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

// ============================================================================
// Settings
// ============================================================================

/// Initial filter strengths and modes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FilterSettings {
    /// Contrast (0.0 to 2.0, 1.0 = no change)
    pub contrast: f32,
    /// Brightness (0.0 to 2.0, 1.0 = no change)
    pub brightness: f32,
    /// Hue rotation in degrees (-180 to 180)
    pub hue: f32,
    /// Saturation (0.0 to 3.0, 1.0 = no change)
    pub saturation: f32,
    /// Denoise strength (0.0 to 2.0)
    pub denoise_sigma: f32,
    /// Sharpen strength (0.0 to 2.0)
    pub sharpen_sigma: f32,
    /// "auto" or an algorithm name ("x", "bob", "mean")
    pub deinterlace_mode: String,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            brightness: 1.0,
            hue: 0.0,
            saturation: 1.0,
            denoise_sigma: 1.0,
            sharpen_sigma: 0.05,
            deinterlace_mode: "auto".to_string(),
        }
    }
}

impl FilterSettings {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ============================================================================
// Variable Store
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Float(f32),
    String(String),
}

/// Receiver of live float updates.
///
/// An update is offered to every listener of the name through `check`
/// first. Only when all of them accept it is the value stored and handed
/// to each listener's `update`.
pub trait VarListener: Send + Sync {
    fn check(&self, _name: &str, _value: f32) -> Result<(), FilterError> {
        Ok(())
    }

    fn update(&self, name: &str, value: f32);
}

impl<F> VarListener for F
where
    F: Fn(&str, f32) + Send + Sync,
{
    fn update(&self, name: &str, value: f32) {
        self(name, value)
    }
}

type Listener = Arc<dyn VarListener>;

pub struct VarStore {
    values: RwLock<HashMap<String, VarValue>>,
    listeners: RwLock<HashMap<String, Vec<(u64, Listener)>>>,
    // Serializes set_float so check and update see the same listener set.
    write_lock: Mutex<()>,
    next_id: AtomicU64,
}

impl VarStore {
    /// Store seeded with the default settings.
    pub fn new() -> Arc<Self> {
        Self::from_settings(&FilterSettings::default())
    }

    /// Store holding exactly the variables of `settings`. No other names
    /// can be set later.
    pub fn from_settings(settings: &FilterSettings) -> Arc<Self> {
        let mut values = HashMap::new();
        for (name, value) in [
            ("contrast", settings.contrast),
            ("brightness", settings.brightness),
            ("hue", settings.hue),
            ("saturation", settings.saturation),
            ("denoise-sigma", settings.denoise_sigma),
            ("sharpen-sigma", settings.sharpen_sigma),
        ] {
            values.insert(name.to_string(), VarValue::Float(value));
        }
        values.insert(
            "deinterlace-mode".to_string(),
            VarValue::String(settings.deinterlace_mode.clone()),
        );

        Arc::new(Self {
            values: RwLock::new(values),
            listeners: RwLock::new(HashMap::new()),
            write_lock: Mutex::new(()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        match self.values.read().get(name) {
            Some(VarValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string(&self, name: &str) -> Option<String> {
        match self.values.read().get(name) {
            Some(VarValue::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn is_string(&self, name: &str) -> bool {
        matches!(self.values.read().get(name), Some(VarValue::String(_)))
    }

    /// Replace a string variable. Unknown names and float variables are
    /// rejected.
    pub fn set_string(&self, name: &str, value: &str) -> Result<(), FilterError> {
        let mut values = self.values.write();
        match values.get_mut(name) {
            Some(VarValue::String(current)) => {
                *current = value.to_string();
                Ok(())
            }
            _ => Err(FilterError::UnknownParameter(name.to_string())),
        }
    }

    /// Offer `value` for `name` to every listener, then store it and notify
    /// them. If the name is unknown, the value is not finite or any listener
    /// rejects it, nothing changes and the error is returned.
    pub fn set_float(&self, name: &str, value: f32) -> Result<(), FilterError> {
        let _guard = self.write_lock.lock();

        if !matches!(self.values.read().get(name), Some(VarValue::Float(_))) {
            return Err(FilterError::UnknownParameter(name.to_string()));
        }
        if !value.is_finite() {
            return Err(FilterError::InvalidValue {
                name: name.to_string(),
                value,
            });
        }

        // Clone the list so listeners run without holding the lock.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .get(name)
            .map(|list| list.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in &listeners {
            listener.check(name, value)?;
        }

        self.values
            .write()
            .insert(name.to_string(), VarValue::Float(value));
        for listener in &listeners {
            listener.update(name, value);
        }
        Ok(())
    }

    /// Register `listener` for changes of `name`. The returned handle
    /// unregisters it when dropped.
    pub fn subscribe(self: &Arc<Self>, name: &str, listener: Arc<dyn VarListener>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(name.to_string())
            .or_default()
            .push((id, listener));
        Subscription {
            store: Arc::downgrade(self),
            name: name.to_string(),
            id,
        }
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, |list| list.len())
    }
}

/// Live registration of a change listener.
pub struct Subscription {
    store: Weak<VarStore>,
    name: String,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut listeners = store.listeners.write();
        if let Some(list) = listeners.get_mut(&self.name) {
            list.retain(|(id, _)| *id != self.id);
            if list.is_empty() {
                listeners.remove(&self.name);
            }
        }
    }
}
