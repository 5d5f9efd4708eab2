//! Console variables that feed the status snapshot
//!
//! A small registry of named, typed values. Each variable can carry change
//! handlers that run whenever its value actually changes; the query cache
//! registers one handler per variable that validates the new value and hands
//! it to the matching [`StatusSnapshot`](crate::snapshot::StatusSnapshot)
//! setter. Values can be persisted to and restored from a JSON file.

use crate::cache::SharedState;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const GAME_VERSION_VAR: &str = "qcache_gameversion";
pub const GAME_DESC_VAR: &str = "qcache_gamedesc";
pub const PROTO_VERSION_VAR: &str = "qcache_protoversion";
pub const MAX_CLIENTS_VAR: &str = "qcache_maxclients";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown console variable '{0}'")]
    UnknownVariable(String),
    #[error("console variable '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("invalid value '{value}' for '{name}'")]
    InvalidValue { name: String, value: String },
    #[error("value {value} for '{name}' is outside {min}..={max}")]
    OutOfRange {
        name: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConVarKind {
    Text,
    Integer,
}

#[derive(Debug, Clone)]
pub struct ConVar {
    name: String,
    kind: ConVarKind,
    default: String,
    value: String,
    help: String,
    bounds: Option<(i64, i64)>,
}

impl ConVar {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConVarKind {
        self.kind
    }

    pub fn default_value(&self) -> &str {
        &self.default
    }

    pub fn help(&self) -> &str {
        &self.help
    }

    /// Inclusive range accepted by [`ConVarRegistry::set`], if any
    pub fn bounds(&self) -> Option<(i64, i64)> {
        self.bounds
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The value as an integer; always `Some` for [`ConVarKind::Integer`]
    pub fn as_int(&self) -> Option<i64> {
        self.value.trim().parse().ok()
    }
}

pub type ChangeHandler = Box<dyn Fn(&ConVar) + Send + Sync>;

struct Entry {
    var: ConVar,
    handlers: Vec<ChangeHandler>,
}

#[derive(Default)]
pub struct ConVarRegistry {
    vars: BTreeMap<String, Entry>,
}

impl ConVarRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        kind: ConVarKind,
        default: &str,
        help: &str,
    ) -> Result<(), ConfigError> {
        self.insert(name, kind, default, help, None)
    }

    /// Registers an integer variable that only accepts `min..=max`
    ///
    /// The default is taken as given, even when it lies outside the range.
    pub fn register_bounded(
        &mut self,
        name: &str,
        default: i64,
        help: &str,
        min: i64,
        max: i64,
    ) -> Result<(), ConfigError> {
        self.insert(
            name,
            ConVarKind::Integer,
            &default.to_string(),
            help,
            Some((min, max)),
        )
    }

    fn insert(
        &mut self,
        name: &str,
        kind: ConVarKind,
        default: &str,
        help: &str,
        bounds: Option<(i64, i64)>,
    ) -> Result<(), ConfigError> {
        if self.vars.contains_key(name) {
            return Err(ConfigError::AlreadyRegistered(name.to_string()));
        }
        if kind == ConVarKind::Integer {
            parse_integer(name, default)?;
        }

        let var = ConVar {
            name: name.to_string(),
            kind,
            default: default.to_string(),
            value: default.to_string(),
            help: help.to_string(),
            bounds,
        };
        self.vars.insert(
            name.to_string(),
            Entry {
                var,
                handlers: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn install_change_callback(
        &mut self,
        name: &str,
        handler: ChangeHandler,
    ) -> Result<(), ConfigError> {
        let entry = self
            .vars
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownVariable(name.to_string()))?;
        entry.handlers.push(handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ConVar> {
        self.vars.get(name).map(|entry| &entry.var)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Stores a new value and notifies the handlers
    ///
    /// A value that does not parse or falls outside the variable's bounds is
    /// rejected and nothing is stored. Returns `Ok(false)` when the value is
    /// unchanged; handlers are not called then.
    pub fn set(&mut self, name: &str, value: &str) -> Result<bool, ConfigError> {
        let entry = self
            .vars
            .get_mut(name)
            .ok_or_else(|| ConfigError::UnknownVariable(name.to_string()))?;
        validate(&entry.var, value)?;

        if entry.var.value == value {
            return Ok(false);
        }
        entry.var.value = value.to_string();
        debug!("{} = \"{}\"", name, value);

        for handler in &entry.handlers {
            handler(&entry.var);
        }
        Ok(true)
    }

    /// Writes every non-default value as a JSON object
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let values: BTreeMap<&str, &str> = self
            .vars
            .values()
            .filter(|entry| entry.var.value != entry.var.default)
            .map(|entry| (entry.var.name.as_str(), entry.var.value.as_str()))
            .collect();
        fs::write(path, serde_json::to_string_pretty(&values)?)?;
        Ok(())
    }

    /// Applies values from a JSON object written by [`ConVarRegistry::save`]
    ///
    /// Unknown names and invalid values are skipped with a warning. Returns
    /// how many variables changed.
    pub fn load(&mut self, path: &Path) -> Result<usize, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let values: BTreeMap<String, String> = serde_json::from_str(&contents)?;

        let mut changed = 0;
        for (name, value) in values {
            match self.set(&name, &value) {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(e) => warn!("Skipping {} from {}: {}", name, path.display(), e),
            }
        }
        info!("Loaded {} console variables from {}", changed, path.display());
        Ok(changed)
    }
}

fn validate(var: &ConVar, value: &str) -> Result<(), ConfigError> {
    if var.kind != ConVarKind::Integer {
        return Ok(());
    }

    let n = parse_integer(&var.name, value)?;
    match var.bounds {
        Some((min, max)) if n < min || n > max => Err(ConfigError::OutOfRange {
            name: var.name.clone(),
            value: n,
            min,
            max,
        }),
        _ => Ok(()),
    }
}

fn parse_integer(name: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Registers the four query cache variables and wires them to the snapshot
///
/// Defaults are taken from the snapshot as it stands.
pub fn register_query_cache_vars(
    registry: &mut ConVarRegistry,
    state: &SharedState,
) -> Result<(), ConfigError> {
    let (version, description, protocol, max_clients) = {
        let state = state.lock();
        (
            state.snapshot.game_version().to_string(),
            state.snapshot.game_description().to_string(),
            state.snapshot.protocol_version(),
            state.snapshot.real_max_clients(),
        )
    };

    registry.register(
        GAME_VERSION_VAR,
        ConVarKind::Text,
        &version,
        "Sets the game version reported to clients in A2S_INFO responses.",
    )?;
    let shared = state.clone();
    registry.install_change_callback(
        GAME_VERSION_VAR,
        Box::new(move |var: &ConVar| shared.lock().snapshot.set_version(var.as_str())),
    )?;

    registry.register(
        GAME_DESC_VAR,
        ConVarKind::Text,
        &description,
        "Sets the game description reported to clients in A2S_INFO responses.",
    )?;
    let shared = state.clone();
    registry.install_change_callback(
        GAME_DESC_VAR,
        Box::new(move |var: &ConVar| shared.lock().snapshot.set_description(var.as_str())),
    )?;

    registry.register(
        PROTO_VERSION_VAR,
        ConVarKind::Integer,
        &protocol.to_string(),
        "Sets the protocol version reported to clients in A2S_INFO responses.",
    )?;
    let shared = state.clone();
    registry.install_change_callback(
        PROTO_VERSION_VAR,
        Box::new(move |var: &ConVar| {
            match var.as_int().and_then(|n| i32::try_from(n).ok()) {
                Some(version) => shared.lock().snapshot.set_protocol_version(version),
                None => debug!("Ignoring out of range protocol version {}", var.as_str()),
            }
        }),
    )?;

    registry.register_bounded(
        MAX_CLIENTS_VAR,
        i64::from(max_clients),
        "Sets the max clients value reported to clients in A2S_INFO responses. \
         This value must be less than or equal to the actual max clients value.",
        1,
        i64::from(max_clients),
    )?;
    let shared = state.clone();
    registry.install_change_callback(
        MAX_CLIENTS_VAR,
        Box::new(move |var: &ConVar| {
            match var.as_int().and_then(|n| u32::try_from(n).ok()) {
                Some(n) => {
                    shared.lock().snapshot.set_advertised_max_clients(n);
                }
                None => debug!("Ignoring out of range max clients {}", var.as_str()),
            }
        }),
    )?;

    Ok(())
}

/// Removes the variables added by [`register_query_cache_vars`]
pub fn unregister_query_cache_vars(registry: &mut ConVarRegistry) {
    for name in [GAME_VERSION_VAR, GAME_DESC_VAR, PROTO_VERSION_VAR, MAX_CLIENTS_VAR] {
        registry.unregister(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{shared_state, ReplyCache};
    use crate::host::tests::test_status;
    use crate::host::StaticHost;
    use crate::snapshot::StatusSnapshot;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn setup() -> (ConVarRegistry, SharedState) {
        let host = StaticHost::new(test_status());
        let state = shared_state(
            StatusSnapshot::initialize_static(&host),
            ReplyCache::default(),
        );
        let mut registry = ConVarRegistry::new();
        register_query_cache_vars(&mut registry, &state).unwrap();
        (registry, state)
    }

    #[test]
    fn test_defaults_mirror_snapshot() {
        let (registry, _) = setup();
        assert_eq!(registry.get(GAME_VERSION_VAR).unwrap().as_str(), "1.0.1.59");
        assert_eq!(registry.get(GAME_DESC_VAR).unwrap().as_str(), "Source Test");
        assert_eq!(registry.get(PROTO_VERSION_VAR).unwrap().as_int(), Some(14));
        assert_eq!(registry.get(MAX_CLIENTS_VAR).unwrap().as_int(), Some(32));
        assert_eq!(registry.names().count(), 4);
    }

    #[test]
    fn test_changes_reach_snapshot() {
        let (mut registry, state) = setup();
        assert!(registry.set(GAME_VERSION_VAR, "1.0.2.0").unwrap());
        assert!(registry.set(GAME_DESC_VAR, "My Mod").unwrap());
        assert!(registry.set(PROTO_VERSION_VAR, "15").unwrap());

        let state = state.lock();
        assert_eq!(state.snapshot.game_version(), "1.0.2.0");
        assert_eq!(state.snapshot.game_description(), "My Mod");
        assert_eq!(state.snapshot.protocol_version(), 15);
    }

    #[test]
    fn test_max_clients_bounded_by_real_capacity() {
        let (mut registry, state) = setup();
        assert_eq!(registry.get(MAX_CLIENTS_VAR).unwrap().bounds(), Some((1, 32)));

        registry.set(MAX_CLIENTS_VAR, "16").unwrap();
        assert_eq!(state.lock().snapshot.advertised_max_clients(), 16);

        for rejected in ["40", "0", "-3"] {
            let err = registry.set(MAX_CLIENTS_VAR, rejected).unwrap_err();
            assert!(matches!(err, ConfigError::OutOfRange { min: 1, max: 32, .. }));
            assert_eq!(registry.get(MAX_CLIENTS_VAR).unwrap().as_str(), "16");
            assert_eq!(state.lock().snapshot.advertised_max_clients(), 16);
        }

        registry.set(MAX_CLIENTS_VAR, "1").unwrap();
        registry.set(MAX_CLIENTS_VAR, "32").unwrap();
        assert_eq!(state.lock().snapshot.advertised_max_clients(), 32);
    }

    #[test]
    fn test_rejected_max_clients_never_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qcache.json");

        let (mut registry, _) = setup();
        registry.set(MAX_CLIENTS_VAR, "16").unwrap();
        assert!(registry.set(MAX_CLIENTS_VAR, "40").is_err());
        registry.save(&path).unwrap();

        let (mut fresh, state) = setup();
        fresh.load(&path).unwrap();
        assert_eq!(fresh.get(MAX_CLIENTS_VAR).unwrap().as_str(), "16");
        assert_eq!(state.lock().snapshot.advertised_max_clients(), 16);
    }

    #[test]
    fn test_out_of_range_entry_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qcache.json");
        std::fs::write(&path, r#"{"qcache_maxclients": "40"}"#).unwrap();

        let (mut registry, state) = setup();
        assert_eq!(registry.load(&path).unwrap(), 0);
        assert_eq!(registry.get(MAX_CLIENTS_VAR).unwrap().as_str(), "32");
        assert_eq!(state.lock().snapshot.advertised_max_clients(), 32);
    }

    #[test]
    fn test_bounded_default_outside_range_is_kept() {
        let mut registry = ConVarRegistry::new();
        registry
            .register_bounded("test_slots", 0, "test", 1, 0)
            .unwrap();
        assert_eq!(registry.get("test_slots").unwrap().as_int(), Some(0));
        assert!(registry.set("test_slots", "1").is_err());
    }

    #[test]
    fn test_invalid_integer_rejected() {
        let (mut registry, state) = setup();
        let err = registry.set(PROTO_VERSION_VAR, "fourteen").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(registry.get(PROTO_VERSION_VAR).unwrap().as_str(), "14");
        assert_eq!(state.lock().snapshot.protocol_version(), 14);
    }

    #[test]
    fn test_unchanged_value_does_not_notify() {
        let mut registry = ConVarRegistry::new();
        registry
            .register("test_var", ConVarKind::Text, "a", "test")
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry
            .install_change_callback(
                "test_var",
                Box::new(move |_: &ConVar| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(!registry.set("test_var", "a").unwrap());
        assert!(registry.set("test_var", "b").unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_and_duplicate_variables() {
        let (mut registry, _) = setup();
        assert!(matches!(
            registry.set("sv_cheats", "1"),
            Err(ConfigError::UnknownVariable(_))
        ));
        assert!(matches!(
            registry.register(GAME_DESC_VAR, ConVarKind::Text, "", ""),
            Err(ConfigError::AlreadyRegistered(_))
        ));

        unregister_query_cache_vars(&mut registry);
        assert_eq!(registry.names().count(), 0);
    }

    #[test]
    fn test_save_and_load_applies_through_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qcache.json");

        let (mut registry, _) = setup();
        registry.set(GAME_DESC_VAR, "Persisted").unwrap();
        registry.set(MAX_CLIENTS_VAR, "20").unwrap();
        registry.save(&path).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("Persisted"));
        assert!(!saved.contains(GAME_VERSION_VAR));

        let (mut fresh, state) = setup();
        assert_eq!(fresh.load(&path).unwrap(), 2);
        let state = state.lock();
        assert_eq!(state.snapshot.game_description(), "Persisted");
        assert_eq!(state.snapshot.advertised_max_clients(), 20);
    }

    #[test]
    fn test_load_skips_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qcache.json");
        std::fs::write(
            &path,
            r#"{"qcache_protoversion": "abc", "unknown_var": "1", "qcache_gameversion": "3.0"}"#,
        )
        .unwrap();

        let (mut registry, state) = setup();
        assert_eq!(registry.load(&path).unwrap(), 1);
        assert_eq!(state.lock().snapshot.game_version(), "3.0");
        assert_eq!(state.lock().snapshot.protocol_version(), 14);
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qcache.json");
        std::fs::write(&path, "not json").unwrap();

        let (mut registry, _) = setup();
        assert!(matches!(registry.load(&path), Err(ConfigError::Json(_))));
    }
}
