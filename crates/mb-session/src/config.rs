//! # Session Configuration
//!
//! A JSON key/value tree consumed at `open`. Keys are addressed with dotted
//! paths (`connect.endpoints`), which walk nested objects.
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `mode` | `"peer"` \| `"client"` | `peer` |
//! | `id` | UUID string | random |
//! | `connect.endpoints` | list of strings | `[]` |
//! | `listen.endpoints` | list of strings | `[]` |
//! | `scouting.multicast.enabled` | bool | `false` |
//! | `queries.default_timeout_ms` | u64 | `10000` |
//! | `queries.cancel_policy` | `"discard"` \| `"deliver"` | `discard` |
//! | `subscribers.channel_capacity` | usize > 0 | `1000` |
//!
//! Unknown keys are ignored.

use crate::errors::ConfigError;
use mb_query::CancelPolicy;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use shared_bus::DEFAULT_CHANNEL_CAPACITY;
use shared_types::{PeerId, WhatAmI};
use std::time::Duration;

/// Default query timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 10_000;

/// Raw configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    tree: Value,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tree: Value::Object(Map::new()),
        }
    }
}

impl Config {
    /// Empty configuration; every key takes its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, [`ConfigError::NotAnObject`]
    /// if the root is not an object.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let tree: Value = serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_value(tree)
    }

    /// Wrap an existing JSON value.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NotAnObject`] if `tree` is not an object.
    pub fn from_value(tree: Value) -> Result<Self, ConfigError> {
        if tree.is_object() {
            Ok(Self { tree })
        } else {
            Err(ConfigError::NotAnObject)
        }
    }

    /// Set `path` to `value`, creating intermediate objects.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPath`] if the path is malformed or an
    /// intermediate component holds a non-object value.
    pub fn insert(&mut self, path: &str, value: impl Into<Value>) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidPath(path.to_string());
        let components: Vec<&str> = path.split('.').collect();
        if components.iter().any(|c| c.is_empty()) {
            return Err(invalid());
        }
        let (last, parents) = components.split_last().ok_or_else(invalid)?;

        let mut node = &mut self.tree;
        for component in parents {
            let object = node.as_object_mut().ok_or_else(invalid)?;
            node = object
                .entry((*component).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        node.as_object_mut()
            .ok_or_else(invalid)?
            .insert((*last).to_string(), value.into());
        Ok(())
    }

    /// Value at `path`, if present.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.tree, |node, component| node.as_object()?.get(component))
    }

    /// The whole tree.
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.tree
    }

    fn typed<T: DeserializeOwned>(&self, key: &'static str) -> Result<Option<T>, ConfigError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| ConfigError::InvalidValue {
                    key,
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Resolve the recognized keys into a [`SessionConfig`].
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] for a recognized key holding a value of
    /// the wrong type or range.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        let defaults = SessionConfig::default();

        let id = self
            .typed::<String>("id")?
            .map(|text| {
                text.parse::<PeerId>().map_err(|e| ConfigError::InvalidValue {
                    key: "id",
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let channel_capacity = self
            .typed::<usize>("subscribers.channel_capacity")?
            .unwrap_or(defaults.channel_capacity);
        if channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "subscribers.channel_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(SessionConfig {
            mode: self.typed("mode")?.unwrap_or(defaults.mode),
            id,
            connect_endpoints: self
                .typed("connect.endpoints")?
                .unwrap_or(defaults.connect_endpoints),
            listen_endpoints: self
                .typed("listen.endpoints")?
                .unwrap_or(defaults.listen_endpoints),
            scouting_multicast: self
                .typed("scouting.multicast.enabled")?
                .unwrap_or(defaults.scouting_multicast),
            query_timeout: self
                .typed::<u64>("queries.default_timeout_ms")?
                .map_or(defaults.query_timeout, Duration::from_millis),
            cancel_policy: self
                .typed("queries.cancel_policy")?
                .unwrap_or(defaults.cancel_policy),
            channel_capacity,
        })
    }
}

/// Resolved session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Role in the network
    pub mode: WhatAmI,
    /// Fixed peer id; random when `None`
    pub id: Option<PeerId>,
    /// Endpoints to connect to at open
    pub connect_endpoints: Vec<String>,
    /// Endpoints to accept links on
    pub listen_endpoints: Vec<String>,
    /// Whether fallback discovery is enabled
    pub scouting_multicast: bool,
    /// Timeout for `get` when the caller gives none
    pub query_timeout: Duration,
    /// What a cancelled query reports
    pub cancel_policy: CancelPolicy,
    /// Per-handler delivery queue capacity
    pub channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: WhatAmI::Peer,
            id: None,
            connect_endpoints: Vec::new(),
            listen_endpoints: Vec::new(),
            scouting_multicast: false,
            query_timeout: Duration::from_millis(DEFAULT_QUERY_TIMEOUT_MS),
            cancel_policy: CancelPolicy::Discard,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
