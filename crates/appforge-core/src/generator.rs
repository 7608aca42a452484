//! Code generator abstraction.
//!
//! The generator is a black box mapping an application's data model to a set
//! of source [`Module`]s. While it runs it emits log records through a
//! per-build [`GeneratorLogger`]; the records land in whatever [`LogSink`]
//! the caller supplied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::action::LogLevel;
use crate::id::{EntityId, RoleId};
use crate::Result;

/// A versioned entity of the application's data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub display_name: String,
    /// Field definitions, passed through to the generator untouched.
    pub fields: serde_json::Value,
    /// Creation time of the entity; defines generation order.
    pub created_at: DateTime<Utc>,
}

/// Sort entities ascending by creation time, ties broken by id.
///
/// Generation order feeds into generated output, which is diffed against
/// earlier builds, so it must not depend on storage iteration order.
pub fn order_entities(mut entities: Vec<Entity>) -> Vec<Entity> {
    entities.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    entities
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub display_name: String,
}

/// Application metadata handed to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMeta {
    pub name: String,
    pub description: String,
    pub version: String,
    pub url: String,
}

/// One generated source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Path relative to the generated project root.
    pub path: String,
    pub code: String,
}

/// Everything the generator needs for one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInput {
    pub entities: Vec<Entity>,
    pub roles: Vec<Role>,
    pub app: AppMeta,
}

/// Severity reported by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<GeneratorLevel> for LogLevel {
    fn from(level: GeneratorLevel) -> Self {
        match level {
            GeneratorLevel::Debug => LogLevel::Debug,
            GeneratorLevel::Info => LogLevel::Info,
            GeneratorLevel::Warn => LogLevel::Warning,
            GeneratorLevel::Error => LogLevel::Error,
        }
    }
}

/// A log record emitted by the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorLogRecord {
    pub level: GeneratorLevel,
    pub message: String,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Destination for generator log records.
pub trait LogSink: Send + Sync {
    fn record(&self, record: GeneratorLogRecord);
}

/// Logger handed to the generator for the duration of one build.
#[derive(Clone)]
pub struct GeneratorLogger {
    sink: Arc<dyn LogSink>,
}

impl GeneratorLogger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    pub fn log(&self, level: GeneratorLevel, message: impl Into<String>, meta: serde_json::Value) {
        self.sink.record(GeneratorLogRecord {
            level,
            message: message.into(),
            meta,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(GeneratorLevel::Debug, message, serde_json::Value::Null);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(GeneratorLevel::Info, message, serde_json::Value::Null);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(GeneratorLevel::Warn, message, serde_json::Value::Null);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(GeneratorLevel::Error, message, serde_json::Value::Null);
    }
}

impl std::fmt::Debug for GeneratorLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorLogger").finish_non_exhaustive()
    }
}

/// Trait for code generator backends.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Generate the application's modules. Module order must be
    /// deterministic for a given input.
    async fn generate(&self, input: GenerationInput, logger: GeneratorLogger)
    -> Result<Vec<Module>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn entity(name: &str, secs: i64) -> Entity {
        Entity {
            id: EntityId::new(),
            name: name.to_string(),
            display_name: name.to_string(),
            fields: serde_json::json!([]),
            created_at: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_order_entities_by_creation_time() {
        let ordered = order_entities(vec![
            entity("Order", 30),
            entity("Customer", 10),
            entity("Product", 20),
        ]);
        let names: Vec<_> = ordered.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Customer", "Product", "Order"]);
    }

    #[test]
    fn test_order_entities_breaks_ties_by_id() {
        let a = entity("A", 10);
        let b = entity("B", 10);
        let forward = order_entities(vec![a.clone(), b.clone()]);
        let backward = order_entities(vec![b, a]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_generator_levels_map_one_to_one() {
        assert_eq!(LogLevel::from(GeneratorLevel::Debug), LogLevel::Debug);
        assert_eq!(LogLevel::from(GeneratorLevel::Info), LogLevel::Info);
        assert_eq!(LogLevel::from(GeneratorLevel::Warn), LogLevel::Warning);
        assert_eq!(LogLevel::from(GeneratorLevel::Error), LogLevel::Error);
    }

    #[derive(Default)]
    struct VecSink(Mutex<Vec<GeneratorLogRecord>>);

    impl LogSink for VecSink {
        fn record(&self, record: GeneratorLogRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    #[test]
    fn test_logger_forwards_to_sink() {
        let sink = Arc::new(VecSink::default());
        let logger = GeneratorLogger::new(sink.clone());

        logger.info("generating entities");
        logger.warn("missing description");

        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, GeneratorLevel::Info);
        assert_eq!(records[1].message, "missing description");
    }
}
