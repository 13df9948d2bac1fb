use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{EventPublisher, StageEvent};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

/// Builder for pipeline telemetry sinks.
pub struct LearningTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    logger: Option<JsonLogger>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl LearningTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            logger: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Writes JSON log lines to `path`.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Uses an already configured logger (e.g. the stderr sink).
    #[must_use]
    pub fn logger(mut self, logger: JsonLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Minimum level for a logger opened from `log_path`.
    #[must_use]
    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<LearningTelemetry> {
        let logger = match (self.logger, self.log_path) {
            (Some(logger), _) => Some(logger),
            (None, Some(path)) => Some(JsonLogger::new(path)?.with_min_level(self.min_level)),
            (None, None) => None,
        };
        LearningTelemetry::new(self.module, logger, self.event_publisher)
    }
}

/// Telemetry handle shared across pipeline stages. Cloning is cheap.
#[derive(Clone)]
pub struct LearningTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for LearningTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LearningTelemetry")
            .field("module", &self.inner.module)
            .field("logger", &self.inner.logger)
            .field("events", &self.inner.event.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Runtime,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: Runtime::new()?,
            publisher,
        })
    }

    fn publish(&self, event: StageEvent) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(event).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            self.runtime.block_on(self.publisher.publish(event))
        }
    }
}

impl LearningTelemetry {
    fn new(
        module: impl Into<String>,
        logger: Option<JsonLogger>,
        event_publisher: Option<Arc<dyn EventPublisher>>,
    ) -> Result<Self> {
        let event = event_publisher.map(EventHandle::new).transpose()?;
        Ok(Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger,
                event,
            }),
        })
    }

    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LearningTelemetryBuilder {
        LearningTelemetryBuilder::new(module)
    }

    /// Handle with no sinks; every call is a no-op.
    #[must_use]
    pub fn disabled(module: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TelemetryInner {
                module: module.into(),
                logger: None,
                event: None,
            }),
        }
    }

    /// Path of the log file, when logging to one.
    #[must_use]
    pub fn log_path(&self) -> Option<PathBuf> {
        self.inner
            .logger
            .as_ref()
            .and_then(JsonLogger::path)
            .map(std::path::Path::to_path_buf)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        self.publish(StageEvent::new(&self.inner.module, event_type, payload))
    }

    /// Emits an event tagged with an experiment run.
    pub fn run_event(&self, run_id: &str, event_type: &str, payload: Value) -> Result<()> {
        self.publish(StageEvent::new(&self.inner.module, event_type, payload).for_run(run_id))
    }

    fn publish(&self, event: StageEvent) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::MemoryEventBus;
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("logs/pipeline.log.jsonl");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = LearningTelemetry::builder("commitml.pipeline")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "pipeline.start", json!({ "rows": 3 }))
            .unwrap();
        telemetry
            .run_event("run-1", "pipeline.completed", json!({ "accuracy": 1.0 }))
            .unwrap();
        let records = shared_logging::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "pipeline.start");
        let events = bus.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id.as_deref(), Some("run-1"));
        assert_eq!(telemetry.log_path(), Some(path));
    }

    #[test]
    fn min_level_filters_debug_records() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("quiet.log.jsonl");
        let telemetry = LearningTelemetry::builder("commitml.pipeline")
            .log_path(&path)
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry.log(LogLevel::Debug, "noise", json!({})).unwrap();
        telemetry.log(LogLevel::Warn, "signal", json!({})).unwrap();
        let records = shared_logging::read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "signal");
    }

    #[test]
    fn disabled_handle_is_a_no_op() {
        let telemetry = LearningTelemetry::disabled("commitml.pipeline");
        assert!(telemetry.log(LogLevel::Error, "ignored", json!({})).is_ok());
        assert!(telemetry.event("ignored", json!({})).is_ok());
        assert!(telemetry.log_path().is_none());
    }
}
