//! Event sink trait and implementations.

use super::GenerationEvent;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives lifecycle events from the orchestrator.
///
/// Sinks are injected at construction; emission must never fail or block
/// for long.
pub trait EventSink: Send + Sync {
    /// Emits an event.
    fn emit(&self, event: &GenerationEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &GenerationEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &GenerationEvent) {
        let stage = event.stage.map(|s| s.as_str()).unwrap_or("-");
        if self.level == Level::DEBUG {
            debug!(
                event_type = %event.kind,
                project_id = %event.project_id,
                run_id = %event.run_id,
                stage,
                event_data = %event.data,
                "Event: {}", event.kind
            );
        } else {
            info!(
                event_type = %event.kind,
                project_id = %event.project_id,
                run_id = %event.run_id,
                stage,
                event_data = %event.data,
                "Event: {}", event.kind
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<GenerationEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<GenerationEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event type names, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|e| e.kind.to_string()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &GenerationEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::GenerationStage;
    use crate::events::EventKind;

    fn event(kind: EventKind) -> GenerationEvent {
        GenerationEvent::new(kind, "p1", uuid::Uuid::nil(), 0)
    }

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit(&event(EventKind::Started));
        LoggingEventSink::default().emit(&event(EventKind::Completed));
        LoggingEventSink::debug()
            .emit(&event(EventKind::StageStarted).with_stage(GenerationStage::Grid));
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&event(EventKind::Started));
        sink.emit(&event(EventKind::StageCompleted).with_stage(GenerationStage::Grid));

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.event_types(),
            vec!["generation.started", "generation.stage_completed"]
        );
        assert_eq!(sink.events()[1].stage, Some(GenerationStage::Grid));

        sink.clear();
        assert!(sink.is_empty());
    }
}
