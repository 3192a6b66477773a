use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::ErrorReport;
use crate::graph::GraphStatus;
use crate::stages::{StageState, StageType};

/// Graph lifecycle events, emitted by the runner as it drives generations.
#[derive(Clone, Debug, Serialize)]
pub enum GraphEvent {
    GraphStarted {
        graph: String,
        graph_id: String,
        generations: usize,
        timestamp: DateTime<Utc>,
    },
    GenerationStarted {
        index: usize,
        stages: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    StageStarted {
        stage: String,
        stage_type: StageType,
        workers: usize,
        timestamp: DateTime<Utc>,
    },
    StageSkipped {
        stage: String,
        timestamp: DateTime<Utc>,
    },
    StageCompleted {
        stage: String,
        state: StageState,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StageFailed {
        stage: String,
        error: ErrorReport,
        timestamp: DateTime<Utc>,
    },
    GraphFinished {
        graph: String,
        status: GraphStatus,
        timestamp: DateTime<Utc>,
    },
}

pub type EventSender = mpsc::UnboundedSender<GraphEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<GraphEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Optional sender that goes quiet once the receiver is gone.
#[derive(Clone, Default)]
pub struct EventEmitter {
    tx: Option<EventSender>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: EventSender) -> Self {
        Self {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some() && self.active.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: GraphEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitter_delivers_events() {
        let (tx, mut rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);
        emitter.emit(GraphEvent::StageSkipped {
            stage: "setup".into(),
            timestamp: Utc::now(),
        });
        match rx.recv().await {
            Some(GraphEvent::StageSkipped { stage, .. }) => assert_eq!(stage, "setup"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emitter_deactivates_when_receiver_dropped() {
        let (tx, rx) = create_event_channel();
        let emitter = EventEmitter::new(tx);
        drop(rx);
        emitter.emit(GraphEvent::StageSkipped {
            stage: "setup".into(),
            timestamp: Utc::now(),
        });
        assert!(!emitter.is_active());
        assert!(!EventEmitter::disabled().is_active());
    }
}
