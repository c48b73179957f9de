//! Scripted artifact producer

use async_trait::async_trait;
use resumable_ingest::{
    ArtifactProducer, Classification, ClassifyError, ErrorCategory, Failure, Produced, WorkItem,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

/// Failure returned by [`ScriptedProducer`]
#[derive(Debug, Clone)]
pub enum ServiceError {
    /// HTTP status
    Status(u16),
    /// Connection dropped
    Reset,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Status(s) => write!(f, "HTTP {s}"),
            ServiceError::Reset => write!(f, "connection reset by peer"),
        }
    }
}

impl ClassifyError for ServiceError {
    fn classify(&self) -> Classification {
        match self {
            ServiceError::Status(s) => Classification::Recognized(Failure::from_status(*s)),
            ServiceError::Reset => {
                Classification::Recognized(Failure::new(ErrorCategory::Connection))
            }
        }
    }
}

/// Answer for one item id
#[derive(Debug, Clone)]
pub enum Answer {
    /// Transcript text
    Text(String),
    /// No content with this status
    Absent(String),
    /// Always fails
    Fail(ServiceError),
}

/// Producer answering from a fixed table, counting calls per item
#[derive(Default)]
pub struct ScriptedProducer {
    answers: HashMap<String, Answer>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, id: &str, answer: Answer) -> Self {
        self.answers.insert(id.to_string(), answer);
        self
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ArtifactProducer for ScriptedProducer {
    type Error = ServiceError;

    async fn produce(&self, _unit: &str, item: &WorkItem) -> Result<Produced, ServiceError> {
        *self.calls.lock().unwrap().entry(item.id.clone()).or_default() += 1;
        match self.answers.get(&item.id) {
            Some(Answer::Text(text)) => Ok(Produced::Content {
                text: text.clone(),
                metadata: Default::default(),
            }),
            Some(Answer::Absent(status)) => Ok(Produced::Absent {
                status: status.clone(),
                reason: format!("{status} for {}", item.id),
            }),
            Some(Answer::Fail(e)) => Err(e.clone()),
            None => Err(ServiceError::Status(404)),
        }
    }
}
