use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    GroupStarted,
    GroupFinished,
    GroupSkipped,
    TargetStarted,
    TargetSucceeded,
    TargetFailed,
    TargetSkipped,
    FileChanged,
    FileError,
    BranchRecovered,
    PrCreated,
    PrUpdated,
    SyncRunStarted,
    SyncRunFinished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub group_id: Option<String>,
    pub target_repo: Option<String>,
    pub at: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(kind: EventKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group_id: None,
            target_repo: None,
            at: Utc::now(),
            kind,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn with_target(mut self, repo: impl Into<String>) -> Self {
        self.target_repo = Some(repo.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new(EventKind::TargetSucceeded, "evt-1")
            .with_group("g1")
            .with_target("org/repo")
            .with_payload(serde_json::json!({"changed_files": 3}));
        let text = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded.kind, EventKind::TargetSucceeded);
        assert_eq!(decoded.group_id.as_deref(), Some("g1"));
        assert_eq!(decoded.target_repo.as_deref(), Some("org/repo"));
    }

    #[test]
    fn event_kind_serializes_snake_case() {
        let text = serde_json::to_string(&EventKind::PrCreated).unwrap();
        assert_eq!(text, "\"pr_created\"");
    }
}
