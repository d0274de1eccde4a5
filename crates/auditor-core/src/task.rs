//! Analysis task port and registry
//!
//! Tasks are strategies chosen when the registry is built; the orchestrator
//! only ever sees `Arc<dyn AnalysisTask>`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Output of one successful analysis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    /// Optional score
    pub score: Option<f64>,
    /// Task-specific payload
    pub data: serde_json::Value,
    /// Reported issues
    pub issues: Vec<serde_json::Value>,
}

impl AnalysisOutput {
    /// Create output with a payload
    #[inline]
    #[must_use]
    pub fn new(data: serde_json::Value) -> Self {
        Self {
            score: None,
            data,
            issues: Vec::new(),
        }
    }

    /// With score
    #[inline]
    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// With issues
    #[inline]
    #[must_use]
    pub fn with_issues(mut self, issues: Vec<serde_json::Value>) -> Self {
        self.issues = issues;
        self
    }

    /// Lift an untyped task payload, picking up `score` and `issues` when present
    #[must_use]
    pub fn from_value(data: serde_json::Value) -> Self {
        let score = data.get("score").and_then(serde_json::Value::as_f64);
        let issues = data
            .get("issues")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        Self {
            score,
            data,
            issues,
        }
    }
}

/// One independent analysis run against a target
#[async_trait::async_trait]
pub trait AnalysisTask: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Analyze `target`
    async fn analyze(&self, target: &str) -> anyhow::Result<AnalysisOutput>;
}

/// Name → task lookup, in registration order
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: IndexMap<String, Arc<dyn AnalysisTask>>,
}

impl TaskRegistry {
    /// Create new empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task under its own name, replacing any previous entry
    pub fn register(&mut self, task: Arc<dyn AnalysisTask>) {
        self.tasks.insert(task.name().to_string(), task);
    }

    /// Builder form of [`TaskRegistry::register`]
    #[inline]
    #[must_use]
    pub fn with(mut self, task: Arc<dyn AnalysisTask>) -> Self {
        self.register(task);
        self
    }

    /// Look up a task
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AnalysisTask>> {
        self.tasks.get(name).cloned()
    }

    /// Check if a task is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Number of registered tasks
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if registry is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait::async_trait]
    impl AnalysisTask for Echo {
        fn name(&self) -> &str {
            self.0
        }

        async fn analyze(&self, target: &str) -> anyhow::Result<AnalysisOutput> {
            Ok(AnalysisOutput::new(json!({ "target": target })))
        }
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = TaskRegistry::new()
            .with(Arc::new(Echo("serp")))
            .with(Arc::new(Echo("a11y")))
            .with(Arc::new(Echo("schema")));

        assert_eq!(registry.names(), vec!["serp", "a11y", "schema"]);
        assert!(registry.contains("a11y"));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = TaskRegistry::new();
        registry.register(Arc::new(Echo("serp")));
        registry.register(Arc::new(Echo("serp")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registered_task_analyzes_target() {
        let registry = TaskRegistry::new().with(Arc::new(Echo("serp")));
        let task = registry.get("serp").unwrap();
        let output = tokio_test::block_on(task.analyze("https://example.com")).unwrap();
        assert_eq!(output.data, json!({ "target": "https://example.com" }));
    }

    #[test]
    fn from_value_extracts_score_and_issues() {
        let output = AnalysisOutput::from_value(json!({
            "score": 87.5,
            "issues": [{ "code": "missing-alt" }],
        }));
        assert_eq!(output.score, Some(87.5));
        assert_eq!(output.issues.len(), 1);

        let bare = AnalysisOutput::from_value(json!("ok"));
        assert!(bare.score.is_none());
        assert!(bare.issues.is_empty());
    }

    #[tokio::test]
    async fn task_analyzes_target() {
        let task = Echo("serp");
        let output = task.analyze("https://example.com").await.unwrap();
        assert_eq!(output.data["target"], "https://example.com");
    }
}
