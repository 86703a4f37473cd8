use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }

    /// Enforces the monotone Pending -> Running -> terminal state machine.
    /// Only ever fires in debug builds; an illegal transition is a bug in
    /// the engine, not a recoverable runtime condition.
    fn assert_legal(from: TaskStatus, to: TaskStatus) {
        let legal = matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Skipped)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        );
        debug_assert!(legal, "illegal task status transition {from:?} -> {to:?}");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
    Dag,
}

/// A runtime unit of work: declarative fields set at construction, runtime
/// fields mutated only by the engine that owns this task for the duration
/// of its execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub executor_name: String,
    pub query: String,
    pub dependencies: BTreeSet<String>,
    pub output_variable: String,
    pub retry_count: u32,
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    pub status: TaskStatus,
    pub result: Option<Value>,
    pub last_error: Option<String>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

mod duration_millis {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u128(d.as_millis())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        executor_name: impl Into<String>,
        query: impl Into<String>,
        dependencies: BTreeSet<String>,
        output_variable: impl Into<String>,
        retry_count: u32,
        timeout: Duration,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            executor_name: executor_name.into(),
            query: query.into(),
            dependencies,
            output_variable: output_variable.into(),
            retry_count,
            timeout,
            status: TaskStatus::Pending,
            result: None,
            last_error: None,
            attempts: 0,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        TaskStatus::assert_legal(self.status, TaskStatus::Running);
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: Value) {
        TaskStatus::assert_legal(self.status, TaskStatus::Completed);
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        TaskStatus::assert_legal(self.status, TaskStatus::Failed);
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        TaskStatus::assert_legal(self.status, TaskStatus::Skipped);
        self.status = TaskStatus::Skipped;
        self.last_error = Some(reason.into());
        self.ended_at = Some(Utc::now());
    }
}

/// The runtime materialization of a `TaskPlan`: an ordered map so Sequential
/// mode's start order matches declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub tasks: IndexMap<String, Task>,
    pub mode: ExecutionMode,
}

impl Workflow {
    pub fn new(tasks: IndexMap<String, Task>, mode: ExecutionMode) -> Self {
        Self { tasks, mode }
    }

    /// Static validation callable before `Engine::execute`: dependency
    /// existence always, acyclicity only in DAG mode.
    pub fn validate(&self) -> Result<(), CoreError> {
        for task in self.tasks.values() {
            for dep in &task.dependencies {
                if !self.tasks.contains_key(dep) {
                    return Err(CoreError::PlanValidationError(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        task.id
                    )));
                }
            }
        }

        if self.mode == ExecutionMode::Dag {
            self.check_acyclic()?;
        }
        Ok(())
    }

    fn check_acyclic(&self) -> Result<(), CoreError> {
        use std::collections::HashMap;
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks: HashMap<&str, Mark> =
            self.tasks.keys().map(|k| (k.as_str(), Mark::Unvisited)).collect();

        fn visit<'a>(
            id: &'a str,
            tasks: &'a IndexMap<String, Task>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), CoreError> {
            match marks.get(id).copied().unwrap_or(Mark::Done) {
                Mark::Done => return Ok(()),
                Mark::InProgress => return Err(CoreError::CycleDetected(id.to_string())),
                Mark::Unvisited => {}
            }
            marks.insert(id, Mark::InProgress);
            if let Some(task) = tasks.get(id) {
                for dep in &task.dependencies {
                    visit(dep.as_str(), tasks, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for id in self.tasks.keys() {
            visit(id.as_str(), &self.tasks, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task::new(
            id,
            "chat",
            "q",
            deps.iter().map(|s| s.to_string()).collect(),
            format!("{id}_out"),
            0,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn validate_rejects_dangling_dependency() {
        let mut tasks = IndexMap::new();
        tasks.insert("a".into(), task("a", &["ghost"]));
        let wf = Workflow::new(tasks, ExecutionMode::Dag);
        assert!(wf.validate().is_err());
    }

    #[test]
    fn validate_detects_cycle_in_dag_mode() {
        let mut tasks = IndexMap::new();
        tasks.insert("a".into(), task("a", &["b"]));
        tasks.insert("b".into(), task("b", &["a"]));
        let wf = Workflow::new(tasks, ExecutionMode::Dag);
        assert!(matches!(
            wf.validate().unwrap_err(),
            CoreError::CycleDetected(_)
        ));
    }

    #[test]
    fn status_transitions_to_terminal() {
        let mut t = task("a", &[]);
        t.mark_running();
        assert_eq!(t.status, TaskStatus::Running);
        t.mark_completed(Value::Null);
        assert!(t.status.is_terminal());
    }
}
