use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// One node in a task plan's DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub tool: String,
    #[serde(alias = "query")]
    pub query_template: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub output_variable: String,
}

impl SubTask {
    /// `output_variable` defaults to the subtask's own id when the decomposer
    /// omitted it, matching the original's lenient plan parser.
    pub fn output_variable_or_id(&self) -> &str {
        if self.output_variable.is_empty() {
            &self.id
        } else {
            &self.output_variable
        }
    }
}

/// A validated, dependency-annotated execution plan produced by the decomposer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    pub original_query: String,
    pub goal: String,
    pub subtasks: Vec<SubTask>,
    pub estimated_steps: usize,
    pub complexity: Complexity,
}

impl TaskPlan {
    pub fn new(
        original_query: impl Into<String>,
        goal: impl Into<String>,
        subtasks: Vec<SubTask>,
        complexity: Complexity,
        max_subtasks: usize,
    ) -> Result<Self, CoreError> {
        let plan = Self {
            original_query: original_query.into(),
            goal: goal.into(),
            estimated_steps: subtasks.len(),
            subtasks,
            complexity,
        };
        plan.validate(max_subtasks)?;
        Ok(plan)
    }

    /// Checks uniqueness of ids/output variables, dependency existence, no
    /// self-dependency, acyclicity, and the subtask count bound.
    pub fn validate(&self, max_subtasks: usize) -> Result<(), CoreError> {
        if self.subtasks.len() > max_subtasks {
            return Err(CoreError::PlanValidationError(format!(
                "plan has {} subtasks, exceeding the limit of {max_subtasks}",
                self.subtasks.len()
            )));
        }

        let mut ids = HashSet::new();
        let mut output_vars = HashSet::new();
        for st in &self.subtasks {
            if !ids.insert(st.id.clone()) {
                return Err(CoreError::PlanValidationError(format!(
                    "duplicate subtask id '{}'",
                    st.id
                )));
            }
            if !output_vars.insert(st.output_variable_or_id().to_string()) {
                return Err(CoreError::PlanValidationError(format!(
                    "duplicate output_variable for subtask '{}'",
                    st.id
                )));
            }
        }

        for st in &self.subtasks {
            if st.dependencies.contains(&st.id) {
                return Err(CoreError::PlanValidationError(format!(
                    "subtask '{}' depends on itself",
                    st.id
                )));
            }
            for dep in &st.dependencies {
                if !ids.contains(dep) {
                    return Err(CoreError::PlanValidationError(format!(
                        "subtask '{}' depends on unknown id '{dep}'",
                        st.id
                    )));
                }
            }
        }

        self.check_acyclic()
    }

    fn check_acyclic(&self) -> Result<(), CoreError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        use std::collections::HashMap;

        let by_id: HashMap<&str, &SubTask> =
            self.subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut marks: HashMap<&str, Mark> =
            self.subtasks.iter().map(|s| (s.id.as_str(), Mark::Unvisited)).collect();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a SubTask>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<(), CoreError> {
            match marks.get(id).copied().unwrap_or(Mark::Done) {
                Mark::Done => return Ok(()),
                Mark::InProgress => return Err(CoreError::CycleDetected(id.to_string())),
                Mark::Unvisited => {}
            }
            marks.insert(id, Mark::InProgress);
            if let Some(st) = by_id.get(id) {
                for dep in &st.dependencies {
                    visit(dep.as_str(), by_id, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for st in &self.subtasks {
            visit(st.id.as_str(), &by_id, &mut marks)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(id: &str, deps: &[&str]) -> SubTask {
        SubTask {
            id: id.into(),
            description: String::new(),
            tool: "chat".into(),
            query_template: String::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            output_variable: format!("{id}_out"),
        }
    }

    #[test]
    fn detects_cycle() {
        let subtasks = vec![st("a", &["c"]), st("b", &["a"]), st("c", &["b"])];
        let err = TaskPlan::new("q", "g", subtasks, Complexity::Low, 10).unwrap_err();
        assert!(matches!(err, CoreError::CycleDetected(_)));
    }

    #[test]
    fn detects_dangling_dependency() {
        let subtasks = vec![st("a", &["ghost"])];
        let err = TaskPlan::new("q", "g", subtasks, Complexity::Low, 10).unwrap_err();
        assert!(matches!(err, CoreError::PlanValidationError(_)));
    }

    #[test]
    fn accepts_linear_chain() {
        let subtasks = vec![st("a", &[]), st("b", &["a"]), st("c", &["b"])];
        assert!(TaskPlan::new("q", "g", subtasks, Complexity::Low, 10).is_ok());
    }

    #[test]
    fn rejects_too_many_subtasks() {
        let subtasks = vec![st("a", &[]), st("b", &[]), st("c", &[])];
        let err = TaskPlan::new("q", "g", subtasks, Complexity::Low, 2).unwrap_err();
        assert!(matches!(err, CoreError::PlanValidationError(_)));
    }
}
