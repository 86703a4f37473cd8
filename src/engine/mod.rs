pub(crate) mod template;

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::error::CoreError;
use crate::executor::{CapabilityExecutor, ExecutorRegistry};
use crate::types::{ExecutionMode, Task, TaskStatus, Workflow, WorkflowResult};

pub type ProgressFn = dyn Fn(&str, TaskStatus, Option<&Value>) + Send + Sync;

/// DAG-aware scheduler: bounded concurrency, per-task retry with backoff
/// and timeout, skip-on-upstream-failure propagation.
pub struct Engine {
    registry: ExecutorRegistry,
    config: Config,
}

impl Engine {
    pub fn new(registry: ExecutorRegistry, config: Config) -> Self {
        Self { registry, config }
    }

    #[tracing::instrument(skip(self, workflow, on_progress))]
    pub async fn execute(
        &self,
        workflow: Workflow,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> Result<WorkflowResult, CoreError> {
        workflow.validate()?;
        let result = match workflow.mode {
            ExecutionMode::Sequential => self.execute_sequential(workflow, on_progress).await,
            ExecutionMode::Parallel => self.execute_parallel(workflow, on_progress).await,
            ExecutionMode::Dag => self.execute_dag(workflow, on_progress).await,
        };
        Ok(result)
    }

    async fn execute_sequential(
        &self,
        workflow: Workflow,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> WorkflowResult {
        let start = Instant::now();
        let ids: Vec<String> = workflow.tasks.keys().cloned().collect();
        let task_count = ids.len();
        let mut pending: HashMap<String, Task> = workflow.tasks.into_iter().collect();
        let mut finished: HashMap<String, Task> = HashMap::new();
        let mut stopped = false;

        for id in &ids {
            let task = pending.remove(id).expect("task present");
            if stopped {
                if self.config.sequential_marks_remaining_skipped {
                    let mut t = task;
                    t.mark_skipped("sequential execution stopped after an earlier failure");
                    notify(&on_progress, &t.id, TaskStatus::Skipped, None);
                    finished.insert(id.clone(), t);
                }
                continue;
            }

            let (template_vars, context) = self.collect_dep_context(&task.dependencies, &finished);
            let executor = self.registry.get(&task.executor_name);
            let config = self.config.clone();
            let cb = on_progress.clone();
            let done = run_task(task, executor, template_vars, context, config, cb).await;
            if done.status == TaskStatus::Failed {
                stopped = true;
            }
            finished.insert(id.clone(), done);
        }

        build_result(finished, task_count, start.elapsed())
    }

    async fn execute_parallel(
        &self,
        workflow: Workflow,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> WorkflowResult {
        let start = Instant::now();
        let task_count = workflow.tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks.max(1)));
        let mut join_set: JoinSet<Task> = JoinSet::new();

        for (_, task) in workflow.tasks {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore is never closed");
            let executor = self.registry.get(&task.executor_name);
            let config = self.config.clone();
            let cb = on_progress.clone();
            join_set.spawn(async move {
                let _permit = permit;
                run_task(task, executor, HashMap::new(), HashMap::new(), config, cb).await
            });
        }

        let mut finished = HashMap::new();
        while let Some(res) = join_set.join_next().await {
            let task = res.expect("spawned task panicked");
            finished.insert(task.id.clone(), task);
        }

        build_result(finished, task_count, start.elapsed())
    }

    async fn execute_dag(
        &self,
        workflow: Workflow,
        on_progress: Option<Arc<ProgressFn>>,
    ) -> WorkflowResult {
        let start = Instant::now();
        let task_count = workflow.tasks.len();

        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (id, task) in &workflow.tasks {
            in_degree.insert(id.clone(), task.dependencies.len());
            for dep in &task.dependencies {
                dependents.entry(dep.clone()).or_default().push(id.clone());
            }
        }

        let mut ready: VecDeque<String> = workflow
            .tasks
            .iter()
            .filter(|(id, _)| in_degree[*id] == 0)
            .map(|(id, _)| id.clone())
            .collect();

        let mut pending: HashMap<String, Task> = workflow.tasks.into_iter().collect();
        let mut finished: HashMap<String, Task> = HashMap::new();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_tasks.max(1)));
        let mut join_set: JoinSet<Task> = JoinSet::new();

        loop {
            loop {
                let Some(id) = ready.front().cloned() else {
                    break;
                };
                let task = pending.get(&id).expect("ready task still pending");
                let dep_failed = task.dependencies.iter().any(|d| {
                    matches!(
                        finished.get(d).map(|t| t.status),
                        Some(TaskStatus::Failed) | Some(TaskStatus::Skipped)
                    )
                });

                if dep_failed {
                    ready.pop_front();
                    let mut t = pending.remove(&id).expect("task present");
                    t.mark_skipped("upstream dependency failed or was skipped");
                    notify(&on_progress, &t.id, TaskStatus::Skipped, None);
                    self.unblock_dependents(&id, &dependents, &mut in_degree, &mut ready);
                    finished.insert(id, t);
                    continue;
                }

                match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => {
                        ready.pop_front();
                        let task = pending.remove(&id).expect("task present");
                        let (template_vars, context) =
                            self.collect_dep_context(&task.dependencies, &finished);
                        let executor = self.registry.get(&task.executor_name);
                        let config = self.config.clone();
                        let cb = on_progress.clone();
                        join_set.spawn(async move {
                            let _permit = permit;
                            run_task(task, executor, template_vars, context, config, cb).await
                        });
                    }
                    Err(_) => break,
                }
            }

            if ready.is_empty() && join_set.is_empty() {
                break;
            }

            if let Some(res) = join_set.join_next().await {
                let task = res.expect("spawned task panicked");
                let id = task.id.clone();
                self.unblock_dependents(&id, &dependents, &mut in_degree, &mut ready);
                finished.insert(id, task);
            }
        }

        build_result(finished, task_count, start.elapsed())
    }

    fn unblock_dependents(
        &self,
        finished_id: &str,
        dependents: &HashMap<String, Vec<String>>,
        in_degree: &mut HashMap<String, usize>,
        ready: &mut VecDeque<String>,
    ) {
        if let Some(children) = dependents.get(finished_id) {
            for child in children {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        ready.push_back(child.clone());
                    }
                }
            }
        }
    }

    /// Builds both the `{{outputVariable}}` template substitution map and
    /// the `"{dep_id}_result"` context injection map from completed deps.
    fn collect_dep_context(
        &self,
        dependencies: &std::collections::BTreeSet<String>,
        finished: &HashMap<String, Task>,
    ) -> (HashMap<String, Value>, HashMap<String, Value>) {
        let mut template_vars = HashMap::new();
        let mut context = HashMap::new();
        for dep in dependencies {
            if let Some(dep_task) = finished.get(dep) {
                if dep_task.status == TaskStatus::Completed {
                    if let Some(result) = &dep_task.result {
                        template_vars.insert(dep_task.output_variable.clone(), result.clone());
                        context.insert(format!("{dep}_result"), result.clone());
                    }
                }
            }
        }
        (template_vars, context)
    }
}

async fn run_task(
    mut task: Task,
    executor: Option<Arc<dyn CapabilityExecutor>>,
    template_vars: HashMap<String, Value>,
    context: HashMap<String, Value>,
    config: Config,
    on_progress: Option<Arc<ProgressFn>>,
) -> Task {
    task.mark_running();
    notify(&on_progress, &task.id, TaskStatus::Running, None);

    let rendered_query = template::substitute(&task.query, &template_vars);
    let max_attempts = task.retry_count + 1;
    let mut last_error: Option<String> = None;

    for attempt in 0..max_attempts {
        task.attempts += 1;

        let outcome: Result<Value, String> = match &executor {
            Some(exec) => match tokio::time::timeout(task.timeout, exec.execute(&rendered_query, &context)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(source)) => Err(
                    CoreError::ExecutorError {
                        task: task.id.clone(),
                        source,
                    }
                    .to_string(),
                ),
                Err(_) => Err(CoreError::ExecutorTimeout(task.id.clone()).to_string()),
            },
            None => Err(format!(
                "no executor registered for '{}'",
                task.executor_name
            )),
        };

        match outcome {
            Ok(value) => {
                task.mark_completed(value.clone());
                notify(&on_progress, &task.id, TaskStatus::Completed, Some(&value));
                return task;
            }
            Err(msg) => {
                tracing::debug!(task = %task.id, attempt, error = %msg, "task attempt failed");
                last_error = Some(msg);
                if attempt + 1 < max_attempts {
                    let delay = config.retry_base_delay * 2u32.pow(attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    task.mark_failed(last_error.unwrap_or_else(|| "unknown executor error".to_string()));
    notify(&on_progress, &task.id, TaskStatus::Failed, None);
    task
}

fn notify(callback: &Option<Arc<ProgressFn>>, task_id: &str, status: TaskStatus, payload: Option<&Value>) {
    let Some(cb) = callback else { return };
    let cb = cb.clone();
    let task_id = task_id.to_string();
    let payload = payload.cloned();
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
        cb(&task_id, status, payload.as_ref());
    }));
    if outcome.is_err() {
        tracing::warn!(task_id = %task_id, "progress callback panicked, ignoring");
    }
}

fn build_result(finished: HashMap<String, Task>, task_count: usize, elapsed: Duration) -> WorkflowResult {
    let mut results = HashMap::new();
    let mut errors = HashMap::new();
    let mut completed_count = 0;
    let mut failed_count = 0;

    for (id, task) in finished {
        match task.status {
            TaskStatus::Completed => {
                completed_count += 1;
                results.insert(id, task.result.unwrap_or(Value::Null));
            }
            TaskStatus::Failed => {
                failed_count += 1;
                errors.insert(id, task.last_error.unwrap_or_default());
            }
            TaskStatus::Skipped => {
                errors.insert(id, task.last_error.unwrap_or_default());
            }
            TaskStatus::Pending | TaskStatus::Running => {}
        }
    }

    WorkflowResult {
        success: failed_count == 0,
        results,
        errors,
        execution_time: elapsed,
        task_count,
        completed_count,
        failed_count,
    }
}
