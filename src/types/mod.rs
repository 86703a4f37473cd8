pub mod aggregate;
pub mod plan;
pub mod routing;
pub mod task;
pub mod task_type;
pub mod workflow_result;

pub use aggregate::{AggregatedResult, AggregationStrategy, SourceRecord};
pub use plan::{Complexity, SubTask, TaskPlan};
pub use routing::{RoutingDecision, ToolRequirement};
pub use task::{ExecutionMode, Task, TaskStatus, Workflow};
pub use task_type::TaskType;
pub use workflow_result::WorkflowResult;
