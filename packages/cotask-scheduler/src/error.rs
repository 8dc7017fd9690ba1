use crate::task::TaskId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task {0:?} is not in the queue")]
    UnknownTask(TaskId),
}
