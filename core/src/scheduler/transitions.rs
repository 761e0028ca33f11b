//! 任务状态转换规则和验证

use super::types::TaskStatus;
use thiserror::Error;

/// 状态转换错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
    #[error("Cannot transition from terminal state {state}")]
    FromTerminalState { state: TaskStatus },
}

/// 状态转换
pub struct StateTransition;

impl StateTransition {
    /// 验证状态转换是否合法
    pub fn validate(from: TaskStatus, to: TaskStatus) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            // 准入
            (TaskStatus::Pending, TaskStatus::Running) => true,

            // 准入前被取消，或依赖失败后级联失败
            (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::Pending, TaskStatus::Failed) => true,

            // 执行结束
            (TaskStatus::Running, TaskStatus::Completed)
            | (TaskStatus::Running, TaskStatus::Cancelled)
            | (TaskStatus::Running, TaskStatus::Retrying)
            | (TaskStatus::Running, TaskStatus::Failed) => true,

            // 重试回到队列；退避期间可被取消
            (TaskStatus::Retrying, TaskStatus::Pending) => true,
            (TaskStatus::Retrying, TaskStatus::Cancelled) => true,

            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    /// 判断是否为终态
    pub fn is_terminal(status: TaskStatus) -> bool {
        matches!(
            status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}
