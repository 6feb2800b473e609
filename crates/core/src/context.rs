use tokio_util::sync::CancellationToken;

/// 显式传递的执行上下文：操作人与取消信号
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub operator: String,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(operator: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            operator: operator.into(),
            cancel,
        }
    }

    /// 派生子上下文；取消父上下文会级联取消子上下文
    pub fn child(&self) -> Self {
        Self {
            operator: self.operator.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_cancellation_does_not_reach_parent() {
        let root = ExecutionContext::new("system", CancellationToken::new());
        let child = root.child();
        child.cancel.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());

        let other = root.child();
        root.cancel.cancel();
        assert!(other.is_cancelled());
    }
}
