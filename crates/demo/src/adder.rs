use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use fn_queuer::{operation, Operation};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum AdderError {
    #[error("call {0} was configured to fail")]
    Configured(usize),
}

/// Arguments for one `add` call: the call's number in reservation order plus the operands.
pub type AddArgs = (usize, i64, i64);

/// Scope shared by every `add` call. Records the order calls actually started in.
pub struct Adder {
    delay: Duration,
    fail_at: Option<usize>,
    started: Mutex<Vec<usize>>,
}

impl Adder {
    pub fn new(delay: Duration, fail_at: Option<usize>) -> Self {
        Self {
            delay,
            fail_at,
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn started(&self) -> Vec<usize> {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn record_start(&self, call: usize) {
        self.started.lock().unwrap_or_else(PoisonError::into_inner).push(call);
    }
}

/// Slow addition that fails for the configured call number.
pub fn add_operation() -> Operation<Adder, AddArgs, i64, AdderError> {
    operation(|adder: Arc<Adder>, (call, a, b): AddArgs| async move {
        adder.record_start(call);
        info!("add #{} started: {} + {}", call, a, b);
        tokio::time::sleep(adder.delay).await;

        if adder.fail_at == Some(call) {
            return Err(AdderError::Configured(call));
        }
        Ok(a + b)
    })
}

// Unit tests for the demo operation
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_and_records_start_order() {
        let adder = Arc::new(Adder::new(Duration::from_millis(1), None));
        let add = add_operation();

        assert_eq!(add(Arc::clone(&adder), (1, 2, 3)).await.unwrap(), 5);
        assert_eq!(add(Arc::clone(&adder), (0, 1, 1)).await.unwrap(), 2);
        assert_eq!(adder.started(), vec![1, 0]);
    }

    #[tokio::test]
    async fn configured_call_fails() {
        let adder = Arc::new(Adder::new(Duration::from_millis(1), Some(2)));
        let add = add_operation();

        let err = add(Arc::clone(&adder), (2, 1, 1)).await.unwrap_err();
        assert!(matches!(err, AdderError::Configured(2)));
        assert_eq!(err.to_string(), "call 2 was configured to fail");
    }
}
