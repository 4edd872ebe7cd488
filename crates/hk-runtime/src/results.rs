use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use hk_core::{ConsoleLevel, HostCallError, TestResult};
use serde_json::Value;

pub const INCOMPLETE_TEST_MESSAGE: &str = "test did not complete";

/// Receives console output of a script after sanitisation.
pub trait ConsoleSink {
    fn emit(&self, level: ConsoleLevel, args: &[Value]);
}

#[derive(Debug, Clone)]
enum TestSlot {
    Pending(String),
    Settled(TestResult),
}

pub struct ResultCollector {
    prior: Vec<TestResult>,
    slots: RefCell<Vec<TestSlot>>,
    console: Option<Rc<dyn ConsoleSink>>,
}

impl ResultCollector {
    pub fn new(prior: Vec<TestResult>, console: Option<Rc<dyn ConsoleSink>>) -> Self {
        Self {
            prior,
            slots: RefCell::new(Vec::new()),
            console,
        }
    }

    /// Reserves the next slot in declaration order.
    pub fn begin(&self, description: impl Into<String>) -> usize {
        let mut slots = self.slots.borrow_mut();
        slots.push(TestSlot::Pending(description.into()));
        slots.len() - 1
    }

    pub fn settle(&self, slot: usize, error: Option<String>) -> Result<(), HostCallError> {
        let mut slots = self.slots.borrow_mut();
        let entry = slots
            .get_mut(slot)
            .ok_or_else(|| HostCallError::failed(format!("unknown test slot {}", slot)))?;
        let description = match entry {
            TestSlot::Pending(description) => mem::take(description),
            TestSlot::Settled(result) => {
                return Err(HostCallError::failed(format!(
                    "test \"{}\" already settled",
                    result.description
                )))
            }
        };
        *entry = TestSlot::Settled(match error {
            None => TestResult::pass(description),
            Some(message) => TestResult::fail(description, message),
        });
        Ok(())
    }

    pub fn console(&self, level: ConsoleLevel, args: &[Value]) {
        let line = Value::Array(args.to_vec());
        tracing::debug!(target: "hk_runtime::console", level = ?level, args = %line);
        if let Some(sink) = &self.console {
            sink.emit(level, args);
        }
    }

    /// Prior results followed by this run's results. Slots still pending fail.
    pub fn take_results(&self) -> Vec<TestResult> {
        let slots = mem::take(&mut *self.slots.borrow_mut());
        let mut results = self.prior.clone();
        results.extend(slots.into_iter().map(|slot| match slot {
            TestSlot::Settled(result) => result,
            TestSlot::Pending(description) => TestResult::fail(description, INCOMPLETE_TEST_MESSAGE),
        }));
        results
    }
}
