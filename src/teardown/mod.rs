//! Reverse-order teardown of acquired host resources.
//!
//! The build pipeline mutates global kernel state (loop devices,
//! device-mapper nodes, the mount table) through external commands. Every
//! successful acquisition registers a compensating action here, and the
//! stack is unwound in last-acquired-first order on every exit path.
//!
//! Actions are pushed only after the resource they release actually exists;
//! a failed acquisition never leaves a release for itself behind.

use anyhow::Result;

use crate::process::ExecutionLog;

type Action = Box<dyn FnOnce(&mut ExecutionLog) -> Result<()>>;

struct Teardown {
    label: String,
    action: Action,
}

/// LIFO stack of teardown actions, one per acquired resource.
#[derive(Default)]
pub struct ResourceStack {
    actions: Vec<Teardown>,
}

impl ResourceStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Register a teardown action. `label` is printed when it runs.
    pub fn push<F>(&mut self, label: &str, action: F)
    where
        F: FnOnce(&mut ExecutionLog) -> Result<()> + 'static,
    {
        self.actions.push(Teardown {
            label: label.to_string(),
            action: Box::new(action),
        });
    }

    /// Run every registered action exactly once, last-registered first.
    ///
    /// An action's failure is reported as a warning and never stops the
    /// remaining actions. Safe to call on an empty stack.
    pub fn unwind_all(&mut self, log: &mut ExecutionLog) {
        while let Some(teardown) = self.actions.pop() {
            println!("{}", teardown.label);
            if let Err(err) = (teardown.action)(log) {
                eprintln!("warning: {}: {:#}", teardown.label, err);
            }
        }
    }
}
