//! Fault injection for processors under test.
//!
//! A processor takes an `Arc<dyn FaultInjector>` at construction and calls
//! [`FaultInjector::check`] once per item. Sharing one injector between several
//! processors gives a single counter across every step that uses them.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub trait FaultInjector: Send + Sync {
    /// Called once per processed item; an error fails that item.
    fn check(&self) -> Result<()>;
}

/// Never fails
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn check(&self) -> Result<()> {
        Ok(())
    }
}

/// Fails exactly on the `n`th call (1-based) and succeeds on every other call.
#[derive(Debug)]
pub struct FailOnNthCall {
    n: usize,
    calls: AtomicUsize,
}

impl FailOnNthCall {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaultInjector for FailOnNthCall {
    fn check(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.n {
            bail!("injected failure on item {call}");
        }
        Ok(())
    }
}

/// Injector for `--fail-on`-style options: `None` disables faults.
pub fn fail_on(n: Option<usize>) -> Arc<dyn FaultInjector> {
    match n {
        Some(n) if n > 0 => Arc::new(FailOnNthCall::new(n)),
        _ => Arc::new(NoFaults),
    }
}
