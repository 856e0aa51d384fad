//! Fail-fast supervision of the gateway's long-running loops.
//!
//! Every loop is a task in one [`JoinSet`].  The first task to finish, for
//! whatever reason, ends the whole process: [`Orchestrator::run`] aborts the
//! rest and reports which loop stopped and why.  There is no partial restart.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use basestation_middleware::LoopFailure;
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tracing::{error, info};

type LoopOutcome = (&'static str, Result<Result<(), LoopFailure>, Box<dyn Any + Send>>);

/// Why an orchestrated loop stopped.
#[derive(Debug)]
pub enum ExitReason {
    /// The loop returned `Ok(())`.
    Returned,
    /// The loop returned an error.
    Failed(LoopFailure),
    /// The loop panicked.
    Panicked(String),
    /// The loop was cancelled from outside the orchestrator.
    Aborted,
    /// Nothing was spawned.
    Empty,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Returned => f.write_str("returned"),
            ExitReason::Failed(e) => write!(f, "failed: {e}"),
            ExitReason::Panicked(msg) => write!(f, "panicked: {msg}"),
            ExitReason::Aborted => f.write_str("aborted"),
            ExitReason::Empty => f.write_str("no loops were running"),
        }
    }
}

/// The first loop exit observed by [`Orchestrator::run`].
#[derive(Debug)]
pub struct LoopExit {
    pub name: &'static str,
    pub reason: ExitReason,
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop '{}' {}", self.name, self.reason)
    }
}

/// Owns every orchestrated loop.
#[derive(Default)]
pub struct Orchestrator {
    tasks: JoinSet<LoopOutcome>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `future` as the loop called `name`.
    pub fn spawn<F>(&mut self, name: &'static str, future: F) -> &mut Self
    where
        F: Future<Output = Result<(), LoopFailure>> + Send + 'static,
    {
        info!(loop_name = name, "starting loop");
        self.tasks
            .spawn(async move { (name, AssertUnwindSafe(future).catch_unwind().await) });
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the first loop to stop, then abort and drain all others.
    pub async fn run(mut self) -> LoopExit {
        let exit = match self.tasks.join_next().await {
            Some(Ok((name, Ok(Ok(()))))) => LoopExit {
                name,
                reason: ExitReason::Returned,
            },
            Some(Ok((name, Ok(Err(failure))))) => LoopExit {
                name,
                reason: ExitReason::Failed(failure),
            },
            Some(Ok((name, Err(payload)))) => LoopExit {
                name,
                reason: ExitReason::Panicked(panic_message(payload.as_ref())),
            },
            Some(Err(join_error)) => LoopExit {
                name: "unknown",
                reason: if join_error.is_panic() {
                    ExitReason::Panicked(join_error.to_string())
                } else {
                    ExitReason::Aborted
                },
            },
            None => LoopExit {
                name: "none",
                reason: ExitReason::Empty,
            },
        };

        match exit.reason {
            ExitReason::Returned => info!(loop_name = exit.name, "loop exited; shutting down"),
            _ => error!(loop_name = exit.name, reason = %exit.reason, "loop exited; shutting down"),
        }

        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
        exit
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Flags its owner's cancellation when dropped.
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn forever(flag: Arc<AtomicBool>) -> impl Future<Output = Result<(), LoopFailure>> + Send {
        async move {
            let _guard = DropFlag(flag);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn explode() -> Result<(), LoopFailure> {
        panic!("socket exploded")
    }

    #[tokio::test]
    async fn first_return_aborts_all_other_loops() {
        let a = Arc::new(AtomicBool::new(false));
        let b = Arc::new(AtomicBool::new(false));
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .spawn("websocket", forever(Arc::clone(&a)))
            .spawn("fanout", forever(Arc::clone(&b)))
            .spawn("bus_pump", async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(())
            });
        assert_eq!(orchestrator.len(), 3);

        let exit = orchestrator.run().await;
        assert_eq!(exit.name, "bus_pump");
        assert!(matches!(exit.reason, ExitReason::Returned));
        assert!(a.load(Ordering::SeqCst), "websocket loop must be aborted");
        assert!(b.load(Ordering::SeqCst), "fanout loop must be aborted");
    }

    #[tokio::test]
    async fn failure_is_reported() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .spawn("antenna_send", forever(Arc::clone(&flag)))
            .spawn("fanout", async { Err(LoopFailure::QueueClosed) });

        let exit = orchestrator.run().await;
        assert_eq!(exit.name, "fanout");
        assert!(matches!(exit.reason, ExitReason::Failed(LoopFailure::QueueClosed)));
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(exit.to_string(), "loop 'fanout' failed: fan-out queue closed");
    }

    #[tokio::test]
    async fn panic_is_reported_with_loop_name() {
        let mut orchestrator = Orchestrator::new();
        orchestrator
            .spawn("idle", forever(Arc::new(AtomicBool::new(false))))
            .spawn("antenna_listen", explode());

        let exit = orchestrator.run().await;
        assert_eq!(exit.name, "antenna_listen");
        match exit.reason {
            ExitReason::Panicked(msg) => assert_eq!(msg, "socket exploded"),
            other => panic!("expected panic, got {other}"),
        }
    }

    #[tokio::test]
    async fn empty_orchestrator_returns_immediately() {
        let exit = Orchestrator::new().run().await;
        assert!(matches!(exit.reason, ExitReason::Empty));
    }
}
