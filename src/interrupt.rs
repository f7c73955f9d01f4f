//! Operator interrupt delivery.
//!
//! An interrupt can only land at the two suspension points of a measurement:
//! waiting for axes to settle and waiting for the counting condition. Both race
//! their hardware future against [`InterruptSignal::triggered`], so the
//! interrupt surfaces as `ScriptError::Interrupted` at exactly those points.
//!
//! The flag is a `tokio::sync::watch` channel. It stays set until cleared, so
//! an interrupt raised between suspension points is observed at the next one.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{ScriptError, ScriptResult};

/// Cloneable handle to the process interrupt flag.
#[derive(Debug, Clone)]
pub struct InterruptSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptSignal {
    /// Create a new, untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the interrupt.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Lower the interrupt so the next one can be observed.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    /// Whether the interrupt is currently raised.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the interrupt is raised.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|raised| *raised).await.is_err() {
            // Sender lives as long as `self`, so this cannot happen; never resolve.
            std::future::pending::<()>().await;
        }
    }

    /// Run `fut` unless the interrupt is (or becomes) raised first.
    pub async fn guard<T, F>(&self, fut: F) -> ScriptResult<T>
    where
        F: Future<Output = ScriptResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.triggered() => Err(ScriptError::Interrupted),
            result = fut => result,
        }
    }

    /// Forward every Ctrl-C to this signal for the lifetime of the process.
    pub fn install_ctrl_c(&self) -> JoinHandle<()> {
        let signal = self.clone();
        tokio::spawn(async move {
            loop {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("Ctrl-C received");
                        signal.trigger();
                    }
                    Err(e) => {
                        warn!(error = %e, "Unable to listen for Ctrl-C; interrupts disabled");
                        return;
                    }
                }
            }
        })
    }
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}
