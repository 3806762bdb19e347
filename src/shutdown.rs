//! Cooperative cancellation for provisioning runs
//!
//! A run checks its [`CancelToken`] before every admin operation and while
//! waiting on migrations. Cancelling never rolls anything back: the executor
//! stops issuing new operations and reports the affected collections as in
//! progress, so the next run resumes from the live cluster state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install handlers for SIGINT (Ctrl+C), SIGTERM and SIGHUP.
///
/// The first signal cancels `token` so the run can stop between operations and
/// still print its report. A second signal exits immediately with 128 + signal.
/// Call this once at program start.
pub fn init_signal_handlers(token: CancelToken) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            if token.is_cancelled() {
                tracing::warn!(signal = signal_name, "second signal, exiting immediately");
                std::process::exit(128 + sig);
            }

            tracing::warn!(
                signal = signal_name,
                "stopping after the current operation (send again to exit now)"
            );
            token.cancel();
        }
    });

    Ok(())
}
