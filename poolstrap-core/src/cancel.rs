//! Operator-interrupt handling.
//!
//! A Ctrl+C sets a shared flag; stages poll it between destructive steps and
//! surface `InstallError::Interrupted`, which routes through the same cleanup
//! path as any other fatal error.

use poolstrap_error::InstallError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

static CANCEL_FLAG: OnceLock<Mutex<Option<Arc<AtomicBool>>>> = OnceLock::new();
static HANDLER_SET: OnceLock<()> = OnceLock::new();

pub fn set_cancel_flag(flag: Arc<AtomicBool>) {
    let lock = CANCEL_FLAG.get_or_init(|| Mutex::new(None));
    if let Ok(mut guard) = lock.lock() {
        *guard = Some(flag);
    }
}

pub fn clear_cancel_flag() {
    if let Some(lock) = CANCEL_FLAG.get() {
        if let Ok(mut guard) = lock.lock() {
            *guard = None;
        }
    }
}

pub fn cancel_requested() -> bool {
    CANCEL_FLAG
        .get()
        .and_then(|lock| lock.lock().ok())
        .and_then(|guard| guard.as_ref().map(|flag| flag.load(Ordering::Relaxed)))
        .unwrap_or(false)
}

/// Fails with `Interrupted` once the operator has requested cancellation.
pub fn check_cancel() -> Result<(), InstallError> {
    if cancel_requested() {
        return Err(InstallError::Interrupted);
    }
    Ok(())
}

/// Install the process-wide Ctrl+C handler once. Subsequent calls are no-ops.
pub fn install_ctrlc_handler() -> anyhow::Result<()> {
    if HANDLER_SET.get().is_some() {
        return Ok(());
    }

    let flag = Arc::new(AtomicBool::new(false));
    set_cancel_flag(Arc::clone(&flag));
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
        log::info!("Cancellation requested (Ctrl+C).");
    })?;

    let _ = HANDLER_SET.set(());
    Ok(())
}
