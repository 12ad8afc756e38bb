//! Store lifecycle flags.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{DirError, Result};

/// Initialized/tainted state shared by every public store operation.
///
/// The tainted flag latches when a fatal failure happens after index
/// mutations were issued; from then on every mutation fails until the store
/// is destroyed and re-initialized.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    initialized: AtomicBool,
    tainted: AtomicBool,
}

impl Lifecycle {
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.tainted.store(false, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.tainted.store(false, Ordering::SeqCst);
    }

    pub fn taint(&self) {
        self.tainted.store(true, Ordering::SeqCst);
    }

    pub fn check_initialized(&self) -> Result<()> {
        if !self.is_initialized() {
            return Err(DirError::NotInitialized);
        }
        Ok(())
    }

    pub fn check_not_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            return Err(DirError::AlreadyInitialized);
        }
        Ok(())
    }

    pub fn check_writable(&self) -> Result<()> {
        self.check_initialized()?;
        if self.tainted.load(Ordering::SeqCst) {
            return Err(DirError::IndexInconsistent(
                "store marked inconsistent by an earlier failure".into(),
            ));
        }
        Ok(())
    }
}
