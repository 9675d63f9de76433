use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    static CURRENT: RefCell<Option<CancelToken>> = RefCell::new(None);
}

/// Interruption signal shared between a worker and the thread that owns it.
///
/// A token installed on a thread is observed by blocking lock waits running on
/// that thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Installs the token for the current thread until the guard is dropped.
    pub fn install(&self) -> InstalledToken {
        let previous = CURRENT.with(|c| c.borrow_mut().replace(self.clone()));
        InstalledToken { previous }
    }

    pub fn is_current_cancelled() -> bool {
        CURRENT.with(|c| {
            c.borrow()
                .as_ref()
                .map(CancelToken::is_cancelled)
                .unwrap_or(false)
        })
    }
}

pub struct InstalledToken {
    previous: Option<CancelToken>,
}

impl Drop for InstalledToken {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use crate::cancel::CancelToken;

    #[test]
    fn test_install() {
        assert!(!CancelToken::is_current_cancelled());
        let token = CancelToken::new();
        {
            let _guard = token.install();
            assert!(!CancelToken::is_current_cancelled());
            token.cancel();
            assert!(CancelToken::is_current_cancelled());
        }
        assert!(!CancelToken::is_current_cancelled());

        let other = CancelToken::new();
        let _guard = other.install();
        std::thread::spawn(move || {
            let _guard = token.install();
            assert!(CancelToken::is_current_cancelled());
        })
        .join()
        .unwrap();
        assert!(!CancelToken::is_current_cancelled());
    }
}
