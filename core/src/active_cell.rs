use tokio::sync::watch;

/// Latest-value cell for session-wide selections (the open chat, the
/// expanded project).
///
/// Code that resumes after an `.await` must read the selection through the
/// cell at that moment instead of reusing a copy taken before suspending.
/// Background tasks get an [`ActiveReader`] for the same purpose.
#[derive(Debug)]
pub struct ActiveCell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> ActiveCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value, returning the previous one.
    pub fn set(&self, value: T) -> T {
        self.tx.send_replace(value)
    }

    pub fn matches(&self, predicate: impl FnOnce(&T) -> bool) -> bool {
        predicate(&self.tx.borrow())
    }

    pub fn reader(&self) -> ActiveReader<T> {
        ActiveReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read-only handle onto an [`ActiveCell`]. Always observes the most recent
/// value, even if it was set after the reader was created.
#[derive(Debug, Clone)]
pub struct ActiveReader<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> ActiveReader<T> {
    pub fn get(&self) -> T {
        self.rx.borrow().clone()
    }

    pub fn matches(&self, predicate: impl FnOnce(&T) -> bool) -> bool {
        predicate(&self.rx.borrow())
    }
}
