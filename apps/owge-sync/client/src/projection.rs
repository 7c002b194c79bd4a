use tokio::sync::watch;

/// Observable in-memory state owned by one handler. Readers always see a
/// whole snapshot; `None` means nothing has been loaded yet.
#[derive(Debug)]
pub struct Projection<T> {
    sender: watch::Sender<Option<T>>,
}

impl<T> Default for Projection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Projection<T> {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    /// Replaces the snapshot and notifies subscribers.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(Some(value));
    }

    /// Fills an empty projection. Returns `false` and keeps the current
    /// snapshot when something was published already.
    pub fn warm(&self, value: T) -> bool {
        let mut value = Some(value);
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = value.take();
            true
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.sender.subscribe()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.borrow().is_none()
    }
}

impl<T: Clone> Projection<T> {
    pub fn current(&self) -> Option<T> {
        self.sender.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn warm_never_overrides_a_published_value() {
        let projection = Projection::new();
        let mut rx = projection.subscribe();
        assert!(projection.warm(1));
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        projection.publish(5);
        assert!(!projection.warm(2));
        assert_eq!(projection.current(), Some(5));
        assert_eq!(*rx.borrow_and_update(), Some(5));
    }
}
