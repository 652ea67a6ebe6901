//! A multi-waiter condition primitive: any number of tasks can wait on a
//! `Dock`, and a signal wakes either one or all of them, matching what the
//! reactor uses to park evaluations on "room X has a new head" or "server Y
//! became reachable" without busy-polling.

use tokio::sync::Notify;

#[derive(Default)]
pub struct Dock {
    notify: Notify,
}

impl Dock {
    pub fn new() -> Self {
        Self {
            notify: Notify::new(),
        }
    }

    /// Waits until the next [`Self::notify_one`] or [`Self::notify_all`].
    /// Like [`tokio::sync::Notify`], a permit issued before this call is
    /// consumed immediately rather than lost.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    /// Wakes exactly one waiter (or stores a permit for the next arrival).
    pub fn notify_one(&self) {
        self.notify.notify_one();
    }

    /// Wakes every task currently waiting.
    pub fn notify_all(&self) {
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn notify_all_wakes_every_waiter() {
        let dock = Arc::new(Dock::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let dock = dock.clone();
            handles.push(tokio::spawn(async move {
                dock.wait().await;
            }));
        }
        // give the spawned tasks a chance to reach `wait`.
        tokio::time::sleep(Duration::from_millis(20)).await;
        dock.notify_all();
        for h in handles {
            tokio::time::timeout(Duration::from_millis(200), h)
                .await
                .expect("waiter woke")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn notify_one_wakes_a_single_waiter() {
        let dock = Arc::new(Dock::new());
        let d = dock.clone();
        let handle = tokio::spawn(async move {
            d.wait().await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        dock.notify_one();
        tokio::time::timeout(Duration::from_millis(200), handle)
            .await
            .expect("waiter woke")
            .unwrap();
    }
}
