use tokio::sync::watch;

/// Run-level abort signal shared by the engine and every executor.
///
/// Stopping is one-way. Executors stop scheduling new iterations as soon as
/// they observe it and give in-flight iterations their graceful-stop window.
#[derive(Clone)]
pub struct ControlState {
    stopped: watch::Sender<bool>,
}

impl ControlState {
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self { stopped }
    }

    pub fn stop(&self) {
        self.stopped.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stopped.borrow()
    }

    pub fn subscribe(&self) -> StopSignal {
        StopSignal {
            rx: self.stopped.subscribe(),
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of [`ControlState`].
#[derive(Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop was requested. Never resolves if the controller is
    /// dropped without stopping.
    pub async fn stopped(&mut self) {
        if self.rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
