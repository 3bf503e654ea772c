use crate::engine::{Engine, Event, Response};
use crate::models::UserId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A worker with nothing to do for this long exits and frees its slot.
pub const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

type Workers = Arc<Mutex<HashMap<UserId, UnboundedSender<Event>>>>;

/// Everything the engine answered to one event.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub user: UserId,
    pub responses: Vec<Response>,
}

/// Routes events to one worker task per user.
///
/// A user's events are handled strictly in arrival order by their worker;
/// workers for different users run concurrently. Idle workers retire and a
/// fresh one is spawned on the user's next event.
pub struct Dispatcher {
    engine: Arc<Engine>,
    outbound: UnboundedSender<Outbound>,
    workers: Workers,
    idle_timeout: Duration,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> (Self, UnboundedReceiver<Outbound>) {
        Self::with_idle_timeout(engine, WORKER_IDLE_TIMEOUT)
    }

    pub fn with_idle_timeout(
        engine: Arc<Engine>,
        idle_timeout: Duration,
    ) -> (Self, UnboundedReceiver<Outbound>) {
        let (outbound, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            engine,
            outbound,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        };
        (dispatcher, receiver)
    }

    pub async fn dispatch(&self, event: Event) {
        let user = event.user();
        let mut workers = self.workers.lock().await;
        let worker = workers
            .entry(user)
            .or_insert_with(|| self.spawn_worker(user));

        if let Err(mpsc::error::SendError(event)) = worker.send(event) {
            warn!("Worker for user {} stopped, restarting", user);
            let worker = self.spawn_worker(user);
            if worker.send(event).is_err() {
                warn!("Dropping event for user {}", user);
            }
            workers.insert(user, worker);
        }
    }

    pub async fn worker_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    /// Stops accepting events. Workers finish what is queued, then exit.
    pub async fn close(self) {
        self.workers.lock().await.clear();
    }

    fn spawn_worker(&self, user: UserId) -> UnboundedSender<Event> {
        let (sender, mut receiver) = mpsc::unbounded_channel::<Event>();
        let engine = Arc::clone(&self.engine);
        let outbound = self.outbound.clone();
        let workers = Arc::clone(&self.workers);
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            debug!("Worker for user {} started", user);
            loop {
                let event = match tokio::time::timeout(idle_timeout, receiver.recv()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_) => {
                        // `dispatch` sends under this lock, so nothing can slip
                        // in between the emptiness check and the removal.
                        let mut workers = workers.lock().await;
                        match receiver.try_recv() {
                            Ok(event) => event,
                            Err(_) => {
                                workers.remove(&user);
                                debug!("Worker for user {} idle, retiring", user);
                                break;
                            }
                        }
                    }
                };

                let responses = engine.handle(event).await;
                if outbound.send(Outbound { user, responses }).is_err() {
                    debug!("Outbound channel closed, worker for user {} exiting", user);
                    break;
                }
            }
        });
        sender
    }
}
