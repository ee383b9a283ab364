//! Minimal single-mailbox actor runtime.
//!
//! An actor is spawned onto the tokio runtime with [`spawn`], which returns
//! a cloneable [`ActorHandle`] for messages and a single [`ActorRef`] owning
//! the task. The loop ends when the `ActorRef` stops it or is dropped, when
//! every strong handle is gone, or when the actor asks to stop.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

// =============================================================================
// Core Traits
// =============================================================================

/// Marker trait for actor messages.
pub trait Message: Send + Debug + 'static {}

impl<T: Send + Debug + 'static> Message for T {}

/// Behavior of an actor. Messages are handled one at a time.
///
/// Slow work should be spawned from `handle`; results that touch actor
/// state come back as ordinary messages through the handle given to `bind`.
#[async_trait]
pub trait Actor: Send + 'static {
    /// The message type this actor handles.
    type Message: Message;

    /// Actor name for logging.
    fn name(&self) -> &str;

    /// Receives a handle to the actor's own mailbox before it starts.
    ///
    /// The handle is weak so an actor never keeps its own mailbox open.
    fn bind(&mut self, _mailbox: WeakActorHandle<Self::Message>) {}

    /// Handle a single message.
    ///
    /// Returns `Ok(true)` to continue, `Ok(false)` to stop, or `Err` on failure.
    async fn handle(&mut self, msg: Self::Message, ctx: &mut ActorContext) -> Result<bool, ActorError>;

    /// Called when the actor starts.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called when the actor is about to stop.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Per-actor bookkeeping passed to every callback.
#[derive(Debug)]
pub struct ActorContext {
    pub actor_id: String,

    pub messages_processed: u64,
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Error)]
pub enum ActorError {
    /// Returned from a callback to end the actor loop.
    #[error("fatal actor error: {0}")]
    Fatal(String),

    /// The actor is gone, or dropped the reply channel.
    #[error("actor stopped")]
    ActorStopped,
}

// =============================================================================
// Actor Handles
// =============================================================================

/// Handle for sending messages to an actor.
#[derive(Debug)]
pub struct ActorHandle<M: Message> {
    tx: mpsc::Sender<M>,

    actor_id: String,
}

impl<M: Message> Clone for ActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> ActorHandle<M> {
    /// Enqueue a message, waiting for mailbox capacity.
    pub async fn send(&self, msg: M) -> Result<(), ActorError> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| ActorError::ActorStopped)
    }

    /// Send a message carrying a reply channel and wait for the reply.
    pub async fn request<R, F>(&self, make: F) -> Result<R, ActorError>
    where
        F: FnOnce(oneshot::Sender<R>) -> M,
        R: Send,
    {
        let (reply_to, reply) = oneshot::channel();
        self.send(make(reply_to)).await?;
        reply.await.map_err(|_| ActorError::ActorStopped)
    }

    pub fn downgrade(&self) -> WeakActorHandle<M> {
        WeakActorHandle {
            tx: self.tx.downgrade(),
            actor_id: self.actor_id.clone(),
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

/// Handle that does not keep the actor's mailbox open.
#[derive(Debug)]
pub struct WeakActorHandle<M: Message> {
    tx: mpsc::WeakSender<M>,

    actor_id: String,
}

impl<M: Message> Clone for WeakActorHandle<M> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            actor_id: self.actor_id.clone(),
        }
    }
}

impl<M: Message> WeakActorHandle<M> {
    /// Returns a strong handle if the mailbox is still open.
    pub fn upgrade(&self) -> Option<ActorHandle<M>> {
        self.tx.upgrade().map(|tx| ActorHandle {
            tx,
            actor_id: self.actor_id.clone(),
        })
    }
}

/// Owner reference to a running actor.
///
/// Dropping it signals the actor to stop.
pub struct ActorRef {
    pub actor_id: String,

    task_handle: tokio::task::JoinHandle<()>,

    shutdown_tx: watch::Sender<bool>,
}

impl ActorRef {
    /// Signal the actor to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        !self.task_handle.is_finished()
    }

    /// Signal the actor to stop and wait for its loop to finish.
    pub async fn shutdown(self) {
        self.stop();
        let actor_id = self.actor_id.clone();
        if let Err(e) = self.task_handle.await {
            error!(actor_id = %actor_id, error = %e, "Actor task ended abnormally");
        }
    }
}

/// Spawn an actor on the current tokio runtime.
pub fn spawn<A: Actor>(mut actor: A, mailbox_size: usize) -> (ActorHandle<A::Message>, ActorRef) {
    let actor_id = format!("{}_{}", actor.name(), generate_actor_id());
    let (tx, rx) = mpsc::channel(mailbox_size);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = ActorHandle {
        tx,
        actor_id: actor_id.clone(),
    };
    actor.bind(handle.downgrade());

    let loop_id = actor_id.clone();
    let task_handle = tokio::spawn(async move {
        run_actor_loop(actor, rx, shutdown_rx, loop_id).await;
    });

    info!(actor_id = %actor_id, "Spawned actor");

    let actor_ref = ActorRef {
        actor_id,
        task_handle,
        shutdown_tx,
    };
    (handle, actor_ref)
}

// =============================================================================
// Actor Loop
// =============================================================================

async fn run_actor_loop<A: Actor>(
    mut actor: A,
    mut rx: mpsc::Receiver<A::Message>,
    mut shutdown: watch::Receiver<bool>,
    actor_id: String,
) {
    let mut ctx = ActorContext {
        actor_id: actor_id.clone(),
        messages_processed: 0,
    };

    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor_id = %actor_id, error = %e, "Actor failed to start");
        return;
    }
    debug!(actor_id = %actor_id, "Actor started");

    loop {
        tokio::select! {
            biased;

            // A dropped ActorRef counts as a shutdown request.
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!(actor_id = %actor_id, "Actor received shutdown signal");
                    break;
                }
            }

            msg = rx.recv() => {
                let Some(msg) = msg else {
                    debug!(actor_id = %actor_id, "Actor mailbox closed");
                    break;
                };
                ctx.messages_processed += 1;

                match actor.handle(msg, &mut ctx).await {
                    Ok(true) => {}
                    Ok(false) => {
                        info!(actor_id = %actor_id, "Actor requested stop");
                        break;
                    }
                    Err(e @ ActorError::Fatal(_)) => {
                        error!(actor_id = %actor_id, error = %e, "Actor failed");
                        break;
                    }
                    Err(e) => {
                        warn!(actor_id = %actor_id, error = %e, "Actor error");
                    }
                }
            }
        }
    }

    actor.on_stop(&mut ctx).await;

    info!(
        actor_id = %actor_id,
        messages_processed = ctx.messages_processed,
        "Actor stopped"
    );
}

// =============================================================================
// Helpers
// =============================================================================

static ACTOR_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn generate_actor_id() -> u64 {
    ACTOR_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

// =============================================================================
// Tests
// =============================================================================
