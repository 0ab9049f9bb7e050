//! Inbound command queue
//!
//! Unbounded FIFO shared between the session driver, which appends parsed
//! commands, and consumers waiting in `receive_command`. Appends never wait
//! on consumers. Removal suspends on a [`Notify`] instead of polling.

use crate::protocol::Command;
use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Mutex<VecDeque<Command>>,
    available: Notify,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command at the tail
    pub async fn push(&self, command: Command) {
        self.commands.lock().await.push_back(command);
        self.available.notify_one();
    }

    /// Remove the head without waiting
    pub async fn try_pop(&self) -> Option<Command> {
        self.commands.lock().await.pop_front()
    }

    /// Remove the head, waiting until one is available.
    ///
    /// Returns `None` once `cancel` fires and the queue is empty. Cancel safe:
    /// a command is only removed when it is returned.
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Command> {
        loop {
            if let Some(command) = self.try_pop().await {
                return Some(command);
            }
            tokio::select! {
                _ = self.available.notified() => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.commands.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.commands.lock().await.is_empty()
    }
}
