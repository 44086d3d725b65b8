//! Operator channel: the abstract control-plane interface
//! the League Manager listens on for `start_league | run_round |
//! run_all_rounds | status | shutdown`. A CLI is one implementation; a
//! dashboard control-plane is another. The in-memory channel here is
//! enough to drive a League Manager from tests or from a thin binary.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::league::identity::LeagueId;
use crate::league::standings::StandingsEntry;

#[derive(Debug)]
pub enum OperatorCommand {
    StartLeague,
    RunRound,
    RunAllRounds,
    Status,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct LeagueStatusSnapshot {
    pub league_id: LeagueId,
    pub state: String,
    pub rounds_completed: usize,
    pub rounds_total: usize,
    pub standings: Vec<StandingsEntry>,
}

#[derive(Debug)]
pub enum OperatorResponse {
    Ack,
    Status(LeagueStatusSnapshot),
    Error(String),
}

struct OperatorRequest {
    command: OperatorCommand,
    reply: oneshot::Sender<OperatorResponse>,
}

/// Inbound half: what the League Manager polls to learn about the next
/// operator command.
#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn recv(&self) -> Option<(OperatorCommand, oneshot::Sender<OperatorResponse>)>;
}

/// In-memory operator channel backed by a Tokio mpsc queue. `OperatorHandle`
/// is the outbound half a CLI binary or test harness uses to issue commands
/// and await their result.
pub struct InMemoryOperatorChannel {
    receiver: tokio::sync::Mutex<mpsc::Receiver<OperatorRequest>>,
}

#[async_trait]
impl OperatorChannel for InMemoryOperatorChannel {
    async fn recv(&self) -> Option<(OperatorCommand, oneshot::Sender<OperatorResponse>)> {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.map(|req| (req.command, req.reply))
    }
}

#[derive(Clone)]
pub struct OperatorHandle {
    sender: mpsc::Sender<OperatorRequest>,
}

impl OperatorHandle {
    /// Creates a linked `(InMemoryOperatorChannel, OperatorHandle)` pair:
    /// the channel is handed to a `LeagueManager`, the handle to whatever
    /// drives it (a CLI loop, a test).
    pub fn new_pair(buffer: usize) -> (InMemoryOperatorChannel, OperatorHandle) {
        let (sender, receiver) = mpsc::channel(buffer);
        (
            InMemoryOperatorChannel {
                receiver: tokio::sync::Mutex::new(receiver),
            },
            OperatorHandle { sender },
        )
    }

    async fn send(&self, command: OperatorCommand) -> OperatorResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.sender.send(OperatorRequest { command, reply: reply_tx }).await.is_err() {
            return OperatorResponse::Error("league manager operator loop has stopped".into());
        }
        reply_rx
            .await
            .unwrap_or_else(|_| OperatorResponse::Error("league manager dropped the reply channel".into()))
    }

    pub async fn start_league(&self) -> OperatorResponse {
        self.send(OperatorCommand::StartLeague).await
    }

    pub async fn run_round(&self) -> OperatorResponse {
        self.send(OperatorCommand::RunRound).await
    }

    pub async fn run_all_rounds(&self) -> OperatorResponse {
        self.send(OperatorCommand::RunAllRounds).await
    }

    pub async fn status(&self) -> OperatorResponse {
        self.send(OperatorCommand::Status).await
    }

    pub async fn shutdown(&self) -> OperatorResponse {
        self.send(OperatorCommand::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_and_channel_round_trip_a_command() {
        let (channel, handle) = OperatorHandle::new_pair(4);

        let responder = tokio::spawn(async move {
            let (command, reply) = channel.recv().await.unwrap();
            assert!(matches!(command, OperatorCommand::StartLeague));
            reply.send(OperatorResponse::Ack).unwrap();
        });

        let response = handle.start_league().await;
        assert!(matches!(response, OperatorResponse::Ack));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn send_after_channel_dropped_yields_error_response() {
        let (channel, handle) = OperatorHandle::new_pair(4);
        drop(channel);
        let response = handle.status().await;
        assert!(matches!(response, OperatorResponse::Error(_)));
    }
}
