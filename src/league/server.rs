//! Per-agent-role HTTP wiring, feature-gated behind `server`.
//!
//! Each `run_*` helper mounts an agent's [`RpcHandler`] on a loopback
//! listener via [`league_protocol::server::serve`] and performs whatever
//! startup handshake that role needs (a Player/Referee registers with the
//! League Manager once its own listener is up; the League Manager has
//! nothing to register with).

use std::net::SocketAddr;
use std::sync::Arc;

use league_protocol::server::serve;
use league_protocol::RpcHandler;
use tokio::task::JoinHandle;

use crate::league::identity::LeagueId;
use crate::league::manager_agent::LeagueManager;
use crate::league::player_agent::{PlayerAgent, RegistrationFailed as PlayerRegistrationFailed};
use crate::league::referee_agent::{RefereeAgent, RefereeHandler, RegistrationFailed as RefereeRegistrationFailed};

/// Binds and serves a [`LeagueManager`]'s `/mcp` endpoint. The Manager has
/// no registration handshake of its own — starting its listener is enough
/// for it to begin accepting peer registrations.
pub async fn run_manager(manager: Arc<LeagueManager>, addr: SocketAddr) -> std::io::Result<JoinHandle<()>> {
    let handler: Arc<dyn RpcHandler> = manager;
    serve(addr, handler).await
}

/// Binds a [`PlayerAgent`]'s `/mcp` endpoint, then registers it with the
/// League Manager at `league_id`. The listener is already accepting
/// `game.invite` calls by the time registration completes, so a fast
/// Manager can never race ahead of this player's own server.
pub async fn run_player(
    agent: Arc<PlayerAgent>,
    addr: SocketAddr,
    league_id: LeagueId,
) -> Result<JoinHandle<()>, PlayerRegistrationFailed> {
    let handler: Arc<dyn RpcHandler> = agent.clone();
    let join = serve(addr, handler)
        .await
        .map_err(|e| PlayerRegistrationFailed(format!("failed to bind {addr}: {e}")))?;
    agent.register(league_id).await?;
    Ok(join)
}

/// Binds a [`RefereeAgent`]'s `/mcp` endpoint, then registers it with the
/// League Manager at `league_id`.
pub async fn run_referee(
    referee: Arc<RefereeAgent>,
    addr: SocketAddr,
    league_id: LeagueId,
) -> Result<JoinHandle<()>, RefereeRegistrationFailed> {
    let handler: Arc<dyn RpcHandler> = Arc::new(RefereeHandler(referee.clone()));
    let join = serve(addr, handler)
        .await
        .map_err(|e| RefereeRegistrationFailed(format!("failed to bind {addr}: {e}")))?;
    referee.register(league_id).await?;
    Ok(join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::league::config::LeagueConfig;
    use crate::league::strategy::RandomStrategy;
    use std::time::Duration;

    #[tokio::test]
    async fn player_and_referee_register_against_a_live_manager() {
        let manager = Arc::new(LeagueManager::new(LeagueId::new("l1"), "parity", LeagueConfig::default()));
        let manager_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let manager_listener = tokio::net::TcpListener::bind(manager_addr).await.unwrap();
        let manager_bound = manager_listener.local_addr().unwrap();
        drop(manager_listener);
        run_manager(manager.clone(), manager_bound).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let manager_endpoint = format!("http://{manager_bound}");

        let referee = Arc::new(RefereeAgent::new(
            "R1",
            "http://127.0.0.1:0",
            manager_endpoint.clone(),
            vec!["parity".into()],
            4,
        ));
        let referee_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let referee_listener = tokio::net::TcpListener::bind(referee_addr).await.unwrap();
        let referee_bound = referee_listener.local_addr().unwrap();
        drop(referee_listener);
        run_referee(referee, referee_bound, LeagueId::new("l1")).await.unwrap();

        let player = Arc::new(PlayerAgent::new(
            "Alice",
            "http://127.0.0.1:0",
            manager_endpoint,
            vec!["parity".into()],
            Arc::new(RandomStrategy),
        ));
        let player_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let player_listener = tokio::net::TcpListener::bind(player_addr).await.unwrap();
        let player_bound = player_listener.local_addr().unwrap();
        drop(player_listener);
        run_player(player.clone(), player_bound, LeagueId::new("l1")).await.unwrap();

        assert!(player.player_id().await.is_some());
        assert_eq!(manager.player_count(), 1);
    }
}
