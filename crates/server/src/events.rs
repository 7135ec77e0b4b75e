use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

const MAX_PENDING_EVENTS: usize = 512;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SessionCreated {
        session_id: u32,
        name: String,
    },
    SessionClosed {
        session_id: u32,
    },
    PlayerJoined {
        session_id: u32,
        player_id: u32,
        addr: SocketAddr,
        name: String,
    },
    PlayerLeft {
        session_id: u32,
        player_id: u32,
        reason: DisconnectReason,
    },
    JoinRejected {
        session_id: u32,
        addr: SocketAddr,
        reason: String,
    },
    GameStarted {
        session_id: u32,
        stage: u32,
    },
    GameOver {
        session_id: u32,
    },
    StageCleared {
        session_id: u32,
        stage: u32,
        bonus: u32,
    },
    LagSpike {
        session_id: u32,
        tick_ms: u64,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Timeout,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "left",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Shutdown => "dropped at shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl ServerEvent {
    pub fn severity(&self) -> Severity {
        match self {
            ServerEvent::JoinRejected { .. } | ServerEvent::LagSpike { .. } => Severity::Warn,
            ServerEvent::Error { .. } => Severity::Error,
            _ => Severity::Info,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ServerEvent::SessionCreated { session_id, name } => {
                format!("Session {} ({}) created", session_id, name)
            }
            ServerEvent::SessionClosed { session_id } => format!("Session {} closed", session_id),
            ServerEvent::PlayerJoined {
                session_id,
                player_id,
                addr,
                name,
            } => format!(
                "Player {} ({}) joined session {} from {}",
                player_id, name, session_id, addr
            ),
            ServerEvent::PlayerLeft {
                session_id,
                player_id,
                reason,
            } => format!(
                "Player {} {} (session {})",
                player_id,
                reason.as_str(),
                session_id
            ),
            ServerEvent::JoinRejected {
                session_id,
                addr,
                reason,
            } => format!(
                "Join from {} to session {} rejected: {}",
                addr, session_id, reason
            ),
            ServerEvent::GameStarted { session_id, stage } => {
                format!("Session {} started stage {}", session_id, stage)
            }
            ServerEvent::GameOver { session_id } => format!("Session {} game over", session_id),
            ServerEvent::StageCleared {
                session_id,
                stage,
                bonus,
            } => format!(
                "Session {} cleared stage {} (bonus {})",
                session_id, stage, bonus
            ),
            ServerEvent::LagSpike {
                session_id,
                tick_ms,
            } => format!("Session {} tick took {}ms", session_id, tick_ms),
            ServerEvent::Error { message } => message.clone(),
        }
    }
}

/// Bounded queue shared by every session and drained by the front end.
/// The oldest events are dropped when nobody drains it.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    inner: Arc<Mutex<VecDeque<ServerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: ServerEvent) {
        let mut events = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if events.len() >= MAX_PENDING_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn drain(&self) -> Vec<ServerEvent> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_is_bounded() {
        let log = EventLog::new();
        for session_id in 0..(MAX_PENDING_EVENTS as u32 + 10) {
            log.push(ServerEvent::SessionClosed { session_id });
        }
        let events = log.drain();
        assert_eq!(events.len(), MAX_PENDING_EVENTS);
        assert_eq!(events[0], ServerEvent::SessionClosed { session_id: 10 });
        assert!(log.drain().is_empty());
    }

    #[test]
    fn severity_and_text() {
        let event = ServerEvent::PlayerLeft {
            session_id: 7,
            player_id: 1,
            reason: DisconnectReason::Timeout,
        };
        assert_eq!(event.severity(), Severity::Info);
        assert_eq!(event.describe(), "Player 1 timed out (session 7)");
        let lag = ServerEvent::LagSpike {
            session_id: 7,
            tick_ms: 150,
        };
        assert_eq!(lag.severity(), Severity::Warn);
    }
}
