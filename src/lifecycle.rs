use tokio::sync::broadcast;

use crate::error::RoomError;
use crate::game::GameEvent;
use crate::room::{ModeState, Room};
use crate::types::*;

/// Top three non-host participants by score. Ties keep join order.
pub fn podium(participants: &[Participant]) -> Vec<Participant> {
    let mut ranked: Vec<Participant> = participants.iter().filter(|p| !p.is_host).cloned().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(3);
    ranked
}

impl Room {
    pub fn start_game(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        self.require_host(connection_id)?;
        match self.mode() {
            RoomMode::Impostor => return Err(RoomError::WrongMode(RoomMode::Impostor)),
            RoomMode::Buzzer | RoomMode::Type => {}
        }

        // Starting again while active acts as a hard buzzer reset.
        self.state = GameState::Active;
        if self.mode() == RoomMode::Buzzer {
            self.clear_buzzers();
            self.broadcast(tx, ServerMsg::BuzzersReset);
        }

        tracing::info!(room = %self.code, mode = %self.mode(), "game started");
        self.broadcast(tx, ServerMsg::GameStarted { state: self.state });
        Ok(())
    }

    pub fn end_game(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        self.require_host(connection_id)?;
        self.log_score_tally("game ended");

        self.state = GameState::Ended;
        let podium = podium(&self.participants);

        tracing::info!(room = %self.code, winners = ?podium.iter().map(|p| &p.name).collect::<Vec<_>>(), "game ended");
        self.broadcast(tx, ServerMsg::GameEnded {
            state: self.state,
            podium,
        });
        Ok(())
    }

    /// Zero every score and transient round state; the question bank survives.
    pub fn new_game(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        self.require_host(connection_id)?;
        if self.mode() == RoomMode::Impostor {
            return Err(RoomError::WrongMode(RoomMode::Impostor));
        }

        for p in &mut self.participants {
            p.score = 0;
            p.answered = false;
        }
        self.clear_buzzers();
        if let ModeState::Type(round) = &mut self.round {
            round.reset();
        }
        self.state = GameState::Waiting;

        tracing::info!(room = %self.code, "game reset");
        self.broadcast(tx, ServerMsg::GameReset {
            state: self.state,
            participants: self.participants.clone(),
        });
        Ok(())
    }
}
