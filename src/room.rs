use tokio::sync::broadcast;

use crate::buzzer::BuzzerRound;
use crate::config::ImpostorLimits;
use crate::error::RoomError;
use crate::game::GameEvent;
use crate::impostor::ImpostorRound;
use crate::type_answer::TypeRound;
use crate::types::*;

/// Per-mode round state. A room only ever carries the variant for its mode.
#[derive(Debug)]
pub enum ModeState {
    Buzzer(BuzzerRound),
    Type(TypeRound),
    Impostor(ImpostorRound),
}

impl ModeState {
    fn new(mode: RoomMode) -> Self {
        match mode {
            RoomMode::Buzzer => Self::Buzzer(BuzzerRound::default()),
            RoomMode::Type => Self::Type(TypeRound::default()),
            RoomMode::Impostor => Self::Impostor(ImpostorRound::default()),
        }
    }
}

/// A single room: roster, game state and the round state of its mode.
///
/// Owned by exactly one room task, so every method runs to completion
/// before the next command is looked at.
#[derive(Debug)]
pub struct Room {
    pub code: String,
    pub state: GameState,
    pub participants: Vec<Participant>,
    pub limits: ImpostorLimits,
    pub round: ModeState,
}

impl Room {
    /// Build a room whose first member (and host) is its creator.
    pub fn new(code: String, mode: RoomMode, limits: ImpostorLimits, creator: Participant) -> Self {
        let mut host = creator;
        host.is_host = true;
        host.role = None;
        Self {
            code,
            state: GameState::Waiting,
            participants: vec![host],
            limits,
            round: ModeState::new(mode),
        }
    }

    pub fn mode(&self) -> RoomMode {
        match self.round {
            ModeState::Buzzer(_) => RoomMode::Buzzer,
            ModeState::Type(_) => RoomMode::Type,
            ModeState::Impostor(_) => RoomMode::Impostor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    #[cfg(test)]
    pub fn participant(&self, id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == id)
    }

    #[cfg(test)]
    pub fn host(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_host)
    }

    pub(crate) fn position_of(&self, id: &str) -> Result<usize, RoomError> {
        self.participants
            .iter()
            .position(|p| p.id == id)
            .ok_or(RoomError::NotMember)
    }

    pub(crate) fn require_host(&self, id: &str) -> Result<(), RoomError> {
        let idx = self.position_of(id)?;
        if !self.participants[idx].is_host {
            return Err(RoomError::NotHost);
        }
        Ok(())
    }

    pub(crate) fn player_count(&self) -> usize {
        self.participants
            .iter()
            .filter(|p| p.role == Some(Role::Player))
            .count()
    }

    pub(crate) fn broadcast(&self, tx: &broadcast::Sender<GameEvent>, msg: ServerMsg) {
        let _ = tx.send(GameEvent::Broadcast { msg });
    }

    pub(crate) fn send_to(&self, tx: &broadcast::Sender<GameEvent>, connection_id: &str, msg: ServerMsg) {
        let _ = tx.send(GameEvent::SendTo {
            connection_id: connection_id.to_string(),
            msg,
        });
    }

    fn broadcast_except(&self, tx: &broadcast::Sender<GameEvent>, exclude: &str, msg: ServerMsg) {
        let _ = tx.send(GameEvent::BroadcastExcept {
            exclude: exclude.to_string(),
            msg,
        });
    }

    /// Add a participant. The joiner gets the room snapshot, everyone else
    /// a join notice.
    pub fn join(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        name: &str,
        desired_role: Option<Role>,
    ) -> Result<Participant, RoomError> {
        if self.participants.iter().any(|p| p.name == name) {
            return Err(RoomError::NameTaken);
        }

        let role = match self.mode() {
            RoomMode::Impostor => {
                let role = desired_role.unwrap_or(Role::Voter);
                if role == Role::Player && self.player_count() >= self.limits.max_videos {
                    return Err(RoomError::RoleCapacityExceeded {
                        max: self.limits.max_videos,
                    });
                }
                Some(role)
            }
            _ => None,
        };

        let participant = Participant::new(connection_id.to_string(), name.to_string(), false, role);
        self.participants.push(participant.clone());

        let (question, answer_log) = match &self.round {
            ModeState::Type(round) => (round.live_view(), round.answer_log().to_vec()),
            _ => (None, Vec::new()),
        };

        self.send_to(tx, connection_id, ServerMsg::RoomJoined {
            room_code: self.code.clone(),
            participant: participant.clone(),
            participants: self.participants.clone(),
            state: self.state,
            mode: self.mode(),
            question,
            answer_log,
        });
        self.broadcast_except(tx, connection_id, ServerMsg::ParticipantJoined {
            participant: participant.clone(),
        });

        tracing::info!(room = %self.code, name, role = ?role, "participant joined");
        Ok(participant)
    }

    /// Remove a participant, handing the host role to the earliest remaining
    /// joiner when needed. Returns the removed participant.
    pub fn leave(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<Participant, RoomError> {
        let idx = self.position_of(connection_id)?;
        let removed = self.participants.remove(idx);
        tracing::info!(room = %self.code, name = %removed.name, "participant left");

        if self.participants.is_empty() {
            return Ok(removed);
        }

        self.forget_in_round(connection_id);

        if removed.is_host {
            let next = &mut self.participants[0];
            next.is_host = true;
            next.role = None;
            next.buzzed = false;
            next.buzz_time = None;
            let promoted = next.id.clone();
            tracing::info!(room = %self.code, host = %next.name, "host reassigned");
            // Hosts neither buzz nor vote.
            self.forget_in_round(&promoted);
        }

        self.broadcast(tx, ServerMsg::ParticipantLeft {
            participant_id: removed.id.clone(),
            participants: self.participants.clone(),
        });

        // A departing Player (or a promoted one) can complete the set of submissions.
        self.maybe_start_voting(tx);

        Ok(removed)
    }

    /// Drop a participant's buzz entry or vote from the current round.
    fn forget_in_round(&mut self, participant_id: &str) {
        match &mut self.round {
            ModeState::Buzzer(round) => round.forget(participant_id),
            ModeState::Type(_) => {}
            ModeState::Impostor(round) => round.forget(participant_id, &self.participants),
        }
    }

    /// Emit the current scores to the log.
    pub(crate) fn log_score_tally(&self, event: &str) {
        let scores: Vec<(String, u32, bool)> = self
            .participants
            .iter()
            .map(|p| (p.name.clone(), p.score, p.is_host))
            .collect();
        let total: u32 = self.participants.iter().map(|p| p.score).sum();
        let question = match &self.round {
            ModeState::Type(round) => round
                .current_index()
                .map(|i| format!("{}/{}", i + 1, round.questions().len())),
            _ => None,
        };

        tracing::info!(
            room = %self.code,
            event,
            mode = %self.mode(),
            state = %self.state,
            question = question.as_deref().unwrap_or("-"),
            scores = ?scores,
            total,
            "score tally"
        );
    }
}
