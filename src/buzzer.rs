use std::time::Instant;

use tokio::sync::broadcast;

use crate::error::RoomError;
use crate::game::GameEvent;
use crate::room::{ModeState, Room};
use crate::types::*;

/// Buzz order for the current round.
///
/// `order` is kept sorted by timestamp; positions and offsets are
/// recomputed from scratch on every buzz.
#[derive(Debug, Default)]
pub struct BuzzerRound {
    order: Vec<BuzzEntry>,
    anchor: Option<Instant>,
    settled: bool,
}

impl BuzzerRound {
    #[cfg(test)]
    pub fn order(&self) -> &[BuzzEntry] {
        &self.order
    }

    #[cfg(test)]
    pub fn anchor(&self) -> Option<Instant> {
        self.anchor
    }

    fn clear(&mut self) {
        self.order.clear();
        self.anchor = None;
        self.settled = false;
    }

    fn record(&mut self, participant: &Participant, at: Instant) {
        self.order.push(BuzzEntry {
            participant_id: participant.id.clone(),
            name: participant.name.clone(),
            score: participant.score,
            position: 0,
            offset_ms: 0,
            marked: None,
            at,
        });
        self.renumber();
    }

    /// Stable sort keeps processing order for equal timestamps.
    fn renumber(&mut self) {
        self.order.sort_by_key(|e| e.at);
        self.anchor = self.order.first().map(|e| e.at);
        if let Some(anchor) = self.anchor {
            for (i, entry) in self.order.iter_mut().enumerate() {
                entry.position = i + 1;
                entry.offset_ms = entry.at.saturating_duration_since(anchor).as_millis() as u64;
            }
        }
    }

    /// Lowest position the host has not judged yet.
    fn next_unmarked(&self) -> Option<&BuzzEntry> {
        self.order.iter().find(|e| e.marked.is_none())
    }

    pub(crate) fn forget(&mut self, participant_id: &str) {
        let before = self.order.len();
        self.order.retain(|e| e.participant_id != participant_id);
        if self.order.len() != before {
            self.renumber();
        }
    }
}

impl Room {
    /// Record a buzz stamped at `at`.
    pub fn buzz(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        at: Instant,
    ) -> Result<(), RoomError> {
        let idx = self.position_of(connection_id)?;
        let mode = self.mode();
        let ModeState::Buzzer(round) = &mut self.round else {
            return Err(RoomError::WrongMode(mode));
        };

        let participant = &mut self.participants[idx];
        if participant.is_host {
            return Err(RoomError::RoleNotAllowed);
        }
        if participant.buzzed {
            return Err(RoomError::InvalidState(self.state));
        }

        participant.buzzed = true;
        participant.buzz_time = Some(at);
        round.record(participant, at);

        let participant = participant.clone();
        let buzz_order = round.order.clone();
        if let Some(entry) = buzz_order.iter().find(|e| e.participant_id == participant.id) {
            tracing::info!(
                room = %self.code,
                name = %participant.name,
                position = entry.position,
                offset_ms = entry.offset_ms,
                "buzzed"
            );
        }

        self.broadcast(tx, ServerMsg::Buzzed { participant, buzz_order });
        Ok(())
    }

    pub fn reset_buzzers(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        self.require_host(connection_id)?;
        if !matches!(self.round, ModeState::Buzzer(_)) {
            return Err(RoomError::WrongMode(self.mode()));
        }

        self.log_score_tally("buzzer reset");
        self.clear_buzzers();
        self.broadcast(tx, ServerMsg::BuzzersReset);
        tracing::info!(room = %self.code, "buzzers reset");
        Ok(())
    }

    /// Clear flags, timestamps, order and anchor without broadcasting.
    pub(crate) fn clear_buzzers(&mut self) {
        for p in &mut self.participants {
            p.buzzed = false;
            p.buzz_time = None;
        }
        if let ModeState::Buzzer(round) = &mut self.round {
            round.clear();
        }
    }

    /// Judge the buzz of `target_id`, which must be next in order.
    pub fn mark_answer(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        target_id: &str,
        correct: bool,
    ) -> Result<(), RoomError> {
        self.require_host(connection_id)?;
        let target_idx = self.position_of(target_id)?;
        let mode = self.mode();
        let ModeState::Buzzer(round) = &mut self.round else {
            return Err(RoomError::WrongMode(mode));
        };

        if round.settled {
            return Err(RoomError::InvalidState(self.state));
        }
        match round.next_unmarked() {
            Some(next) if next.participant_id == target_id => {}
            _ => return Err(RoomError::NotNextInOrder),
        }

        let target = &mut self.participants[target_idx];
        if correct && self.state == GameState::Active {
            target.score += 1;
        }

        for entry in round.order.iter_mut().filter(|e| e.participant_id == target_id) {
            entry.marked = Some(correct);
            entry.score = target.score;
        }
        if correct {
            round.settled = true;
        }

        tracing::info!(
            room = %self.code,
            name = %target.name,
            correct,
            score = target.score,
            "answer marked"
        );

        let participant = target.clone();
        let buzz_order = round.order.clone();
        self.broadcast(tx, ServerMsg::AnswerMarked {
            participant_id: target_id.to_string(),
            correct,
            participant,
            participants: self.participants.clone(),
            buzz_order,
        });
        Ok(())
    }
}
