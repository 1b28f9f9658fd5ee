use std::collections::HashMap;

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::RoomError;
use crate::game::GameEvent;
use crate::room::{ModeState, Room};
use crate::types::*;

/// An uploaded clip. The payload is passed through untouched.
#[derive(Debug, Clone)]
pub struct Video {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub video_data: String,
    pub mime_type: String,
}

impl Video {
    fn view(&self) -> VideoView {
        VideoView {
            id: self.id.clone(),
            participant_name: self.author_name.clone(),
            video_data: self.video_data.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// Videos, submissions and votes of the current impostor round.
#[derive(Debug, Default)]
pub struct ImpostorRound {
    videos: Vec<Video>,
    /// voter id -> video id
    votes: HashMap<String, String>,
    tally: Vec<VideoTally>,
}

impl ImpostorRound {
    #[cfg(test)]
    pub fn videos(&self) -> &[Video] {
        &self.videos
    }

    #[cfg(test)]
    pub fn tally(&self) -> &[VideoTally] {
        &self.tally
    }

    fn clear(&mut self) {
        self.videos.clear();
        self.votes.clear();
        self.tally.clear();
    }

    /// Rebuild the tally. Voter names follow join order.
    fn recount(&mut self, participants: &[Participant]) {
        let total = self.votes.len();
        self.tally = self
            .videos
            .iter()
            .map(|video| {
                let voters: Vec<String> = participants
                    .iter()
                    .filter(|p| self.votes.get(&p.id) == Some(&video.id))
                    .map(|p| p.name.clone())
                    .collect();
                let count = voters.len();
                let percentage = if total > 0 {
                    (count as f64 / total as f64 * 100.0).round() as u32
                } else {
                    0
                };
                VideoTally {
                    video_id: video.id.clone(),
                    count,
                    percentage,
                    voters,
                }
            })
            .collect();
    }

    /// Withdraw a participant's vote, if any, and recount.
    pub(crate) fn forget(&mut self, participant_id: &str, participants: &[Participant]) {
        if self.votes.remove(participant_id).is_some() {
            self.recount(participants);
        }
    }
}

impl Room {
    fn impostor_host(&mut self, connection_id: &str) -> Result<&mut ImpostorRound, RoomError> {
        self.require_host(connection_id)?;
        let mode = self.mode();
        match &mut self.round {
            ModeState::Impostor(round) => Ok(round),
            _ => Err(RoomError::WrongMode(mode)),
        }
    }

    pub fn start_recording(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        let state = self.state;
        let round = self.impostor_host(connection_id)?;
        if state != GameState::Waiting {
            return Err(RoomError::InvalidState(state));
        }
        round.videos.clear();
        self.state = GameState::Recording;

        tracing::info!(room = %self.code, "recording started");
        self.broadcast(tx, ServerMsg::RecordingStarted {
            state: self.state,
            max_duration_ms: self.limits.max_duration_ms,
        });
        Ok(())
    }

    /// Accept a Player's clip; the last expected clip opens voting.
    pub fn submit_video(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        video_data: String,
        mime_type: String,
        duration_ms: u64,
    ) -> Result<(), RoomError> {
        let idx = self.position_of(connection_id)?;
        let mode = self.mode();
        let ModeState::Impostor(round) = &mut self.round else {
            return Err(RoomError::WrongMode(mode));
        };
        if self.state != GameState::Recording {
            return Err(RoomError::InvalidState(self.state));
        }
        let author = &self.participants[idx];
        if author.role != Some(Role::Player) {
            return Err(RoomError::RoleNotAllowed);
        }
        if round.videos.iter().any(|v| v.author_id == connection_id) {
            return Err(RoomError::InvalidState(self.state));
        }
        if duration_ms > self.limits.max_duration_ms {
            return Err(RoomError::DurationExceeded {
                duration_ms,
                max_ms: self.limits.max_duration_ms,
            });
        }
        if round.videos.len() >= self.limits.max_videos {
            return Err(RoomError::CapacityExceeded {
                max: self.limits.max_videos,
            });
        }

        round.videos.push(Video {
            id: Uuid::new_v4().to_string(),
            author_id: author.id.clone(),
            author_name: author.name.clone(),
            video_data,
            mime_type,
        });
        let video_count = round.videos.len();
        let participant_name = author.name.clone();
        let total_players = self.player_count();

        tracing::info!(
            room = %self.code,
            name = %participant_name,
            video_count,
            total_players,
            "video submitted"
        );
        self.broadcast(tx, ServerMsg::VideoSubmissionCount {
            participant_name,
            video_count,
            total_players,
        });

        self.maybe_start_voting(tx);
        Ok(())
    }

    /// Move to voting once every current Player has a clip in.
    pub(crate) fn maybe_start_voting(&mut self, tx: &broadcast::Sender<GameEvent>) {
        if self.state != GameState::Recording {
            return;
        }
        let players = self.player_count();
        let ModeState::Impostor(round) = &self.round else {
            return;
        };
        if round.videos.is_empty() || round.videos.len() < players {
            return;
        }

        let videos: Vec<VideoView> = round.videos.iter().map(Video::view).collect();
        self.state = GameState::Voting;
        tracing::info!(room = %self.code, "voting started");
        self.broadcast(tx, ServerMsg::VotingStarted {
            state: self.state,
            videos,
        });
    }

    /// Record or replace a Voter's choice and publish the new tally.
    pub fn submit_vote(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        video_id: &str,
    ) -> Result<(), RoomError> {
        let idx = self.position_of(connection_id)?;
        let mode = self.mode();
        let ModeState::Impostor(round) = &mut self.round else {
            return Err(RoomError::WrongMode(mode));
        };
        if self.state != GameState::Voting {
            return Err(RoomError::InvalidState(self.state));
        }
        let voter = &self.participants[idx];
        if voter.is_host || voter.role != Some(Role::Voter) {
            return Err(RoomError::RoleNotAllowed);
        }
        if !round.videos.iter().any(|v| v.id == video_id) {
            return Err(RoomError::InvalidState(self.state));
        }

        round.votes.insert(connection_id.to_string(), video_id.to_string());
        round.recount(&self.participants);

        let voter_name = voter.name.clone();
        let tally = round.tally.clone();
        tracing::info!(room = %self.code, voter = %voter_name, video_id, "vote submitted");
        self.broadcast(tx, ServerMsg::VoteTallyUpdated {
            video_id: video_id.to_string(),
            voter_name,
            tally,
        });
        Ok(())
    }

    pub fn show_results(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        let state = self.state;
        let round = self.impostor_host(connection_id)?;
        if state != GameState::Voting {
            return Err(RoomError::InvalidState(state));
        }
        let tally = round.tally.clone();
        self.state = GameState::Results;

        tracing::info!(room = %self.code, "results shown");
        self.broadcast(tx, ServerMsg::ResultsShown {
            state: self.state,
            tally,
        });
        Ok(())
    }

    pub fn new_round(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        let round = self.impostor_host(connection_id)?;
        round.clear();
        self.state = GameState::Waiting;

        tracing::info!(room = %self.code, "new round");
        self.broadcast(tx, ServerMsg::RoundReset { state: self.state });
        Ok(())
    }
}
