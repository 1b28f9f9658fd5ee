use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Which game a room plays. Fixed at creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomMode {
    #[default]
    Buzzer,
    Type,
    Impostor,
}

impl std::fmt::Display for RoomMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buzzer => write!(f, "buzzer"),
            Self::Type => write!(f, "type"),
            Self::Impostor => write!(f, "impostor"),
        }
    }
}

/// Room-wide game state. Buzzer and type rooms use the first three,
/// impostor rooms cycle through the recording phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameState {
    #[default]
    Waiting,
    Active,
    Ended,
    Recording,
    Voting,
    Results,
}

impl std::fmt::Display for GameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
            Self::Recording => write!(f, "recording"),
            Self::Voting => write!(f, "voting"),
            Self::Results => write!(f, "results"),
        }
    }
}

/// Impostor-mode role. The host has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Player,
    Voter,
}

/// How a type-mode submission is compared with the canonical answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerType {
    #[default]
    Text,
    Amount,
}

/// A member of a room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub is_host: bool,
    pub score: u32,
    pub buzzed: bool,
    #[serde(skip)]
    pub buzz_time: Option<Instant>,
    pub answered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Participant {
    pub fn new(id: String, name: String, is_host: bool, role: Option<Role>) -> Self {
        Self {
            id,
            name,
            is_host,
            score: 0,
            buzzed: false,
            buzz_time: None,
            answered: false,
            role,
        }
    }
}

/// One row of the buzz order.
#[derive(Debug, Clone, Serialize)]
pub struct BuzzEntry {
    pub participant_id: String,
    pub name: String,
    pub score: u32,
    pub position: usize,
    pub offset_ms: u64,
    /// `None` until the host judges this buzz.
    pub marked: Option<bool>,
    #[serde(skip)]
    pub at: Instant,
}

/// A type-mode question as the host authored it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Question {
    pub id: u64,
    pub question: String,
    pub answer: String,
    pub answer_type: AnswerType,
}

/// The public face of the live question: never carries the answer.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub question: String,
    pub question_index: usize,
    pub answer_type: AnswerType,
    pub total_questions: usize,
}

/// One line of the type-mode answer feed.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerEntry {
    pub id: u64,
    pub participant_id: String,
    pub participant_name: String,
    pub answer: String,
    pub is_correct: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionsAction {
    Added,
    Updated,
    Deleted,
    Cleared,
}

/// A submitted video as shown to voters.
#[derive(Debug, Clone, Serialize)]
pub struct VideoView {
    pub id: String,
    pub participant_name: String,
    pub video_data: String,
    pub mime_type: String,
}

/// Vote totals for one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoTally {
    pub video_id: String,
    pub count: usize,
    pub percentage: u32,
    pub voters: Vec<String>,
}

/// Messages sent from server to clients via WebSocket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    // Membership
    RoomCreated {
        room_code: String,
        participant: Participant,
        state: GameState,
        mode: RoomMode,
    },
    RoomJoined {
        room_code: String,
        participant: Participant,
        participants: Vec<Participant>,
        state: GameState,
        mode: RoomMode,
        #[serde(skip_serializing_if = "Option::is_none")]
        question: Option<QuestionView>,
        answer_log: Vec<AnswerEntry>,
    },
    RoomError {
        message: String,
    },
    ParticipantJoined {
        participant: Participant,
    },
    ParticipantLeft {
        participant_id: String,
        participants: Vec<Participant>,
    },

    // Buzzer
    Buzzed {
        participant: Participant,
        buzz_order: Vec<BuzzEntry>,
    },
    BuzzersReset,
    AnswerMarked {
        participant_id: String,
        correct: bool,
        participant: Participant,
        participants: Vec<Participant>,
        buzz_order: Vec<BuzzEntry>,
    },

    // Type answer
    QuestionsChanged {
        action: QuestionsAction,
        questions: Vec<Question>,
    },
    QuestionStarted {
        question: QuestionView,
        answer_log: Vec<AnswerEntry>,
    },
    AnswerAttempt {
        entry: AnswerEntry,
        answer_log: Vec<AnswerEntry>,
    },
    AnswerCorrect {
        participant: Participant,
        answer: String,
        correct_answer: String,
        participants: Vec<Participant>,
        answer_log: Vec<AnswerEntry>,
    },
    AnswerIncorrect {
        answer: String,
    },

    // Session
    GameStarted {
        state: GameState,
    },
    GameEnded {
        state: GameState,
        podium: Vec<Participant>,
    },
    GameReset {
        state: GameState,
        participants: Vec<Participant>,
    },

    // Impostor
    RecordingStarted {
        state: GameState,
        max_duration_ms: u64,
    },
    VideoSubmissionCount {
        participant_name: String,
        video_count: usize,
        total_players: usize,
    },
    VotingStarted {
        state: GameState,
        videos: Vec<VideoView>,
    },
    VoteTallyUpdated {
        video_id: String,
        voter_name: String,
        tally: Vec<VideoTally>,
    },
    ResultsShown {
        state: GameState,
        tally: Vec<VideoTally>,
    },
    RoundReset {
        state: GameState,
    },
}

/// Messages sent from clients to server via WebSocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    // Membership
    CreateRoom {
        player_name: String,
        #[serde(default)]
        mode: RoomMode,
    },
    JoinRoom {
        room_code: String,
        player_name: String,
        #[serde(default)]
        role: Option<Role>,
    },

    // Buzzer
    Buzz { room_code: String },
    ResetBuzzers { room_code: String },
    MarkAnswer { room_code: String, participant_id: String, correct: bool },

    // Session
    StartGame { room_code: String },
    EndGame { room_code: String },
    NewGame { room_code: String },

    // Type answer
    AddQuestion {
        room_code: String,
        question: String,
        answer: String,
        #[serde(default)]
        answer_type: AnswerType,
    },
    UpdateQuestion {
        room_code: String,
        question_id: u64,
        question: String,
        answer: String,
        #[serde(default)]
        answer_type: AnswerType,
    },
    DeleteQuestion { room_code: String, question_id: u64 },
    ClearQuestions { room_code: String },
    StartQuestion { room_code: String, question_index: usize },
    SubmitAnswer { room_code: String, answer: String },

    // Impostor
    StartRecording { room_code: String },
    SubmitVideo {
        room_code: String,
        video_data: String,
        mime_type: String,
        duration_ms: u64,
    },
    SubmitVote { room_code: String, video_id: String },
    ShowResults { room_code: String },
    NewRound { room_code: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_parse_from_tagged_json() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"join_room","room_code":"123456","player_name":"Bob","role":"Player"}"#,
        )
        .unwrap();
        match msg {
            ClientMsg::JoinRoom { room_code, player_name, role } => {
                assert_eq!(room_code, "123456");
                assert_eq!(player_name, "Bob");
                assert_eq!(role, Some(Role::Player));
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn create_room_defaults_to_buzzer() {
        let msg: ClientMsg = serde_json::from_str(r#"{"type":"create_room","player_name":"Alice"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::CreateRoom { mode: RoomMode::Buzzer, .. }));
    }

    #[test]
    fn add_question_defaults_to_text() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"type":"add_question","room_code":"1","question":"Q","answer":"A"}"#,
        )
        .unwrap();
        assert!(matches!(msg, ClientMsg::AddQuestion { answer_type: AnswerType::Text, .. }));
    }

    #[test]
    fn server_messages_are_tagged_in_snake_case() {
        let json = serde_json::to_value(ServerMsg::BuzzersReset).unwrap();
        assert_eq!(json["type"], "buzzers_reset");

        let json = serde_json::to_value(ServerMsg::GameStarted { state: GameState::Active }).unwrap();
        assert_eq!(json["type"], "game_started");
        assert_eq!(json["state"], "active");
    }

    #[test]
    fn host_serializes_without_role() {
        let host = Participant::new("c1".into(), "Alice".into(), true, None);
        let json = serde_json::to_value(&host).unwrap();
        assert!(json.get("role").is_none());
        assert!(json.get("buzz_time").is_none());
    }
}
