use tokio::sync::broadcast;

use crate::error::RoomError;
use crate::game::GameEvent;
use crate::room::{ModeState, Room};
use crate::types::*;

/// Where the room is within the current question.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QuestionCycle {
    #[default]
    Idle,
    /// Accepting answers. Holds its own copy of the question.
    Live { index: usize, question: Question },
    /// Someone answered correctly; waiting for the host to move on.
    Settled { index: usize },
}

/// Question bank and answer feed of a type-mode room.
#[derive(Debug, Default)]
pub struct TypeRound {
    questions: Vec<Question>,
    next_question_id: u64,
    cycle: QuestionCycle,
    answer_log: Vec<AnswerEntry>,
    next_entry_id: u64,
}

impl TypeRound {
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    #[cfg(test)]
    pub fn cycle(&self) -> &QuestionCycle {
        &self.cycle
    }

    pub fn answer_log(&self) -> &[AnswerEntry] {
        &self.answer_log
    }

    pub fn current_index(&self) -> Option<usize> {
        match self.cycle {
            QuestionCycle::Idle => None,
            QuestionCycle::Live { index, .. } | QuestionCycle::Settled { index } => Some(index),
        }
    }

    /// The live question as non-hosts may see it.
    pub fn live_view(&self) -> Option<QuestionView> {
        match &self.cycle {
            QuestionCycle::Live { index, question } => Some(QuestionView {
                question: question.question.clone(),
                question_index: *index,
                answer_type: question.answer_type,
                total_questions: self.questions.len(),
            }),
            _ => None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cycle = QuestionCycle::Idle;
        self.answer_log.clear();
    }
}

/// Split a canonical answer into its accepted variants.
///
/// `/` takes precedence over `" or "`.
pub fn accepted_answers(canonical: &str) -> Vec<String> {
    let parts: Vec<&str> = if canonical.contains('/') {
        canonical.split('/').collect()
    } else if canonical.contains(" or ") {
        canonical.split(" or ").collect()
    } else {
        vec![canonical]
    };
    parts.into_iter().map(|p| p.trim().to_string()).collect()
}

/// Read the longest numeric prefix of `s`, so "34.5 kg" reads as 34.5.
///
/// Leading whitespace is skipped and anything after the number is ignored.
fn leading_number(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits = |from: usize| bytes[from.min(bytes.len())..].iter().take_while(|b| b.is_ascii_digit()).count();

    let mut end = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int = digits(end);
    end += int;
    let mut frac = 0;
    if bytes.get(end) == Some(&b'.') {
        frac = digits(end + 1);
        end += 1 + frac;
    }
    if int == 0 && frac == 0 {
        return None;
    }

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let sign = usize::from(matches!(bytes.get(end + 1), Some(b'+' | b'-')));
        let exp = digits(end + 1 + sign);
        if exp > 0 {
            end += 1 + sign + exp;
        }
    }
    s[..end].parse().ok()
}

/// Judge a normalized submission against a canonical answer.
pub fn is_correct(canonical: &str, answer_type: AnswerType, submission: &str) -> bool {
    let accepted = accepted_answers(canonical);
    match answer_type {
        AnswerType::Amount => {
            let Some(submitted) = leading_number(submission) else {
                return false;
            };
            accepted
                .iter()
                .filter_map(|a| leading_number(a))
                .any(|valid| valid == submitted)
        }
        AnswerType::Text => accepted.iter().any(|a| a == submission),
    }
}

fn normalize(answer: &str) -> String {
    answer.trim().to_lowercase()
}

impl Room {
    /// Host-only access to the bank, outside an active game.
    fn bank_mut(&mut self, connection_id: &str) -> Result<&mut TypeRound, RoomError> {
        self.require_host(connection_id)?;
        let mode = self.mode();
        if self.state == GameState::Active {
            return Err(RoomError::InvalidState(self.state));
        }
        match &mut self.round {
            ModeState::Type(round) => Ok(round),
            _ => Err(RoomError::WrongMode(mode)),
        }
    }

    fn send_questions(
        &self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        action: QuestionsAction,
    ) {
        if let ModeState::Type(round) = &self.round {
            self.send_to(tx, connection_id, ServerMsg::QuestionsChanged {
                action,
                questions: round.questions.clone(),
            });
        }
    }

    pub fn add_question(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        question: &str,
        answer: &str,
        answer_type: AnswerType,
    ) -> Result<u64, RoomError> {
        let round = self.bank_mut(connection_id)?;
        round.next_question_id += 1;
        let id = round.next_question_id;
        round.questions.push(Question {
            id,
            question: question.trim().to_string(),
            answer: normalize(answer),
            answer_type,
        });

        tracing::info!(room = %self.code, id, question = question.trim(), "question added");
        self.send_questions(tx, connection_id, QuestionsAction::Added);
        Ok(id)
    }

    pub fn update_question(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        question_id: u64,
        question: &str,
        answer: &str,
        answer_type: AnswerType,
    ) -> Result<(), RoomError> {
        let round = self.bank_mut(connection_id)?;
        let Some(existing) = round.questions.iter_mut().find(|q| q.id == question_id) else {
            return Ok(());
        };
        existing.question = question.trim().to_string();
        existing.answer = normalize(answer);
        existing.answer_type = answer_type;

        tracing::info!(room = %self.code, id = question_id, "question updated");
        self.send_questions(tx, connection_id, QuestionsAction::Updated);
        Ok(())
    }

    pub fn delete_question(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        question_id: u64,
    ) -> Result<(), RoomError> {
        let round = self.bank_mut(connection_id)?;
        let before = round.questions.len();
        round.questions.retain(|q| q.id != question_id);
        if round.questions.len() == before {
            return Ok(());
        }

        tracing::info!(room = %self.code, id = question_id, "question deleted");
        self.send_questions(tx, connection_id, QuestionsAction::Deleted);
        Ok(())
    }

    pub fn clear_questions(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
    ) -> Result<(), RoomError> {
        let round = self.bank_mut(connection_id)?;
        round.questions.clear();

        tracing::info!(room = %self.code, "questions cleared");
        self.send_questions(tx, connection_id, QuestionsAction::Cleared);
        Ok(())
    }

    /// Put question `index` live for everyone.
    pub fn start_question(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        index: usize,
    ) -> Result<(), RoomError> {
        self.require_host(connection_id)?;
        let mode = self.mode();
        let ModeState::Type(round) = &self.round else {
            return Err(RoomError::WrongMode(mode));
        };
        let len = round.questions.len();
        if index >= len {
            return Err(RoomError::OutOfRange { index, len });
        }
        if index > 0 || round.current_index().is_some() {
            self.log_score_tally(&format!("starting question {}", index + 1));
        }

        for p in &mut self.participants {
            p.answered = false;
        }
        let ModeState::Type(round) = &mut self.round else {
            return Err(RoomError::WrongMode(mode));
        };
        round.cycle = QuestionCycle::Live {
            index,
            question: round.questions[index].clone(),
        };
        round.answer_log.clear();

        let Some(question) = round.live_view() else {
            return Ok(());
        };
        tracing::info!(room = %self.code, question = index + 1, total = len, "question started");
        self.broadcast(tx, ServerMsg::QuestionStarted {
            question,
            answer_log: Vec::new(),
        });
        Ok(())
    }

    /// Judge a submission against the live question.
    pub fn submit_answer(
        &mut self,
        tx: &broadcast::Sender<GameEvent>,
        connection_id: &str,
        raw_answer: &str,
        timestamp: u64,
    ) -> Result<(), RoomError> {
        let idx = self.position_of(connection_id)?;
        let mode = self.mode();
        let ModeState::Type(round) = &mut self.round else {
            return Err(RoomError::WrongMode(mode));
        };
        let QuestionCycle::Live { index, question } = &round.cycle else {
            return Err(RoomError::InvalidState(self.state));
        };
        let participant = &mut self.participants[idx];

        let submitted = normalize(raw_answer);
        let correct = is_correct(&question.answer, question.answer_type, &submitted);
        let correct_answer = question.answer.clone();
        let index = *index;

        round.next_entry_id += 1;
        let entry = AnswerEntry {
            id: round.next_entry_id,
            participant_id: participant.id.clone(),
            participant_name: participant.name.clone(),
            answer: raw_answer.trim().to_string(),
            is_correct: correct,
            timestamp,
        };
        round.answer_log.push(entry.clone());
        let answer_log = round.answer_log.clone();

        if correct {
            if self.state == GameState::Active {
                participant.score += 1;
            }
            participant.answered = true;
            round.cycle = QuestionCycle::Settled { index };
        }
        let participant = participant.clone();

        self.broadcast(tx, ServerMsg::AnswerAttempt {
            entry,
            answer_log: answer_log.clone(),
        });

        if correct {
            tracing::info!(room = %self.code, name = %participant.name, answer = %submitted, "correct answer");
            self.broadcast(tx, ServerMsg::AnswerCorrect {
                participant,
                answer: submitted,
                correct_answer,
                participants: self.participants.clone(),
                answer_log,
            });
        } else {
            tracing::debug!(room = %self.code, name = %participant.name, answer = %submitted, "incorrect answer");
            self.send_to(tx, connection_id, ServerMsg::AnswerIncorrect { answer: submitted });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::tests::{drain, room_with_host};

    fn type_room() -> (Room, broadcast::Sender<GameEvent>, broadcast::Receiver<GameEvent>) {
        let (mut room, tx, mut rx) = room_with_host(RoomMode::Type);
        room.join(&tx, "bob", "Bob", None).unwrap();
        room.join(&tx, "carol", "Carol", None).unwrap();
        drain(&mut rx);
        (room, tx, rx)
    }

    fn round(room: &Room) -> &TypeRound {
        match &room.round {
            ModeState::Type(round) => round,
            _ => panic!("not a type room"),
        }
    }

    #[test]
    fn amount_answers_compare_numerically() {
        assert!(is_correct("34.50", AnswerType::Amount, "34.5"));
        assert!(!is_correct("34.50", AnswerType::Text, "34.5"));
        assert!(!is_correct("34.50", AnswerType::Amount, "thirty"));
        assert!(is_correct("10/ten", AnswerType::Amount, "10.0"));
    }

    #[test]
    fn amount_answers_ignore_trailing_units() {
        assert!(is_correct("34.5 kg", AnswerType::Amount, "34.5"));
        assert!(is_correct("34.50", AnswerType::Amount, "34.5kg"));
        assert!(is_correct("1000", AnswerType::Amount, " 1e3 euros"));
        assert!(is_correct("-2", AnswerType::Amount, "-2.0 degrees"));
        assert!(!is_correct("34.5", AnswerType::Amount, "kg 34.5"));
        assert!(!is_correct("5", AnswerType::Amount, "."));
    }

    #[test]
    fn leading_number_reads_numeric_prefix() {
        assert_eq!(leading_number("12abc"), Some(12.0));
        assert_eq!(leading_number(".5"), Some(0.5));
        assert_eq!(leading_number("7."), Some(7.0));
        assert_eq!(leading_number("3e"), Some(3.0));
        assert_eq!(leading_number("2e-1x"), Some(0.2));
        assert_eq!(leading_number("-"), None);
        assert_eq!(leading_number(""), None);
    }

    #[test]
    fn variants_split_on_slash_or_or() {
        assert_eq!(accepted_answers("red/crimson"), vec!["red", "crimson"]);
        assert_eq!(accepted_answers("red or crimson"), vec!["red", "crimson"]);
        assert_eq!(accepted_answers("rock and roll"), vec!["rock and roll"]);
        assert!(is_correct("red/crimson", AnswerType::Text, "crimson"));
        assert!(is_correct("paris or lutetia", AnswerType::Text, "lutetia"));
    }

    #[test]
    fn bank_edits_are_sent_to_host_only() {
        let (mut room, tx, mut rx) = type_room();
        let id = room
            .add_question(&tx, "alice", "  Capital of France? ", " Paris ", AnswerType::Text)
            .unwrap();

        let q = &round(&room).questions()[0];
        assert_eq!(q.id, id);
        assert_eq!(q.question, "Capital of France?");
        assert_eq!(q.answer, "paris");

        match drain(&mut rx).as_slice() {
            [GameEvent::SendTo { connection_id, msg: ServerMsg::QuestionsChanged { action, questions } }] => {
                assert_eq!(connection_id, "alice");
                assert_eq!(*action, QuestionsAction::Added);
                assert_eq!(questions.len(), 1);
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn update_delete_and_clear() {
        let (mut room, tx, _rx) = type_room();
        let a = room.add_question(&tx, "alice", "A?", "a", AnswerType::Text).unwrap();
        let b = room.add_question(&tx, "alice", "B?", "b", AnswerType::Text).unwrap();
        assert_ne!(a, b);

        room.update_question(&tx, "alice", b, "B2?", "B2", AnswerType::Amount).unwrap();
        let updated = &round(&room).questions()[1];
        assert_eq!(updated.question, "B2?");
        assert_eq!(updated.answer, "b2");
        assert_eq!(updated.answer_type, AnswerType::Amount);

        room.delete_question(&tx, "alice", a).unwrap();
        assert_eq!(round(&room).questions().len(), 1);

        room.clear_questions(&tx, "alice").unwrap();
        assert!(round(&room).questions().is_empty());
    }

    #[test]
    fn bank_is_frozen_during_active_game() {
        let (mut room, tx, _rx) = type_room();
        let id = room.add_question(&tx, "alice", "A?", "a", AnswerType::Text).unwrap();
        room.state = GameState::Active;

        assert!(room.add_question(&tx, "alice", "B?", "b", AnswerType::Text).is_err());
        assert!(room.update_question(&tx, "alice", id, "X", "x", AnswerType::Text).is_err());
        assert!(room.delete_question(&tx, "alice", id).is_err());
        assert!(room.clear_questions(&tx, "alice").is_err());
        assert_eq!(round(&room).questions()[0].answer, "a");
    }

    #[test]
    fn bank_is_host_only() {
        let (mut room, tx, _rx) = type_room();
        assert_eq!(
            room.add_question(&tx, "bob", "A?", "a", AnswerType::Text),
            Err(RoomError::NotHost)
        );
    }

    #[test]
    fn start_question_hides_answer_and_checks_range() {
        let (mut room, tx, mut rx) = type_room();
        room.add_question(&tx, "alice", "Colour?", "red/crimson", AnswerType::Text).unwrap();
        drain(&mut rx);

        assert_eq!(
            room.start_question(&tx, "alice", 1),
            Err(RoomError::OutOfRange { index: 1, len: 1 })
        );
        assert_eq!(room.start_question(&tx, "bob", 0), Err(RoomError::NotHost));

        room.start_question(&tx, "alice", 0).unwrap();
        let events = drain(&mut rx);
        match events.as_slice() {
            [GameEvent::Broadcast { msg }] => {
                let json = serde_json::to_string(msg).unwrap();
                assert!(json.contains("Colour?"));
                assert!(!json.contains("crimson"));
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn correct_answer_scores_and_settles() {
        let (mut room, tx, mut rx) = type_room();
        room.add_question(&tx, "alice", "Colour?", "red/crimson", AnswerType::Text).unwrap();
        room.state = GameState::Active;
        room.start_question(&tx, "alice", 0).unwrap();
        drain(&mut rx);

        room.submit_answer(&tx, "bob", "  Crimson ", 1).unwrap();
        assert_eq!(room.participant("bob").unwrap().score, 1);
        assert!(room.participant("bob").unwrap().answered);
        assert_eq!(round(&room).cycle(), &QuestionCycle::Settled { index: 0 });

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            GameEvent::Broadcast { msg: ServerMsg::AnswerAttempt { entry, answer_log } } => {
                assert_eq!(entry.answer, "Crimson");
                assert!(entry.is_correct);
                assert_eq!(answer_log.len(), 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[1] {
            GameEvent::Broadcast { msg: ServerMsg::AnswerCorrect { answer, correct_answer, .. } } => {
                assert_eq!(answer, "crimson");
                assert_eq!(correct_answer, "red/crimson");
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Round is over: late answers are ignored.
        assert!(room.submit_answer(&tx, "carol", "red", 2).is_err());
        assert_eq!(room.participant("carol").unwrap().score, 0);
    }

    #[test]
    fn incorrect_answer_is_private_and_retryable() {
        let (mut room, tx, mut rx) = type_room();
        room.add_question(&tx, "alice", "Price?", "34.50", AnswerType::Amount).unwrap();
        room.state = GameState::Active;
        room.start_question(&tx, "alice", 0).unwrap();
        drain(&mut rx);

        room.submit_answer(&tx, "bob", "30", 1).unwrap();
        let events = drain(&mut rx);
        assert!(matches!(&events[0], GameEvent::Broadcast { msg: ServerMsg::AnswerAttempt { .. } }));
        match &events[1] {
            GameEvent::SendTo { connection_id, msg: ServerMsg::AnswerIncorrect { answer } } => {
                assert_eq!(connection_id, "bob");
                assert_eq!(answer, "30");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!room.participant("bob").unwrap().answered);

        room.submit_answer(&tx, "bob", "34.5", 2).unwrap();
        assert_eq!(room.participant("bob").unwrap().score, 1);
        assert_eq!(round(&room).answer_log().len(), 2);
    }

    #[test]
    fn practice_rounds_do_not_score() {
        let (mut room, tx, _rx) = type_room();
        room.add_question(&tx, "alice", "Q", "a", AnswerType::Text).unwrap();
        room.start_question(&tx, "alice", 0).unwrap();

        room.submit_answer(&tx, "bob", "A", 1).unwrap();
        assert_eq!(room.participant("bob").unwrap().score, 0);
        assert!(matches!(round(&room).cycle(), QuestionCycle::Settled { .. }));
    }

    #[test]
    fn answers_without_live_question_are_ignored() {
        let (mut room, tx, mut rx) = type_room();
        assert!(room.submit_answer(&tx, "bob", "anything", 1).is_err());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn host_answers_like_any_member() {
        let (mut room, tx, mut rx) = type_room();
        room.add_question(&tx, "alice", "Q", "a", AnswerType::Text).unwrap();
        room.start_question(&tx, "alice", 0).unwrap();
        drain(&mut rx);

        room.submit_answer(&tx, "alice", "A", 1).unwrap();
        assert_eq!(round(&room).cycle(), &QuestionCycle::Settled { index: 0 });
        let events = drain(&mut rx);
        assert!(matches!(&events[0], GameEvent::Broadcast { msg: ServerMsg::AnswerAttempt { .. } }));
        assert!(matches!(&events[1], GameEvent::Broadcast { msg: ServerMsg::AnswerCorrect { .. } }));
    }

    #[test]
    fn next_question_resets_log_and_flags() {
        let (mut room, tx, _rx) = type_room();
        room.add_question(&tx, "alice", "Q1", "a", AnswerType::Text).unwrap();
        room.add_question(&tx, "alice", "Q2", "b", AnswerType::Text).unwrap();
        room.start_question(&tx, "alice", 0).unwrap();
        room.submit_answer(&tx, "bob", "a", 1).unwrap();

        let next = round(&room).current_index().unwrap() + 1;
        room.start_question(&tx, "alice", next).unwrap();

        assert!(round(&room).answer_log().is_empty());
        assert!(room.participants.iter().all(|p| !p.answered));
        assert_eq!(round(&room).live_view().unwrap().question_index, 1);
    }

    #[test]
    fn late_joiner_sees_live_question() {
        let (mut room, tx, mut rx) = type_room();
        room.add_question(&tx, "alice", "Q1", "secret", AnswerType::Text).unwrap();
        room.start_question(&tx, "alice", 0).unwrap();
        drain(&mut rx);

        room.join(&tx, "dave", "Dave", None).unwrap();
        match &drain(&mut rx)[0] {
            GameEvent::SendTo { msg: msg @ ServerMsg::RoomJoined { question: Some(view), .. }, .. } => {
                assert_eq!(view.question, "Q1");
                assert!(!serde_json::to_string(msg).unwrap().contains("secret"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
