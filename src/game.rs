use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{broadcast, mpsc};

use crate::config::ImpostorLimits;
use crate::error::RoomError;
use crate::registry::{Registry, RoomHandle};
use crate::room::Room;
use crate::types::*;

/// Commands the WebSocket handler sends to a room task.
#[derive(Debug, Clone)]
pub enum RoomCommand {
    Join {
        connection_id: String,
        name: String,
        role: Option<Role>,
    },
    Leave {
        connection_id: String,
    },
    Buzz {
        connection_id: String,
        at: Instant,
    },
    ResetBuzzers {
        connection_id: String,
    },
    MarkAnswer {
        connection_id: String,
        participant_id: String,
        correct: bool,
    },
    StartGame {
        connection_id: String,
    },
    EndGame {
        connection_id: String,
    },
    NewGame {
        connection_id: String,
    },
    AddQuestion {
        connection_id: String,
        question: String,
        answer: String,
        answer_type: AnswerType,
    },
    UpdateQuestion {
        connection_id: String,
        question_id: u64,
        question: String,
        answer: String,
        answer_type: AnswerType,
    },
    DeleteQuestion {
        connection_id: String,
        question_id: u64,
    },
    ClearQuestions {
        connection_id: String,
    },
    StartQuestion {
        connection_id: String,
        index: usize,
    },
    SubmitAnswer {
        connection_id: String,
        answer: String,
    },
    StartRecording {
        connection_id: String,
    },
    SubmitVideo {
        connection_id: String,
        video_data: String,
        mime_type: String,
        duration_ms: u64,
    },
    SubmitVote {
        connection_id: String,
        video_id: String,
    },
    ShowResults {
        connection_id: String,
    },
    NewRound {
        connection_id: String,
    },
}

impl RoomCommand {
    /// Translate an in-room client message. `received_at` stamps buzzes.
    ///
    /// Returns `None` for create/join, which the socket handles itself.
    pub fn from_client(msg: ClientMsg, connection_id: &str, received_at: Instant) -> Option<(String, Self)> {
        let connection_id = connection_id.to_string();
        let pair = match msg {
            ClientMsg::CreateRoom { .. } | ClientMsg::JoinRoom { .. } => return None,
            ClientMsg::Buzz { room_code } => (room_code, Self::Buzz { connection_id, at: received_at }),
            ClientMsg::ResetBuzzers { room_code } => (room_code, Self::ResetBuzzers { connection_id }),
            ClientMsg::MarkAnswer { room_code, participant_id, correct } => {
                (room_code, Self::MarkAnswer { connection_id, participant_id, correct })
            }
            ClientMsg::StartGame { room_code } => (room_code, Self::StartGame { connection_id }),
            ClientMsg::EndGame { room_code } => (room_code, Self::EndGame { connection_id }),
            ClientMsg::NewGame { room_code } => (room_code, Self::NewGame { connection_id }),
            ClientMsg::AddQuestion { room_code, question, answer, answer_type } => {
                (room_code, Self::AddQuestion { connection_id, question, answer, answer_type })
            }
            ClientMsg::UpdateQuestion { room_code, question_id, question, answer, answer_type } => (
                room_code,
                Self::UpdateQuestion { connection_id, question_id, question, answer, answer_type },
            ),
            ClientMsg::DeleteQuestion { room_code, question_id } => {
                (room_code, Self::DeleteQuestion { connection_id, question_id })
            }
            ClientMsg::ClearQuestions { room_code } => (room_code, Self::ClearQuestions { connection_id }),
            ClientMsg::StartQuestion { room_code, question_index } => {
                (room_code, Self::StartQuestion { connection_id, index: question_index })
            }
            ClientMsg::SubmitAnswer { room_code, answer } => (room_code, Self::SubmitAnswer { connection_id, answer }),
            ClientMsg::StartRecording { room_code } => (room_code, Self::StartRecording { connection_id }),
            ClientMsg::SubmitVideo { room_code, video_data, mime_type, duration_ms } => (
                room_code,
                Self::SubmitVideo { connection_id, video_data, mime_type, duration_ms },
            ),
            ClientMsg::SubmitVote { room_code, video_id } => (room_code, Self::SubmitVote { connection_id, video_id }),
            ClientMsg::ShowResults { room_code } => (room_code, Self::ShowResults { connection_id }),
            ClientMsg::NewRound { room_code } => (room_code, Self::NewRound { connection_id }),
        };
        Some(pair)
    }

    pub fn connection_id(&self) -> &str {
        match self {
            Self::Join { connection_id, .. }
            | Self::Leave { connection_id }
            | Self::Buzz { connection_id, .. }
            | Self::ResetBuzzers { connection_id }
            | Self::MarkAnswer { connection_id, .. }
            | Self::StartGame { connection_id }
            | Self::EndGame { connection_id }
            | Self::NewGame { connection_id }
            | Self::AddQuestion { connection_id, .. }
            | Self::UpdateQuestion { connection_id, .. }
            | Self::DeleteQuestion { connection_id, .. }
            | Self::ClearQuestions { connection_id }
            | Self::StartQuestion { connection_id, .. }
            | Self::SubmitAnswer { connection_id, .. }
            | Self::StartRecording { connection_id }
            | Self::SubmitVideo { connection_id, .. }
            | Self::SubmitVote { connection_id, .. }
            | Self::ShowResults { connection_id }
            | Self::NewRound { connection_id } => connection_id,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Buzz { .. } => "buzz",
            Self::ResetBuzzers { .. } => "reset_buzzers",
            Self::MarkAnswer { .. } => "mark_answer",
            Self::StartGame { .. } => "start_game",
            Self::EndGame { .. } => "end_game",
            Self::NewGame { .. } => "new_game",
            Self::AddQuestion { .. } => "add_question",
            Self::UpdateQuestion { .. } => "update_question",
            Self::DeleteQuestion { .. } => "delete_question",
            Self::ClearQuestions { .. } => "clear_questions",
            Self::StartQuestion { .. } => "start_question",
            Self::SubmitAnswer { .. } => "submit_answer",
            Self::StartRecording { .. } => "start_recording",
            Self::SubmitVideo { .. } => "submit_video",
            Self::SubmitVote { .. } => "submit_vote",
            Self::ShowResults { .. } => "show_results",
            Self::NewRound { .. } => "new_round",
        }
    }
}

/// Events broadcast from a room to WebSocket connections.
#[derive(Debug, Clone)]
pub enum GameEvent {
    /// Send a message to a specific connection.
    SendTo { connection_id: String, msg: ServerMsg },
    /// Broadcast a message to every member of the room.
    Broadcast { msg: ServerMsg },
    /// Broadcast a message to every member except one.
    BroadcastExcept { exclude: String, msg: ServerMsg },
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Create a room hosted by `connection_id` and spawn its task.
pub fn create_room(
    registry: Arc<Registry>,
    connection_id: &str,
    name: &str,
    mode: RoomMode,
    limits: ImpostorLimits,
) -> Result<(RoomHandle, Participant), RoomError> {
    if registry.room_of(connection_id).is_some() {
        return Err(RoomError::AlreadyInRoom);
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);
    let handle = registry.create_room(mode, cmd_tx, event_tx.clone());

    if !registry.bind_connection(connection_id, &handle.code) {
        registry.delete_room(&handle.code);
        return Err(RoomError::AlreadyInRoom);
    }

    let host = Participant::new(connection_id.to_string(), name.to_string(), true, None);
    let room = Room::new(handle.code.clone(), mode, limits, host.clone());

    tokio::spawn(room_task(room, cmd_rx, event_tx, registry));

    tracing::info!("Room {} created by {} (mode {})", handle.code, name, mode);
    Ok((handle, host))
}

fn apply(
    room: &mut Room,
    tx: &broadcast::Sender<GameEvent>,
    registry: &Registry,
    cmd: RoomCommand,
) -> Result<(), RoomError> {
    match cmd {
        RoomCommand::Join { connection_id, name, role } => {
            if !registry.bind_connection(&connection_id, &room.code) {
                return Err(RoomError::AlreadyInRoom);
            }
            if let Err(err) = room.join(tx, &connection_id, &name, role) {
                registry.unbind_connection(&connection_id);
                return Err(err);
            }
            Ok(())
        }
        RoomCommand::Leave { connection_id } => {
            let result = room.leave(tx, &connection_id).map(|_| ());
            if result.is_ok() {
                registry.unbind_connection(&connection_id);
            }
            result
        }
        RoomCommand::Buzz { connection_id, at } => room.buzz(tx, &connection_id, at),
        RoomCommand::ResetBuzzers { connection_id } => room.reset_buzzers(tx, &connection_id),
        RoomCommand::MarkAnswer { connection_id, participant_id, correct } => {
            room.mark_answer(tx, &connection_id, &participant_id, correct)
        }
        RoomCommand::StartGame { connection_id } => room.start_game(tx, &connection_id),
        RoomCommand::EndGame { connection_id } => room.end_game(tx, &connection_id),
        RoomCommand::NewGame { connection_id } => room.new_game(tx, &connection_id),
        RoomCommand::AddQuestion { connection_id, question, answer, answer_type } => room
            .add_question(tx, &connection_id, &question, &answer, answer_type)
            .map(|_| ()),
        RoomCommand::UpdateQuestion { connection_id, question_id, question, answer, answer_type } => {
            room.update_question(tx, &connection_id, question_id, &question, &answer, answer_type)
        }
        RoomCommand::DeleteQuestion { connection_id, question_id } => {
            room.delete_question(tx, &connection_id, question_id)
        }
        RoomCommand::ClearQuestions { connection_id } => room.clear_questions(tx, &connection_id),
        RoomCommand::StartQuestion { connection_id, index } => room.start_question(tx, &connection_id, index),
        RoomCommand::SubmitAnswer { connection_id, answer } => {
            room.submit_answer(tx, &connection_id, &answer, unix_millis())
        }
        RoomCommand::StartRecording { connection_id } => room.start_recording(tx, &connection_id),
        RoomCommand::SubmitVideo { connection_id, video_data, mime_type, duration_ms } => {
            room.submit_video(tx, &connection_id, video_data, mime_type, duration_ms)
        }
        RoomCommand::SubmitVote { connection_id, video_id } => room.submit_vote(tx, &connection_id, &video_id),
        RoomCommand::ShowResults { connection_id } => room.show_results(tx, &connection_id),
        RoomCommand::NewRound { connection_id } => room.new_round(tx, &connection_id),
    }
}

fn reject(room: &Room, tx: &broadcast::Sender<GameEvent>, connection_id: &str, command: &str, err: RoomError) {
    if err.is_reported() {
        room.send_to(tx, connection_id, ServerMsg::RoomError {
            message: err.to_string(),
        });
    }
    tracing::debug!(room = %room.code, command, connection = connection_id, %err, "command rejected");
}

/// Runs one room: commands are applied strictly one after another.
async fn room_task(
    mut room: Room,
    mut cmd_rx: mpsc::Receiver<RoomCommand>,
    event_tx: broadcast::Sender<GameEvent>,
    registry: Arc<Registry>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let command = cmd.name();
        let connection_id = cmd.connection_id().to_string();
        if let Err(err) = apply(&mut room, &event_tx, &registry, cmd) {
            reject(&room, &event_tx, &connection_id, command, err);
        }
        if room.is_empty() {
            break;
        }
    }

    // Empty room: unregister first so no new command can reach this queue,
    // then answer joins that were already queued.
    registry.delete_room(&room.code);
    cmd_rx.close();
    while let Some(cmd) = cmd_rx.recv().await {
        if let RoomCommand::Join { connection_id, .. } = cmd {
            reject(&room, &event_tx, &connection_id, "join", RoomError::RoomNotFound);
        }
    }

    tracing::info!("Room {} deleted (empty)", room.code);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn next_for(rx: &mut broadcast::Receiver<GameEvent>, connection_id: &str) -> ServerMsg {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed");
            match event {
                GameEvent::SendTo { connection_id: target, msg } if target == connection_id => return msg,
                GameEvent::Broadcast { msg } => return msg,
                GameEvent::BroadcastExcept { exclude, msg } if exclude != connection_id => return msg,
                _ => continue,
            }
        }
    }

    async fn wait_until_gone(registry: &Registry, code: &str) {
        for _ in 0..100 {
            if registry.get_room(code).is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room {code} was never deleted");
    }

    #[tokio::test]
    async fn join_and_buzz_through_room_task() {
        let registry = Registry::new();
        let (handle, host) =
            create_room(registry.clone(), "alice", "Alice", RoomMode::Buzzer, ImpostorLimits::default()).unwrap();
        assert!(host.is_host);
        let mut rx = handle.event_tx.subscribe();

        handle
            .cmd_tx
            .send(RoomCommand::Join { connection_id: "bob".into(), name: "Bob".into(), role: None })
            .await
            .unwrap();
        assert!(matches!(next_for(&mut rx, "bob").await, ServerMsg::RoomJoined { .. }));
        assert_eq!(registry.room_of("bob").as_deref(), Some(handle.code.as_str()));

        let t0 = Instant::now();
        handle.cmd_tx.send(RoomCommand::StartGame { connection_id: "alice".into() }).await.unwrap();
        handle
            .cmd_tx
            .send(RoomCommand::Buzz { connection_id: "bob".into(), at: t0 })
            .await
            .unwrap();

        assert!(matches!(next_for(&mut rx, "bob").await, ServerMsg::BuzzersReset));
        assert!(matches!(next_for(&mut rx, "bob").await, ServerMsg::GameStarted { .. }));
        match next_for(&mut rx, "bob").await {
            ServerMsg::Buzzed { buzz_order, .. } => {
                assert_eq!(buzz_order[0].name, "Bob");
                assert_eq!(buzz_order[0].offset_ms, 0);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_name_is_reported_to_joiner() {
        let registry = Registry::new();
        let (handle, _) =
            create_room(registry.clone(), "alice", "Alice", RoomMode::Type, ImpostorLimits::default()).unwrap();
        let mut rx = handle.event_tx.subscribe();

        handle
            .cmd_tx
            .send(RoomCommand::Join { connection_id: "imposter".into(), name: "Alice".into(), role: None })
            .await
            .unwrap();

        match next_for(&mut rx, "imposter").await {
            ServerMsg::RoomError { message } => assert_eq!(message, "Name already taken in this room"),
            other => panic!("unexpected message {other:?}"),
        }
        assert!(registry.room_of("imposter").is_none());
    }

    #[tokio::test]
    async fn host_failover_and_teardown() {
        let registry = Registry::new();
        let (handle, _) =
            create_room(registry.clone(), "alice", "Alice", RoomMode::Buzzer, ImpostorLimits::default()).unwrap();
        let mut rx = handle.event_tx.subscribe();
        let code = handle.code.clone();

        handle
            .cmd_tx
            .send(RoomCommand::Join { connection_id: "bob".into(), name: "Bob".into(), role: None })
            .await
            .unwrap();
        handle.cmd_tx.send(RoomCommand::Leave { connection_id: "alice".into() }).await.unwrap();

        assert!(matches!(next_for(&mut rx, "bob").await, ServerMsg::RoomJoined { .. }));
        match next_for(&mut rx, "bob").await {
            ServerMsg::ParticipantLeft { participant_id, participants } => {
                assert_eq!(participant_id, "alice");
                assert_eq!(participants.len(), 1);
                assert!(participants[0].is_host);
                assert_eq!(participants[0].name, "Bob");
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(registry.room_of("alice").is_none());

        handle.cmd_tx.send(RoomCommand::Leave { connection_id: "bob".into() }).await.unwrap();
        wait_until_gone(&registry, &code).await;
        assert!(registry.room_of("bob").is_none());
        assert_eq!(registry.room_count(), 0);
    }

    #[tokio::test]
    async fn queued_join_after_teardown_is_answered() {
        let registry = Registry::new();
        let (handle, _) =
            create_room(registry.clone(), "alice", "Alice", RoomMode::Buzzer, ImpostorLimits::default()).unwrap();
        let mut rx = handle.event_tx.subscribe();

        handle.cmd_tx.send(RoomCommand::Leave { connection_id: "alice".into() }).await.unwrap();
        // May land before or after the queue closes; either way it must not hang.
        let queued = handle
            .cmd_tx
            .send(RoomCommand::Join { connection_id: "late".into(), name: "Late".into(), role: None })
            .await;

        if queued.is_ok() {
            match next_for(&mut rx, "late").await {
                ServerMsg::RoomError { message } => assert_eq!(message, "Room not found"),
                other => panic!("unexpected message {other:?}"),
            }
        }
        wait_until_gone(&registry, &handle.code).await;
        assert!(registry.room_of("late").is_none());
    }

    #[tokio::test]
    async fn connection_cannot_create_twice() {
        let registry = Registry::new();
        create_room(registry.clone(), "alice", "Alice", RoomMode::Buzzer, ImpostorLimits::default()).unwrap();
        let err = create_room(registry.clone(), "alice", "Alice", RoomMode::Type, ImpostorLimits::default())
            .err()
            .unwrap();
        assert_eq!(err, RoomError::AlreadyInRoom);
        assert_eq!(registry.room_count(), 1);
    }

    #[test]
    fn client_messages_map_to_commands() {
        let at = Instant::now();
        let (code, cmd) = RoomCommand::from_client(
            ClientMsg::Buzz { room_code: "123456".into() },
            "bob",
            at,
        )
        .unwrap();
        assert_eq!(code, "123456");
        assert!(matches!(cmd, RoomCommand::Buzz { at: stamped, .. } if stamped == at));
        assert_eq!(cmd.connection_id(), "bob");

        let join = ClientMsg::JoinRoom { room_code: "1".into(), player_name: "Bob".into(), role: None };
        assert!(RoomCommand::from_client(join, "bob", at).is_none());
    }
}
