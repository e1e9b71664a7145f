use crate::session::SessionContext;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const PROTOCOL_VERSION: &str = "1.0";

// ========== Broadcast bus events ==========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    Start,
    Stop,
}

/// Host-driven countdown signal.
///
/// `started_at_epoch_millis` doubles as the window signature: every start in a
/// game carries a new one, and a stop repeats the signature it cancels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerEvent {
    pub kind: TimerKind,
    pub duration_seconds: u32,
    pub started_at_epoch_millis: i64,
}

impl TimerEvent {
    pub fn start(duration_seconds: u32, started_at_epoch_millis: i64) -> Self {
        Self {
            kind: TimerKind::Start,
            duration_seconds,
            started_at_epoch_millis,
        }
    }

    pub fn stop(signature: i64) -> Self {
        Self {
            kind: TimerKind::Stop,
            duration_seconds: 0,
            started_at_epoch_millis: signature,
        }
    }

    /// Wall-clock millisecond at which the window closes
    pub fn end_at(&self) -> i64 {
        self.started_at_epoch_millis + i64::from(self.duration_seconds) * 1000
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoundFinishedEvent {
    pub round: RoundKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

/// Peer-audio handshake message, relayed to every subscriber of the game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEnvelope {
    pub from: PlayerId,
    pub to: PlayerId,
    pub kind: SignalKind,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MicStatusEvent {
    pub player_id: PlayerId,
    pub is_on: bool,
}

/// Players with at least one open connection, in join order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceEvent {
    pub connected: Vec<PlayerId>,
}

/// Everything that travels on a game's broadcast channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum SessionEvent {
    Timer(TimerEvent),
    RoundFinished(RoundFinishedEvent),
    Signal(SignalEnvelope),
    MicStatus(MicStatusEvent),
    Presence(PresenceEvent),
}

// ========== WebSocket wire ==========

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a game and join it as its host
    CreateGame {
        host_name: String,
        #[serde(default)]
        intro_videos: HashMap<RoundKind, String>,
    },
    Join {
        code: String,
        name: String,
        #[serde(default)]
        is_host: bool,
        avatar: Option<AvatarRef>,
    },
    /// Pick an earlier identity back up after a reload or dropped connection
    Resume {
        token: String,
    },
    ReserveAvatar {
        avatar: AvatarRef,
    },
    SubmitAnswer {
        question_id: QuestionId,
        text: String,
        response_time: Option<f64>,
    },
    /// Ask for a fresh snapshot (polling fallback)
    RequestState,
    GetQuestions {
        round: RoundKind,
    },
    GetScoreboard,
    Signal {
        to: PlayerId,
        kind: SignalKind,
        payload: serde_json::Value,
    },
    MicStatus {
        is_on: bool,
    },
    // Host-only messages
    HostStartGame,
    HostAdvanceRound {
        from_round: RoundKind,
    },
    HostFinishGame,
    HostEndRound,
    HostStartTimer {
        duration_seconds: u32,
    },
    HostStopTimer,
    HostAddQuestion {
        round: RoundKind,
        text: String,
        correct_answer: String,
        points: u32,
        order_index: u32,
        #[serde(rename = "type", default = "default_question_type")]
        kind: QuestionType,
        options: Option<Vec<String>>,
        hint: Option<String>,
        media_url: Option<String>,
    },
    HostSetIntroVideo {
        round: RoundKind,
        url: String,
    },
    HostAwardPoints {
        player_id: PlayerId,
        delta: i64,
    },
}

fn default_question_type() -> QuestionType {
    QuestionType::Normal
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: String,
    },
    /// Sent to the joining client with the identity it must use from now on.
    /// `token` is what the client sends in `Resume` after a reconnect.
    Joined {
        context: SessionContext,
        game: Game,
        token: String,
    },
    GameState {
        game: Game,
        players: Vec<Player>,
        taken_avatars: Vec<AvatarRef>,
        connected: Vec<PlayerId>,
    },
    Scoreboard {
        entries: Vec<ScoreEntry>,
    },
    /// Contestant view of a round's questions (no answers)
    Questions {
        round: RoundKind,
        list: Vec<QuestionInfo>,
    },
    /// Host view of a round's questions
    HostQuestions {
        round: RoundKind,
        list: Vec<Question>,
    },
    AnswerResult {
        answer: Answer,
        overwritten: bool,
        score: i64,
    },
    AvatarReserved {
        player: Player,
    },
    Event {
        event: SessionEvent,
    },
    Error {
        code: String,
        msg: String,
    },
}

impl From<&crate::error::SessionError> for ServerMessage {
    fn from(e: &crate::error::SessionError) -> Self {
        ServerMessage::Error {
            code: e.code().to_string(),
            msg: e.to_string(),
        }
    }
}

/// Public question info (no correct answer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionInfo {
    pub id: QuestionId,
    pub round: RoundKind,
    pub text: String,
    pub points: u32,
    pub order_index: u32,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

impl From<&Question> for QuestionInfo {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id.clone(),
            round: q.round,
            text: q.text.clone(),
            points: q.points,
            order_index: q.order_index,
            kind: q.kind,
            options: q.options.clone(),
            hint: q.hint.clone(),
            media_url: q.media_url.clone(),
        }
    }
}
