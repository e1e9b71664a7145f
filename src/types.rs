use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type GameId = String;
pub type PlayerId = String;
pub type QuestionId = String;
pub type AnswerId = String;
pub type AvatarRef = String;

/// Most contestants a game accepts (the host does not count)
pub const MAX_CONTESTANTS: usize = 4;

/// Fewest contestants needed before the host can start
pub const MIN_CONTESTANTS: usize = 2;

/// The four avatar identities every game offers
pub const AVATARS: [&str; 4] = ["avatar_1", "avatar_2", "avatar_3", "avatar_4"];

/// Options a multiple-choice question must carry
pub const MULTIPLE_CHOICE_OPTIONS: usize = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Playing,
    Finished,
}

/// The four rounds, declared in play order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    KhoiDong,
    VuotChuongNgaiVat,
    TangToc,
    VeDich,
}

impl RoundKind {
    pub const ORDER: [RoundKind; 4] = [
        RoundKind::KhoiDong,
        RoundKind::VuotChuongNgaiVat,
        RoundKind::TangToc,
        RoundKind::VeDich,
    ];

    pub fn first() -> Self {
        RoundKind::KhoiDong
    }

    /// The round after this one, `None` for the final round
    pub fn next(self) -> Option<Self> {
        let idx = Self::ORDER.iter().position(|r| *r == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn is_final(self) -> bool {
        self.next().is_none()
    }

    /// Whether the round ends on its own once every contestant has answered.
    /// The other rounds are closed by the host.
    pub fn auto_completes(self) -> bool {
        self == RoundKind::KhoiDong
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoundKind::KhoiDong => "khoi_dong",
            RoundKind::VuotChuongNgaiVat => "vuot_chuong_ngai_vat",
            RoundKind::TangToc => "tang_toc",
            RoundKind::VeDich => "ve_dich",
        }
    }
}

impl std::fmt::Display for RoundKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Game {
    pub id: GameId,
    /// 6-character join code, stored uppercase
    pub code: String,
    pub version: u64,
    pub status: GameStatus,
    /// Pre-set to the opening round at creation; only meaningful once playing
    pub current_round: Option<RoundKind>,
    #[serde(default)]
    pub intro_videos: HashMap<RoundKind, String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub game_id: GameId,
    pub name: String,
    pub score: i64,
    pub is_host: bool,
    pub avatar: Option<AvatarRef>,
    /// Final placing, assigned when the game finishes
    pub position: Option<u32>,
    /// Store-wide insertion counter, breaks score ties
    pub join_seq: u64,
    pub joined_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Normal,
    HangNgang,
    ChuongNgaiVat,
    GoiCauHoi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    pub game_id: GameId,
    pub round: RoundKind,
    pub text: String,
    pub correct_answer: String,
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

impl Question {
    /// Case-insensitive, whitespace-trimmed exact match
    pub fn is_correct(&self, text: &str) -> bool {
        text.trim().to_lowercase() == self.correct_answer.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: AnswerId,
    pub player_id: PlayerId,
    pub question_id: QuestionId,
    pub answer_text: String,
    pub is_correct: bool,
    pub points_earned: u32,
    pub response_time: Option<f64>,
    pub answered_at: String,
}

/// A contestant row as shown on the score board
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoreEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub avatar: Option<AvatarRef>,
    pub score: i64,
    pub position: Option<u32>,
}

impl From<&Player> for ScoreEntry {
    fn from(p: &Player) -> Self {
        Self {
            player_id: p.id.clone(),
            name: p.name.clone(),
            avatar: p.avatar.clone(),
            score: p.score,
            position: p.position,
        }
    }
}

pub fn is_known_avatar(avatar: &str) -> bool {
    AVATARS.contains(&avatar)
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
