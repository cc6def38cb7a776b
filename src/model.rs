use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub poll: PollConfig,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub start_on_launch: bool,
    pub suggestions: Vec<String>,
}

/// Polling cadence and attempt budget for a pending command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub deadline_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            deadline_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[serde(alias = "command")]
    Player,
    System,
    #[serde(alias = "response")]
    Narrative,
    Error,
    #[serde(other)]
    Other,
}

/// One line of the transcript as delivered by the backend (or synthesized locally for errors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    #[serde(rename = "content", default)]
    pub text: String,
}

impl HistoryEntry {
    pub fn new(kind: EntryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(EntryKind::Error, text)
    }
}

/// Backend-issued identifier of a command that is still being processed.
///
/// The backend may encode it as a JSON string or number; it is kept opaque either way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CommandToken(String);

impl CommandToken {
    #[cfg(test)]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn opaque_token<'de, D>(d: D) -> Result<Option<CommandToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(d)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(CommandToken(s)),
        Some(serde_json::Value::Number(n)) => Some(CommandToken(n.to_string())),
        _ => None,
    })
}

/// Client-side correlation id, unique per submission. Sent as `id` alongside the command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ClientToken(pub u64);

impl fmt::Display for ClientToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandRequest {
    #[serde(rename = "command")]
    pub text: String,
    #[serde(rename = "id")]
    pub client_token: ClientToken,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub final_message: Option<String>,
    #[serde(default, deserialize_with = "opaque_token")]
    pub command_id: Option<CommandToken>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The three shapes a `command` reply can take.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Completed {
        ended: bool,
        history: Vec<HistoryEntry>,
        final_message: Option<String>,
    },
    Pending {
        command_id: CommandToken,
    },
    Rejected {
        error: Option<String>,
    },
}

impl CommandResponse {
    pub fn into_reply(self) -> CommandReply {
        if !self.success {
            return CommandReply::Rejected { error: self.error };
        }
        if self.processing {
            return match self.command_id {
                Some(command_id) => CommandReply::Pending { command_id },
                None => CommandReply::Rejected {
                    error: Some("backend reported processing without a command id".into()),
                },
            };
        }
        CommandReply::Completed {
            ended: self.ended,
            history: self.history,
            final_message: self.final_message,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub processing: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub history_additions: Option<Vec<HistoryEntry>>,
    // Narration of the finished turn, sent instead of `history_additions` by some backends.
    #[serde(default)]
    pub response: Option<String>,
    // Older backends resend the whole transcript here; it is never appended mid-session.
    #[serde(default)]
    pub history: Option<Vec<HistoryEntry>>,
    #[serde(default)]
    pub ended: bool,
    #[serde(default)]
    pub final_message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusReply {
    Processing {
        message: Option<String>,
    },
    Resolved {
        additions: Vec<HistoryEntry>,
        ended: bool,
        final_message: Option<String>,
        full_history_only: bool,
    },
    Failed {
        error: Option<String>,
    },
}

impl StatusResponse {
    pub fn into_reply(self) -> StatusReply {
        if !self.success {
            return StatusReply::Failed { error: self.error };
        }
        if self.processing {
            return StatusReply::Processing {
                message: self.message,
            };
        }
        let response = self.response.filter(|r| !r.trim().is_empty());
        let full_history_only =
            self.history_additions.is_none() && response.is_none() && self.history.is_some();
        let additions = match (self.history_additions, response) {
            (Some(additions), _) => additions,
            (None, Some(text)) => vec![HistoryEntry::new(EntryKind::Narrative, text)],
            (None, None) => Vec::new(),
        };
        StatusReply::Resolved {
            additions,
            ended: self.ended,
            final_message: self.final_message,
            full_history_only,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CharacterResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub character: Option<CharacterSheet>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Character sheet as served by the backend. Field aliases accept the Portuguese keys the
/// reference backend writes to `personagem.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    #[serde(default, alias = "nome")]
    pub name: Option<String>,
    #[serde(default, alias = "classe")]
    pub class: Option<String>,
    #[serde(default, alias = "raca")]
    pub race: Option<String>,
    #[serde(default, alias = "nivel")]
    pub level: Option<u32>,
    #[serde(default, alias = "pv_maximo")]
    pub hp_max: Option<i64>,
    #[serde(default, alias = "pv_atual")]
    pub hp_current: Option<i64>,
    #[serde(default, alias = "atributos")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default, alias = "magias_conhecidas")]
    pub spells: Vec<String>,
    #[serde(default, alias = "equipamento")]
    pub equipment: Vec<String>,
}

impl CharacterSheet {
    /// Look up an attribute by name, falling back to a match that ignores case and accents.
    pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
        self.attributes.get(name).or_else(|| {
            let wanted = fold_name(name);
            self.attributes
                .iter()
                .find(|(k, _)| fold_name(k) == wanted)
                .map(|(_, v)| v)
        })
    }

    /// Current HP as a 0.0..=1.0 ratio; `None` when the maximum is unknown or zero.
    pub fn hp_ratio(&self) -> Option<f64> {
        let max = self.hp_max.filter(|m| *m > 0)?;
        let cur = self.hp_current.unwrap_or(0).clamp(0, max);
        Some(cur as f64 / max as f64)
    }
}

/// Lowercase and strip the accents the reference backend uses in attribute names.
pub fn fold_name(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Ready,
    Processing,
    Error,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub text: String,
    pub severity: Severity,
}

impl StatusMessage {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}

/// Events emitted by the controller and consumed by UI/text layers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    TranscriptAppended {
        entries: Vec<HistoryEntry>,
        placeholder_cleared: bool,
    },
    Status(StatusMessage),
    InputEnabled(bool),
    // Boxed to keep the enum small; sheets carry maps and lists.
    Character(Box<CharacterSheet>),
    Ended {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_kinds_accept_backend_aliases() {
        let raw = r#"[
            {"type":"command","content":"look"},
            {"type":"response","content":"A dark room."},
            {"type":"system","content":"Welcome"},
            {"type":"whisper","content":"psst"}
        ]"#;
        let entries: Vec<HistoryEntry> = serde_json::from_str(raw).unwrap();
        let kinds: Vec<EntryKind> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EntryKind::Player,
                EntryKind::Narrative,
                EntryKind::System,
                EntryKind::Other
            ]
        );
        assert_eq!(entries[1].text, "A dark room.");
    }

    #[test]
    fn command_reply_classifies_pending_with_numeric_token() {
        let resp: CommandResponse =
            serde_json::from_str(r#"{"success":true,"processing":true,"command_id":1712345}"#)
                .unwrap();
        assert_eq!(
            resp.into_reply(),
            CommandReply::Pending {
                command_id: CommandToken::new("1712345")
            }
        );
    }

    #[test]
    fn command_reply_processing_without_token_is_rejected() {
        let resp: CommandResponse =
            serde_json::from_str(r#"{"success":true,"processing":true}"#).unwrap();
        assert!(matches!(resp.into_reply(), CommandReply::Rejected { .. }));
    }

    #[test]
    fn command_reply_completed_carries_final_message() {
        let resp: CommandResponse = serde_json::from_str(
            r#"{"success":true,"processing":false,"ended":true,
                "history":[{"type":"narrative","content":"You perish."}],
                "final_message":"Game over"}"#,
        )
        .unwrap();
        match resp.into_reply() {
            CommandReply::Completed {
                ended,
                history,
                final_message,
            } => {
                assert!(ended);
                assert_eq!(history, vec![HistoryEntry::new(EntryKind::Narrative, "You perish.")]);
                assert_eq!(final_message.as_deref(), Some("Game over"));
            }
            other => panic!("expected completed reply, got {other:?}"),
        }
    }

    #[test]
    fn status_reply_flags_full_transcript_without_additions() {
        let resp: StatusResponse = serde_json::from_str(
            r#"{"success":true,"processing":false,"history":[{"type":"system","content":"x"}]}"#,
        )
        .unwrap();
        match resp.into_reply() {
            StatusReply::Resolved {
                additions,
                full_history_only,
                ..
            } => {
                assert!(additions.is_empty());
                assert!(full_history_only);
            }
            other => panic!("expected resolved reply, got {other:?}"),
        }
    }

    #[test]
    fn status_reply_response_field_becomes_the_only_addition() {
        let resp: StatusResponse = serde_json::from_str(
            r#"{"success":true,"processing":false,"response":"A cold wind.",
                "history":[{"type":"system","content":"Welcome"},
                           {"type":"command","content":"look"},
                           {"type":"response","content":"A cold wind."}]}"#,
        )
        .unwrap();
        assert_eq!(
            resp.into_reply(),
            StatusReply::Resolved {
                additions: vec![HistoryEntry::new(EntryKind::Narrative, "A cold wind.")],
                ended: false,
                final_message: None,
                full_history_only: false,
            }
        );
    }

    #[test]
    fn status_reply_missing_success_is_failure() {
        let resp: StatusResponse = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert_eq!(
            resp.into_reply(),
            StatusReply::Failed {
                error: Some("boom".into())
            }
        );
    }

    #[test]
    fn command_request_uses_backend_field_names() {
        let req = CommandRequest {
            text: "look".into(),
            client_token: ClientToken(42),
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v, serde_json::json!({"command": "look", "id": 42}));
    }

    #[test]
    fn character_sheet_reads_portuguese_keys() {
        let sheet: CharacterSheet = serde_json::from_str(
            r#"{"classe":"Mago","raca":"Humano","nivel":3,"pv_maximo":18,"pv_atual":9,
                "atributos":{"Força":8,"Inteligência":17},
                "magias_conhecidas":["Mísseis Mágicos"],"equipamento":["Cajado"]}"#,
        )
        .unwrap();
        assert_eq!(sheet.class.as_deref(), Some("Mago"));
        assert_eq!(sheet.level, Some(3));
        assert_eq!(sheet.hp_ratio(), Some(0.5));
        assert_eq!(sheet.attribute("força"), Some(&serde_json::json!(8)));
        assert_eq!(sheet.attribute("INTELIGENCIA"), Some(&serde_json::json!(17)));
        assert_eq!(sheet.attribute("Carisma"), None);
        assert_eq!(sheet.spells.len(), 1);
    }
}
