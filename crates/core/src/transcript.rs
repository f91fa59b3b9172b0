//! The running chat transcript shown to the user.

use serde::Serialize;

pub const USER_PLACEHOLDER: &str = "...";
pub const TRANSCRIPTION_FAILED: &str = "(Transcription failed)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    User {
        item_id: Option<String>,
        text: String,
    },
    Robot {
        response_id: Option<String>,
        text: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
        result: Option<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Reserves a bubble for speech whose transcript has not arrived yet.
    pub fn user_placeholder(&mut self, item_id: &str) {
        if self.find_user(item_id).is_none() {
            self.entries.push(TranscriptEntry::User {
                item_id: Some(item_id.to_string()),
                text: USER_PLACEHOLDER.to_string(),
            });
        }
    }

    pub fn user_transcript(&mut self, item_id: &str, transcript: &str) {
        let transcript = transcript.trim();
        match self.find_user(item_id) {
            Some(idx) if transcript.is_empty() => {
                self.entries.remove(idx);
            }
            Some(idx) => {
                if let TranscriptEntry::User { text, .. } = &mut self.entries[idx] {
                    *text = transcript.to_string();
                }
            }
            None if !transcript.is_empty() => self.entries.push(TranscriptEntry::User {
                item_id: Some(item_id.to_string()),
                text: transcript.to_string(),
            }),
            None => {}
        }
    }

    pub fn user_transcript_failed(&mut self, item_id: &str) {
        match self.find_user(item_id) {
            Some(idx) => {
                if let TranscriptEntry::User { text, .. } = &mut self.entries[idx] {
                    *text = TRANSCRIPTION_FAILED.to_string();
                }
            }
            None => self.entries.push(TranscriptEntry::User {
                item_id: Some(item_id.to_string()),
                text: TRANSCRIPTION_FAILED.to_string(),
            }),
        }
    }

    /// Typed input or injected context.
    pub fn user_text(&mut self, text: &str) {
        self.entries.push(TranscriptEntry::User {
            item_id: None,
            text: text.to_string(),
        });
    }

    /// Appends a transcript delta. A new robot bubble is started when
    /// `force_new` is set, the last entry is not a robot bubble, or it belongs
    /// to another response.
    pub fn robot_delta(&mut self, response_id: Option<&str>, delta: &str, force_new: bool) {
        let reuse = !force_new
            && matches!(
                self.entries.last(),
                Some(TranscriptEntry::Robot { response_id: last, .. }) if last.as_deref() == response_id
            );
        if reuse {
            if let Some(TranscriptEntry::Robot { text, .. }) = self.entries.last_mut() {
                text.push_str(delta);
            }
        } else {
            self.entries.push(TranscriptEntry::Robot {
                response_id: response_id.map(str::to_owned),
                text: delta.to_string(),
            });
        }
    }

    /// Replaces the bubble for `response_id` with the final transcript.
    pub fn robot_done(&mut self, response_id: Option<&str>, transcript: &str) {
        let existing = self.entries.iter_mut().rev().find_map(|e| match e {
            TranscriptEntry::Robot { response_id: id, text } if id.as_deref() == response_id => Some(text),
            _ => None,
        });
        match existing {
            Some(text) => *text = transcript.to_string(),
            None if !transcript.is_empty() => self.entries.push(TranscriptEntry::Robot {
                response_id: response_id.map(str::to_owned),
                text: transcript.to_string(),
            }),
            None => {}
        }
    }

    pub fn function_call(&mut self, call_id: &str, name: &str, arguments: &str) {
        self.entries.push(TranscriptEntry::FunctionCall {
            call_id: call_id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
            result: None,
        });
    }

    pub fn function_result(&mut self, call_id: &str, output: &str) {
        for entry in self.entries.iter_mut().rev() {
            if let TranscriptEntry::FunctionCall { call_id: id, result, .. } = entry {
                if id == call_id {
                    *result = Some(output.to_string());
                    return;
                }
            }
        }
    }

    pub fn last_robot_text(&self) -> Option<&str> {
        self.entries.iter().rev().find_map(|e| match e {
            TranscriptEntry::Robot { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    fn find_user(&self, item_id: &str) -> Option<usize> {
        self.entries.iter().rposition(
            |e| matches!(e, TranscriptEntry::User { item_id: Some(id), .. } if id == item_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_robot_deltas_share_a_bubble_per_response() {
        let mut t = Transcript::default();
        t.robot_delta(Some("r1"), "Hel", false);
        t.robot_delta(Some("r1"), "lo", false);
        t.robot_delta(Some("r2"), "Bye", false);
        assert_eq!(t.entries().len(), 2);
        assert_eq!(
            t.entries()[0],
            TranscriptEntry::Robot { response_id: Some("r1".into()), text: "Hello".into() }
        );
    }

    #[test]
    fn test_force_new_bubble() {
        let mut t = Transcript::default();
        t.robot_delta(Some("r1"), "Moving", false);
        t.robot_delta(Some("r1"), "Done", true);
        assert_eq!(t.entries().len(), 2);
    }

    #[test]
    fn test_done_replaces_text() {
        let mut t = Transcript::default();
        t.robot_delta(Some("r1"), "Helo", false);
        t.robot_done(Some("r1"), "Hello");
        assert_eq!(t.last_robot_text(), Some("Hello"));
        assert_eq!(t.entries().len(), 1);
    }

    #[test]
    fn test_user_placeholder_lifecycle() {
        let mut t = Transcript::default();
        t.user_placeholder("u1");
        t.user_placeholder("u1");
        t.user_placeholder("u2");
        t.user_transcript("u1", " hi there ");
        t.user_transcript_failed("u2");
        assert_eq!(
            t.entries(),
            &[
                TranscriptEntry::User { item_id: Some("u1".into()), text: "hi there".into() },
                TranscriptEntry::User { item_id: Some("u2".into()), text: TRANSCRIPTION_FAILED.into() },
            ]
        );
    }

    #[test]
    fn test_empty_user_transcript_drops_placeholder() {
        let mut t = Transcript::default();
        t.user_placeholder("u1");
        t.user_transcript("u1", "  ");
        assert!(t.entries().is_empty());
    }

    #[test]
    fn test_function_result_attaches_to_call() {
        let mut t = Transcript::default();
        t.function_call("c1", "move_pepper", "{}");
        t.function_result("c1", "{\"status\":\"Movement started\"}");
        assert!(matches!(
            &t.entries()[0],
            TranscriptEntry::FunctionCall { result: Some(r), .. } if r.contains("Movement started")
        ));
    }
}
