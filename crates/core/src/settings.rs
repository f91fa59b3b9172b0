//! Negotiated session configuration, rendered into `session.update`.

use pepper_realtime_types::{InputAudioTranscription, SessionConfig, TurnDetection};
use serde::{Deserialize, Serialize};

pub const DEFAULT_INSTRUCTIONS: &str = "You are Pepper, a friendly humanoid robot. \
Keep answers short and conversational, they are spoken aloud. \
Call functions directly without announcing them. \
Messages in square brackets describe things that happened to you, such as being touched \
or a movement finishing; react to them naturally.";

/// Server-side voice activity detection tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VadSettings {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub voice: String,
    pub temperature: f32,
    pub speed: f32,
    pub instructions: String,
    /// `None` enables every registered tool.
    pub enabled_tools: Option<Vec<String>>,
    pub vad: VadSettings,
    pub transcription_model: String,
    pub transcription_language: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            temperature: 0.8,
            speed: 1.0,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            enabled_tools: None,
            vad: VadSettings::default(),
            transcription_model: "whisper-1".to_string(),
            transcription_language: None,
        }
    }
}

impl SessionSettings {
    /// Builds the session payload. Backend turn detection only detects
    /// speech; response creation and barge-in stay with the coordinator.
    pub fn session_config(&self, tools: Vec<serde_json::Value>) -> SessionConfig {
        SessionConfig {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions: Some(self.instructions.clone()),
            voice: self.voice.clone(),
            speed: (self.speed != 1.0).then_some(self.speed),
            temperature: self.temperature,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            input_audio_transcription: Some(InputAudioTranscription {
                model: self.transcription_model.clone(),
                language: self.transcription_language.clone(),
                prompt: None,
            }),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: self.vad.threshold,
                prefix_padding_ms: self.vad.prefix_padding_ms,
                silence_duration_ms: self.vad.silence_duration_ms,
                create_response: false,
                interrupt_response: false,
            }),
            tools,
            tool_choice: "auto".to_string(),
        }
    }
}
