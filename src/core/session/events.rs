//! Typed wire events for the Nova Sonic bidirectional stream.
//!
//! Every frame on the stream, in either direction, is a JSON object with a
//! single `event` key whose value is itself a single-key object naming the
//! event kind. Outbound kinds are modelled as [`ClientEvent`] and serialize to
//! exactly that shape; inbound frames decode into [`ServerEvent`], with an
//! explicit `Unknown` arm so an unrecognized kind never fails the session.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audio format used in both directions: 16-bit linear PCM, mono, 16 kHz.
pub const AUDIO_MEDIA_TYPE: &str = "audio/lpcm";
pub const AUDIO_SAMPLE_RATE_HZ: u32 = 16_000;
pub const AUDIO_SAMPLE_SIZE_BITS: u32 = 16;
pub const AUDIO_CHANNEL_COUNT: u32 = 1;

/// Inference sampling parameters carried by `sessionStart`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextConfiguration {
    pub media_type: String,
}

impl TextConfiguration {
    fn plain() -> Self {
        Self {
            media_type: "text/plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub voice_id: String,
    pub encoding: String,
    pub audio_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub audio_type: String,
    pub encoding: String,
}

impl AudioInputConfiguration {
    fn lpcm() -> Self {
        Self {
            media_type: AUDIO_MEDIA_TYPE.to_string(),
            sample_rate_hertz: AUDIO_SAMPLE_RATE_HZ,
            sample_size_bits: AUDIO_SAMPLE_SIZE_BITS,
            channel_count: AUDIO_CHANNEL_COUNT,
            audio_type: "SPEECH".to_string(),
            encoding: "base64".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseOutputConfiguration {
    pub media_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    pub json: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfiguration {
    pub tools: Vec<Tool>,
}

/// The tools advertised to the model. Tool invocations coming back on the
/// stream are acknowledged but not dispatched.
fn default_tools() -> ToolConfiguration {
    ToolConfiguration {
        tools: vec![Tool {
            tool_spec: ToolSpec {
                name: "getDateTool".to_string(),
                description: "get information about the current day".to_string(),
                input_schema: ToolInputSchema {
                    json: r#"{"type":"object","properties":{},"required":[]}"#.to_string(),
                },
            },
        }],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStart {
    pub prompt_name: String,
    pub text_output_configuration: TextConfiguration,
    pub audio_output_configuration: AudioOutputConfiguration,
    pub tool_use_output_configuration: ToolUseOutputConfiguration,
    pub tool_configuration: ToolConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStart {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub interactive: bool,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<TextConfiguration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfiguration>,
}

/// Events sent to the inference service.
///
/// Serializes externally tagged, so each variant becomes the single key the
/// service expects, e.g. `{"sessionStart": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    SessionStart {
        inference_configuration: InferenceConfiguration,
    },
    PromptStart(PromptStart),
    ContentStart(ContentStart),
    TextInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    AudioInput {
        prompt_name: String,
        content_name: String,
        content: String,
    },
    ContentEnd {
        prompt_name: String,
        content_name: String,
    },
    PromptEnd {
        prompt_name: String,
    },
    SessionEnd {},
}

impl ClientEvent {
    pub fn session_start(inference_configuration: InferenceConfiguration) -> Self {
        Self::SessionStart {
            inference_configuration,
        }
    }

    pub fn prompt_start(prompt_name: &str, voice_id: &str) -> Self {
        Self::PromptStart(PromptStart {
            prompt_name: prompt_name.to_string(),
            text_output_configuration: TextConfiguration::plain(),
            audio_output_configuration: AudioOutputConfiguration {
                media_type: AUDIO_MEDIA_TYPE.to_string(),
                sample_rate_hertz: AUDIO_SAMPLE_RATE_HZ,
                sample_size_bits: AUDIO_SAMPLE_SIZE_BITS,
                channel_count: AUDIO_CHANNEL_COUNT,
                voice_id: voice_id.to_string(),
                encoding: "base64".to_string(),
                audio_type: "SPEECH".to_string(),
            },
            tool_use_output_configuration: ToolUseOutputConfiguration {
                media_type: "application/json".to_string(),
            },
            tool_configuration: default_tools(),
        })
    }

    /// Opens the non-interactive system text block.
    pub fn system_text_start(prompt_name: &str, content_name: &str) -> Self {
        Self::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: "TEXT".to_string(),
            interactive: false,
            role: "SYSTEM".to_string(),
            text_input_configuration: Some(TextConfiguration::plain()),
            audio_input_configuration: None,
        })
    }

    pub fn text_input(prompt_name: &str, content_name: &str, content: &str) -> Self {
        Self::TextInput {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content: content.to_string(),
        }
    }

    /// Opens the interactive user audio block.
    pub fn audio_start(prompt_name: &str, content_name: &str) -> Self {
        Self::ContentStart(ContentStart {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content_type: "AUDIO".to_string(),
            interactive: true,
            role: "USER".to_string(),
            text_input_configuration: None,
            audio_input_configuration: Some(AudioInputConfiguration::lpcm()),
        })
    }

    pub fn audio_input(prompt_name: &str, content_name: &str, content: String) -> Self {
        Self::AudioInput {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
            content,
        }
    }

    pub fn content_end(prompt_name: &str, content_name: &str) -> Self {
        Self::ContentEnd {
            prompt_name: prompt_name.to_string(),
            content_name: content_name.to_string(),
        }
    }

    pub fn prompt_end(prompt_name: &str) -> Self {
        Self::PromptEnd {
            prompt_name: prompt_name.to_string(),
        }
    }

    pub fn session_end() -> Self {
        Self::SessionEnd {}
    }

    /// Serialize into the framed `{"event": {...}}` payload sent on the wire.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Frame<'a> {
            event: &'a ClientEvent,
        }
        serde_json::to_vec(&Frame { event: self })
    }

    /// The wire name of this event kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "sessionStart",
            Self::PromptStart(_) => "promptStart",
            Self::ContentStart(_) => "contentStart",
            Self::TextInput { .. } => "textInput",
            Self::AudioInput { .. } => "audioInput",
            Self::ContentEnd { .. } => "contentEnd",
            Self::PromptEnd { .. } => "promptEnd",
            Self::SessionEnd {} => "sessionEnd",
        }
    }
}

/// Events received from the inference service.
///
/// Only the kinds the bridge acts on carry data; lifecycle kinds are unit
/// variants and anything else lands in `Unknown` with its tag preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ContentStart { role: Option<String> },
    TextOutput { content: String, role: Option<String> },
    AudioOutput { content: String },
    ContentEnd,
    PromptEnd,
    SessionEnd,
    ToolUse(Value),
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentStartPayload {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TextOutputPayload {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AudioOutputPayload {
    #[serde(default)]
    content: Option<String>,
}

impl ServerEvent {
    /// Decode one frame. A frame without an `event` object, or with an event
    /// kind we do not recognize, decodes to `Unknown` rather than an error;
    /// only malformed JSON fails.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        let frame: Value = serde_json::from_slice(bytes)?;
        let event = match frame.get("event").and_then(Value::as_object) {
            Some(obj) => obj,
            None => return Ok(Self::Unknown(String::new())),
        };
        let (tag, body) = match event.iter().next() {
            Some(entry) => entry,
            None => return Ok(Self::Unknown(String::new())),
        };
        let decoded = match tag.as_str() {
            "contentStart" => {
                let payload: ContentStartPayload = serde_json::from_value(body.clone())?;
                Self::ContentStart { role: payload.role }
            }
            "textOutput" => {
                let payload: TextOutputPayload = serde_json::from_value(body.clone())?;
                Self::TextOutput {
                    content: payload.content.unwrap_or_default(),
                    role: payload.role,
                }
            }
            "audioOutput" => {
                let payload: AudioOutputPayload = serde_json::from_value(body.clone())?;
                Self::AudioOutput {
                    content: payload.content.unwrap_or_default(),
                }
            }
            "contentEnd" => Self::ContentEnd,
            "promptEnd" => Self::PromptEnd,
            "sessionEnd" => Self::SessionEnd,
            "toolUse" => Self::ToolUse(body.clone()),
            other => Self::Unknown(other.to_string()),
        };
        Ok(decoded)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::ContentStart { .. } => "contentStart",
            Self::TextOutput { .. } => "textOutput",
            Self::AudioOutput { .. } => "audioOutput",
            Self::ContentEnd => "contentEnd",
            Self::PromptEnd => "promptEnd",
            Self::SessionEnd => "sessionEnd",
            Self::ToolUse(_) => "toolUse",
            Self::Unknown(_) => "unknown",
        }
    }
}
