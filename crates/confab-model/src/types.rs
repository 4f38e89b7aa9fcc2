use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
///
/// Used for user messages that mix text with images.  Images are remote
/// HTTPS URLs; providers fetch them at request time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Image { url: String },
}

impl ContentPart {
    /// Convenience constructor for a plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Convenience constructor for an image part.
    pub fn image(url: impl Into<String>) -> Self {
        Self::Image { url: url.into() }
    }
}

// ─── Tool parts ───────────────────────────────────────────────────────────────

/// One tool invocation requested by an assistant turn.
///
/// A single assistant message may carry several of these; each is matched
/// to a [`ToolResultPart`] by `id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPart {
    pub id: String,
    pub name: String,
    /// Structured arguments.  Insertion order of keys is preserved.
    pub input: serde_json::Map<String, Value>,
}

impl ToolCallPart {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), input: serde_json::Map::new() }
    }

    /// Builder-style argument insertion, mainly for tests.
    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.input.insert(key.into(), value);
        self
    }
}

/// The output of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResultPart {
    pub id: String,
    pub name: String,
    pub output: ToolOutput,
}

impl ToolResultPart {
    pub fn text(id: impl Into<String>, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), output: ToolOutput::Text(text.into()) }
    }

    pub fn json(id: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self { id: id.into(), name: name.into(), output: ToolOutput::Json(value) }
    }
}

/// A tool's output value: plain text or a structured JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Text(String),
    Json(Value),
}

impl ToolOutput {
    /// The text of this output, if it is plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Json(_) => None,
        }
    }

    /// The structured value of this output, if it is JSON.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Text(_) => None,
            Self::Json(v) => Some(v),
        }
    }
}

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message ready for submission to an LLM API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub body: MessageBody,
}

/// The content of a message.
///
/// - `Text` – simple string (most messages)
/// - `Parts` – mixed text + image parts for multimodal user turns
/// - `ToolCalls` – the assistant requests one or more tool invocations
/// - `ToolResults` – the outputs answering a preceding `ToolCalls` message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageBody {
    Text(String),
    Parts(Vec<ContentPart>),
    ToolCalls(Vec<ToolCallPart>),
    ToolResults(Vec<ToolResultPart>),
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self { role: Role::System, body: MessageBody::Text(text.into()) }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, body: MessageBody::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self { role: Role::Assistant, body: MessageBody::Text(text.into()) }
    }

    pub fn tool_calls(parts: Vec<ToolCallPart>) -> Self {
        Self { role: Role::Assistant, body: MessageBody::ToolCalls(parts) }
    }

    pub fn tool_results(parts: Vec<ToolResultPart>) -> Self {
        Self { role: Role::Tool, body: MessageBody::ToolResults(parts) }
    }

    /// Construct a user message from a list of content parts (text + images).
    ///
    /// If `parts` is empty, falls back to `MessageBody::Text("")`.
    /// If `parts` contains a single text item, collapses to `MessageBody::Text`.
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        let body = if parts.is_empty() {
            MessageBody::Text(String::new())
        } else if parts.len() == 1 {
            if let ContentPart::Text { text } = &parts[0] {
                MessageBody::Text(text.clone())
            } else {
                MessageBody::Parts(parts)
            }
        } else {
            MessageBody::Parts(parts)
        };
        Self { role: Role::User, body }
    }

    /// Return the plain text of this message, if it has exactly one text part.
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text(t) => Some(t),
            MessageBody::Parts(parts) if parts.len() == 1 => match &parts[0] {
                ContentPart::Text { text } => Some(text),
                ContentPart::Image { .. } => None,
            },
            _ => None,
        }
    }

    /// Collect all image URLs present in this message.
    pub fn image_urls(&self) -> Vec<&str> {
        match &self.body {
            MessageBody::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Image { url } => Some(url.as_str()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
            _ => vec![],
        }
    }

    /// The tool-call parts of this message, if it is a tool-call batch.
    pub fn as_tool_calls(&self) -> Option<&[ToolCallPart]> {
        match &self.body {
            MessageBody::ToolCalls(parts) => Some(parts),
            _ => None,
        }
    }

    /// The tool-result parts of this message, if it is a tool-result batch.
    pub fn as_tool_results(&self) -> Option<&[ToolResultPart]> {
        match &self.body {
            MessageBody::ToolResults(parts) => Some(parts),
            _ => None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── Message construction ──────────────────────────────────────────────────

    #[test]
    fn message_user_sets_role_and_text() {
        let m = ChatMessage::user("hello");
        assert_eq!(m.role, Role::User);
        assert_eq!(m.as_text(), Some("hello"));
    }

    #[test]
    fn message_assistant_sets_role_and_text() {
        let m = ChatMessage::assistant("reply");
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.as_text(), Some("reply"));
    }

    #[test]
    fn tool_calls_message_has_assistant_role() {
        let m = ChatMessage::tool_calls(vec![ToolCallPart::new("c1", "bash")]);
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.as_tool_calls().map(|p| p.len()), Some(1));
        assert!(m.as_text().is_none());
    }

    #[test]
    fn tool_results_message_has_tool_role() {
        let m = ChatMessage::tool_results(vec![ToolResultPart::text("c1", "bash", "ok")]);
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.as_tool_results().map(|p| p.len()), Some(1));
    }

    #[test]
    fn user_with_parts_single_text_collapses() {
        let m = ChatMessage::user_with_parts(vec![ContentPart::text("just text")]);
        assert!(matches!(m.body, MessageBody::Text(_)));
        assert_eq!(m.as_text(), Some("just text"));
    }

    #[test]
    fn user_with_parts_keeps_images() {
        let m = ChatMessage::user_with_parts(vec![
            ContentPart::text("look"),
            ContentPart::image("https://example.org/a.png"),
        ]);
        assert_eq!(m.image_urls(), vec!["https://example.org/a.png"]);
        assert!(m.as_text().is_none());
    }

    #[test]
    fn user_with_parts_empty_falls_back_to_empty_text() {
        let m = ChatMessage::user_with_parts(vec![]);
        assert_eq!(m.as_text(), Some(""));
    }

    // ── Tool parts ────────────────────────────────────────────────────────────

    #[test]
    fn tool_call_with_arg_preserves_insertion_order() {
        let call = ToolCallPart::new("c1", "bash")
            .with_arg("cmd", json!("ls"))
            .with_arg("timeout", json!(30));
        let keys: Vec<&str> = call.input.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["cmd", "timeout"]);
    }

    #[test]
    fn tool_output_accessors() {
        let t = ToolOutput::Text("plain".into());
        assert_eq!(t.as_text(), Some("plain"));
        assert!(t.as_json().is_none());

        let j = ToolOutput::Json(json!({"ok": true}));
        assert!(j.as_text().is_none());
        assert_eq!(j.as_json().unwrap()["ok"], json!(true));
    }

    // ── Serialisation round-trip ──────────────────────────────────────────────

    #[test]
    fn role_serialises_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn chat_message_round_trips() {
        let original = ChatMessage::user("test payload");
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn tool_output_round_trips_tagged() {
        let out = ToolOutput::Json(json!({"pendingDelegations": {}}));
        let json = serde_json::to_string(&out).unwrap();
        assert!(json.contains("\"type\""), "tagged representation expected: {json}");
        let back: ToolOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, out);
    }

    #[test]
    fn content_part_image_round_trips() {
        let p = ContentPart::image("https://images.unsplash.com/photo.png");
        let json = serde_json::to_string(&p).unwrap();
        let back: ContentPart = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
