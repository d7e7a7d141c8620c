//! Wire frames from the inference service and their classification into the closed set of
//! events the session controller understands.

use serde::{de, Deserialize, Deserializer};
use serde_json::Value;

use crate::forms::FormKind;

/// Node names that end a turn.
pub const TERMINAL_NODES: [&str; 2] = ["end_node", "__interrupt__"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    MsgStream,
    NodeStream,
    CustomStream,
    InterruptedMsg,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameAction {
    #[default]
    Add,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PayloadType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "react-form")]
    ReactForm,
    #[serde(rename = "html-form")]
    HtmlForm,
    /// Shown as text.
    #[serde(other)]
    Other,
}

/// `msg` is either a bare string or `{content, type, name}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireMsg {
    Plain(String),
    Structured {
        #[serde(default)]
        content: Value,
        #[serde(rename = "type", default = "default_payload_type")]
        kind: PayloadType,
        #[serde(default)]
        name: Option<String>,
    },
}

fn default_payload_type() -> PayloadType {
    PayloadType::Text
}

/// One frame as sent on the wire. Legacy frames spell `stream_type` as `status` and
/// `action` as `type`; when both spellings are present the current one wins.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFrame {
    pub stream_type: StreamType,
    pub action: FrameAction,
    pub msg: Option<WireMsg>,
    pub node_name: Option<String>,
    pub chat_title: Option<String>,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(default)]
    stream_type: Option<StreamType>,
    #[serde(default)]
    status: Option<StreamType>,
    #[serde(default)]
    action: Option<FrameAction>,
    #[serde(default, rename = "type")]
    legacy_action: Option<FrameAction>,
    #[serde(default)]
    msg: Option<WireMsg>,
    #[serde(default)]
    node_name: Option<String>,
    #[serde(default)]
    chat_title: Option<String>,
}

impl<'de> Deserialize<'de> for WireFrame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawFrame::deserialize(deserializer)?;
        let stream_type = raw
            .stream_type
            .or(raw.status)
            .ok_or_else(|| de::Error::missing_field("stream_type"))?;
        Ok(Self {
            stream_type,
            action: raw.action.or(raw.legacy_action).unwrap_or_default(),
            msg: raw.msg,
            node_name: raw.node_name,
            chat_title: raw.chat_title,
        })
    }
}

impl WireFrame {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn title(&self) -> Option<String> {
        self.chat_title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }
}

/// What a frame means for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Delta of the streamed assistant answer.
    Chunk(String),
    /// A complete assistant message.
    Append(String),
    /// New content for the last message.
    Replace(String),
    /// Structured document for an edit dialog.
    OpenForm { kind: FormKind, document: Value },
    /// Form payload with a tag no dialog handles.
    UnknownForm { tag: String },
    /// Frame without displayable content.
    Progress { node: Option<String> },
    /// The turn is over.
    Terminal { title: Option<String> },
    /// The upstream run was interrupted; the turn is over.
    Interrupted { title: Option<String> },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal { .. } | Self::Interrupted { .. })
    }
}

/// Parse a decoded JSON value and classify it. A value that is not a frame yields nothing.
pub fn classify_value(value: Value) -> Vec<StreamEvent> {
    match WireFrame::from_value(value) {
        Ok(frame) => classify(&frame),
        Err(e) => {
            log::warn!("stream: ignoring object that is not a stream frame: {}", e);
            Vec::new()
        }
    }
}

/// Content event first, then the terminal event if the frame ends the turn.
pub fn classify(frame: &WireFrame) -> Vec<StreamEvent> {
    let mut events = vec![content_event(frame)];
    match frame.stream_type {
        StreamType::InterruptedMsg => events.push(StreamEvent::Interrupted { title: frame.title() }),
        _ if frame
            .node_name
            .as_deref()
            .is_some_and(|n| TERMINAL_NODES.contains(&n)) =>
        {
            events.push(StreamEvent::Terminal { title: frame.title() })
        }
        _ => {}
    }
    events
}

fn content_event(frame: &WireFrame) -> StreamEvent {
    let progress = || StreamEvent::Progress {
        node: frame.node_name.clone(),
    };
    let (kind, content, name) = match &frame.msg {
        None => return progress(),
        Some(WireMsg::Plain(text)) => (PayloadType::Text, Value::String(text.clone()), None),
        Some(WireMsg::Structured { content, kind, name }) => (*kind, content.clone(), name.clone()),
    };

    match kind {
        PayloadType::ReactForm | PayloadType::HtmlForm => {
            let tag = name.unwrap_or_default();
            match FormKind::from_tag(&tag) {
                Some(kind) => StreamEvent::OpenForm {
                    kind,
                    document: form_document(content),
                },
                None => StreamEvent::UnknownForm { tag },
            }
        }
        PayloadType::Text | PayloadType::Other => {
            let text = match content {
                Value::String(s) => s,
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if text.is_empty() {
                progress()
            } else if frame.stream_type == StreamType::MsgStream {
                StreamEvent::Chunk(text)
            } else if frame.action == FrameAction::Update {
                StreamEvent::Replace(text)
            } else {
                StreamEvent::Append(text)
            }
        }
    }
}

/// Documents may arrive serialized as a JSON string.
fn form_document(content: Value) -> Value {
    match content {
        Value::String(s) => match serde_json::from_str(&s) {
            Ok(doc) => doc,
            Err(e) => {
                log::warn!("stream: form document is not JSON ({}), passing it as text", e);
                Value::String(s)
            }
        },
        other => other,
    }
}
