//! Step requests and typed responses exchanged with plugin handlers.
//!
//! Every handler output is decoded into [`PluginResponse`] at the boundary.
//! Output that is not JSON, lacks a `type`, or names a type outside the
//! known set is a protocol error and never reaches the session.

use std::collections::HashMap;

use lumen_types::{
    CardData, ExecuteAction, FormData, GridItem, ImageItem, InputMode, PluginAction,
    PluginStatus, ResultItem, ResultPatch,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Response `type` tags the core understands
pub const RESPONSE_TYPES: [&str; 13] = [
    "results",
    "execute",
    "match",
    "card",
    "form",
    "imageBrowser",
    "gridBrowser",
    "prompt",
    "update",
    "index",
    "status",
    "error",
    "noop",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Initial,
    Search,
    Action,
    Match,
    Form,
    FormSlider,
    FormSwitch,
    Poll,
    Index,
}

impl Step {
    /// Wire name, also used as the RPC method for socket handlers
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Initial => "initial",
            Step::Search => "search",
            Step::Action => "action",
            Step::Match => "match",
            Step::Form => "form",
            Step::FormSlider => "formSlider",
            Step::FormSwitch => "formSwitch",
            Step::Poll => "poll",
            Step::Index => "index",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedItem {
    pub id: String,
}

/// Request sent to a handler (one JSON object per line on stdin)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInput {
    pub step: Step,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<SelectedItem>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<HashMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_id: Option<String>,

    /// Slider number or switch boolean
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<IndexMode>,

    /// Ids already held in the index store, for incremental reindexing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indexed_ids: Option<Vec<String>>,
}

impl PluginInput {
    #[must_use]
    pub fn new(step: Step) -> Self {
        Self {
            step,
            query: None,
            selected: None,
            action: None,
            context: None,
            session: None,
            form_data: None,
            field_id: None,
            value: None,
            mode: None,
            indexed_ids: None,
        }
    }

    #[must_use]
    pub fn initial() -> Self {
        Self::new(Step::Initial)
    }

    #[must_use]
    pub fn search(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::new(Step::Search)
        }
    }

    #[must_use]
    pub fn action(item_id: impl Into<String>, action: Option<String>) -> Self {
        Self {
            selected: Some(SelectedItem { id: item_id.into() }),
            action,
            ..Self::new(Step::Action)
        }
    }

    #[must_use]
    pub fn pattern_match(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::new(Step::Match)
        }
    }

    #[must_use]
    pub fn form(form_data: HashMap<String, String>) -> Self {
        Self {
            form_data: Some(form_data),
            ..Self::new(Step::Form)
        }
    }

    #[must_use]
    pub fn slider(item_id: impl Into<String>, value: f64) -> Self {
        let id = item_id.into();
        Self {
            selected: Some(SelectedItem { id: id.clone() }),
            field_id: Some(id),
            value: Some(Value::from(value)),
            ..Self::new(Step::FormSlider)
        }
    }

    #[must_use]
    pub fn switch(item_id: impl Into<String>, value: bool) -> Self {
        let id = item_id.into();
        Self {
            selected: Some(SelectedItem { id: id.clone() }),
            field_id: Some(id),
            value: Some(Value::Bool(value)),
            ..Self::new(Step::FormSwitch)
        }
    }

    #[must_use]
    pub fn poll() -> Self {
        Self::new(Step::Poll)
    }

    #[must_use]
    pub fn index(mode: IndexMode, indexed_ids: Vec<String>) -> Self {
        Self {
            mode: Some(mode),
            indexed_ids: Some(indexed_ids),
            ..Self::new(Step::Index)
        }
    }

    #[must_use]
    pub fn with_session(mut self, session: &str) -> Self {
        self.session = Some(session.to_string());
        self
    }

    /// Item id this request selects, if any
    #[must_use]
    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_ref().map(|s| s.id.as_str())
    }

    /// Decode a stored entry point into a request.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the recipe is not a valid request object.
    pub fn from_entry_point(entry_point: &Value) -> Result<Self> {
        serde_json::from_value(entry_point.clone())
            .map_err(|e| Error::Protocol(format!("invalid entry point: {e}")))
    }
}

/// Navigation hints carried by view-producing responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavHints {
    pub navigate_forward: Option<bool>,
    pub navigate_back: Option<bool>,
    pub navigation_depth: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    #[serde(default, alias = "items")]
    pub results: Vec<ResultItem>,

    #[serde(default)]
    pub placeholder: Option<String>,

    #[serde(default)]
    pub input_mode: Option<InputMode>,

    #[serde(default)]
    pub clear_input: bool,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    pub notify: Option<String>,

    #[serde(default)]
    pub plugin_actions: Vec<PluginAction>,

    #[serde(default)]
    pub navigate_forward: Option<bool>,

    #[serde(default)]
    pub navigate_back: Option<bool>,

    #[serde(default)]
    pub navigation_depth: Option<i64>,

    #[serde(default)]
    pub status: Option<PluginStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardResponse {
    pub card: CardData,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    pub navigate_forward: Option<bool>,

    #[serde(default)]
    pub navigate_back: Option<bool>,

    #[serde(default)]
    pub navigation_depth: Option<i64>,

    #[serde(default)]
    pub status: Option<PluginStatus>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResponse {
    pub form: FormData,

    #[serde(default)]
    pub context: Option<String>,

    #[serde(default)]
    pub navigate_forward: Option<bool>,

    #[serde(default)]
    pub navigate_back: Option<bool>,

    #[serde(default)]
    pub navigation_depth: Option<i64>,
}

/// Side effects a plugin may request. Arbitrary commands are not among them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteData {
    #[serde(default)]
    pub launch: Option<String>,

    #[serde(default)]
    pub copy: Option<String>,

    #[serde(default)]
    pub type_text: Option<String>,

    #[serde(default)]
    pub open_url: Option<String>,

    #[serde(default)]
    pub open: Option<String>,

    #[serde(default)]
    pub notify: Option<String>,

    #[serde(default)]
    pub sound: Option<String>,

    #[serde(default)]
    pub close: Option<bool>,

    #[serde(default)]
    pub keep_open: bool,
}

impl ExecuteData {
    #[must_use]
    pub fn actions(&self) -> Vec<ExecuteAction> {
        let mut actions = Vec::new();
        if let Some(desktop_file) = &self.launch {
            actions.push(ExecuteAction::Launch {
                desktop_file: desktop_file.clone(),
            });
        }
        if let Some(text) = &self.copy {
            actions.push(ExecuteAction::Copy { text: text.clone() });
        }
        if let Some(text) = &self.type_text {
            actions.push(ExecuteAction::TypeText { text: text.clone() });
        }
        if let Some(url) = &self.open_url {
            actions.push(ExecuteAction::OpenUrl { url: url.clone() });
        }
        if let Some(path) = &self.open {
            actions.push(ExecuteAction::Open { path: path.clone() });
        }
        if let Some(message) = &self.notify {
            actions.push(ExecuteAction::Notify {
                message: message.clone(),
            });
        }
        if let Some(sound) = &self.sound {
            actions.push(ExecuteAction::PlaySound {
                sound: sound.clone(),
            });
        }
        actions
    }

    /// Launcher closes unless the plugin asked to keep it open
    #[must_use]
    pub fn should_close(&self) -> bool {
        self.close.unwrap_or(!self.keep_open)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PromptData {
    pub text: String,

    #[serde(default)]
    pub placeholder: Option<String>,
}

/// Response from a plugin handler
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
// Deserialization type: boxing would add an allocation for every plugin response
#[allow(clippy::large_enum_variant)]
pub enum PluginResponse {
    Results(ResultsResponse),

    Execute(ExecuteData),

    Match {
        #[serde(default)]
        result: Option<ResultItem>,
    },

    Card(CardResponse),

    Form(FormResponse),

    ImageBrowser {
        #[serde(default)]
        images: Vec<ImageItem>,

        #[serde(default)]
        title: Option<String>,

        #[serde(default)]
        directory: Option<String>,
    },

    GridBrowser {
        #[serde(default)]
        items: Vec<GridItem>,

        #[serde(default)]
        title: Option<String>,

        #[serde(default)]
        columns: Option<u32>,
    },

    Prompt {
        prompt: PromptData,
    },

    Update {
        #[serde(default)]
        items: Vec<ResultPatch>,

        #[serde(default)]
        status: Option<PluginStatus>,
    },

    Index {
        #[serde(default)]
        items: Vec<ResultItem>,

        #[serde(default)]
        mode: Option<IndexMode>,

        #[serde(default)]
        remove: Vec<String>,

        #[serde(default)]
        status: Option<PluginStatus>,
    },

    Status {
        status: PluginStatus,
    },

    Error {
        message: String,

        #[serde(default)]
        details: Option<String>,
    },

    Noop,
}

impl PluginResponse {
    /// Decode one line of handler output.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the line is not JSON, has no `type`, names
    /// an unknown type, or does not match the shape of its type.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::Protocol(format!("invalid JSON: {e}")))?;
        Self::from_value(value)
    }

    /// Decode an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`PluginResponse::parse`], minus the JSON syntax check.
    pub fn from_value(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("response has no type".to_string()))?;

        if !RESPONSE_TYPES.contains(&kind) {
            return Err(Error::Protocol(format!("unknown response type '{kind}'")));
        }

        let kind = kind.to_string();
        serde_json::from_value(value)
            .map_err(|e| Error::Protocol(format!("malformed '{kind}' response: {e}")))
    }

    /// Whether this response answers a request, as opposed to a side-channel
    /// push (index and status lines)
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Index { .. } | Self::Status { .. })
    }

    /// Navigation hints for view-producing responses (`results`, `card`, `form`)
    #[must_use]
    pub fn nav_hints(&self) -> Option<NavHints> {
        let (navigate_forward, navigate_back, navigation_depth) = match self {
            Self::Results(r) => (r.navigate_forward, r.navigate_back, r.navigation_depth),
            Self::Card(c) => (c.navigate_forward, c.navigate_back, c.navigation_depth),
            Self::Form(f) => (f.navigate_forward, f.navigate_back, f.navigation_depth),
            _ => return None,
        };
        Some(NavHints {
            navigate_forward,
            navigate_back,
            navigation_depth,
        })
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Results(_) => "results",
            Self::Execute(_) => "execute",
            Self::Match { .. } => "match",
            Self::Card(_) => "card",
            Self::Form(_) => "form",
            Self::ImageBrowser { .. } => "imageBrowser",
            Self::GridBrowser { .. } => "gridBrowser",
            Self::Prompt { .. } => "prompt",
            Self::Update { .. } => "update",
            Self::Index { .. } => "index",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Noop => "noop",
        }
    }
}
