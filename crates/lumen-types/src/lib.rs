//! Shared types for Lumen launcher components.
//!
//! Everything here crosses a process boundary at some point (plugin stdout,
//! the control socket, or the on-disk index cache), so every type is serde
//! serializable and tolerant of missing optional fields.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a Vec that may be null or missing (both become empty vec)
fn deserialize_null_as_empty_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let opt: Option<Vec<T>> = Option::deserialize(deserializer)?;
    Ok(opt.unwrap_or_default())
}

// Serde skip_serializing_if requires &bool signature
#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(b: &bool) -> bool {
    !*b
}

// Serde skip_serializing_if requires &u32 signature
#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

fn is_zero_slots<const N: usize>(slots: &[u32; N]) -> bool {
    slots.iter().all(|&x| x == 0)
}

/// Events sent from a front end to the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    /// Query text changed (realtime search)
    QueryChanged { query: String },

    /// Query submitted (enter pressed)
    QuerySubmitted {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Item selected, optionally through one of its actions
    ItemSelected {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plugin_id: Option<String>,
    },

    SliderChanged {
        id: String,
        value: f64,
    },

    SwitchToggled {
        id: String,
        value: bool,
    },

    FormSubmitted {
        form_data: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Live form field change
    FormFieldChanged {
        field_id: String,
        value: String,
        form_data: HashMap<String, String>,
    },

    /// Explicit back navigation inside the active plugin
    Back,

    /// Escape key. Steps back, or closes the plugin on a quick double press.
    Escape,

    OpenPlugin { plugin_id: String },

    ClosePlugin,

    LauncherOpened,

    LauncherClosed,

    /// Ask a plugin to reindex its items
    RefreshIndex { plugin_id: String },

    /// Toolbar action of the active plugin
    PluginActionTriggered { action_id: String },
}

/// Updates sent from the core to a front end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreUpdate {
    /// Full replacement of the visible result list
    Results {
        results: Vec<SearchResult>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        placeholder: Option<String>,
        #[serde(default, skip_serializing_if = "is_false")]
        clear_input: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_mode: Option<InputMode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    /// Patch rows of the visible list in place
    ResultsUpdate { patches: Vec<ResultPatch> },

    Card {
        card: CardData,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    Form { form: FormData },

    ImageBrowser { browser: ImageBrowserData },

    GridBrowser { browser: GridBrowserData },

    Prompt { prompt: String },

    PluginActivated {
        id: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        icon: Option<String>,
    },

    PluginDeactivated,

    Busy { busy: bool },

    Error { message: String },

    Execute { action: ExecuteAction },

    /// Hide the launcher
    Close,

    /// Show the launcher
    Show,

    InputModeChanged { mode: InputMode },

    ContextChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context: Option<String>,
    },

    PluginStatusUpdate {
        plugin_id: String,
        status: PluginStatus,
    },

    PluginActionsUpdate { actions: Vec<PluginAction> },

    /// Absolute navigation depth after a view-producing response
    NavigationDepthChanged { depth: u32 },
}

/// How the active plugin wants query text delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    /// Every keystroke is a search step
    #[default]
    Realtime,
    /// Only an explicit submit is a search step
    Submit,
}

/// One row of a result list. Also the wire shape of a plugin index item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultItem {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,

    #[serde(default, alias = "type")]
    pub result_type: ResultType,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub badges: Vec<Badge>,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub chips: Vec<Chip>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub actions: Vec<Action>,

    /// Plugin that produced this row (set by the core, not by plugins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,

    /// Extra search terms (index items only)
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub keywords: Vec<String>,

    /// Stored request replayed when the item is launched from the global list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub keep_open: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_hint: Option<DisplayHint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetData>,
}

/// Result rows and plugin index items share one shape
pub type SearchResult = ResultItem;

impl ResultItem {
    /// Icon name, falling back to a generic one
    #[must_use]
    pub fn icon_or_default(&self) -> &str {
        self.icon.as_deref().unwrap_or("extension")
    }

    #[must_use]
    pub fn with_plugin_id(mut self, plugin_id: &str) -> Self {
        self.plugin_id = Some(plugin_id.to_string());
        self
    }

    #[must_use]
    pub fn is_slider(&self) -> bool {
        matches!(self.widget, Some(WidgetData::Slider { .. }))
    }

    /// Merge a patch over this item, leaving unspecified fields alone
    pub fn apply_patch(&mut self, patch: &ResultPatch) {
        if let Some(name) = &patch.name {
            self.name.clone_from(name);
        }
        if patch.description.is_some() {
            self.description.clone_from(&patch.description);
        }
        if patch.icon.is_some() {
            self.icon.clone_from(&patch.icon);
        }
        if patch.verb.is_some() {
            self.verb.clone_from(&patch.verb);
        }
        if let Some(badges) = &patch.badges {
            self.badges.clone_from(badges);
        }
        if let Some(chips) = &patch.chips {
            self.chips.clone_from(chips);
        }
        if patch.widget.is_some() {
            self.widget.clone_from(&patch.widget);
        }
    }
}

/// Partial update to a result item, keyed by id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPatch {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verb: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badges: Option<Vec<Badge>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chips: Option<Vec<Chip>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub widget: Option<WidgetData>,
}

/// Where a row came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultType {
    #[default]
    Normal,
    Plugin,
    Action,
    IndexedItem,
    History,
    WebSearch,
    PatternMatch,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayHint {
    #[default]
    Auto,
    List,
    Grid,
    LargeGrid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Chip (similar to badge but different styling)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chip {
    /// Accepts both "text" and "label"
    #[serde(alias = "label", default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Interactive and display widgets attached to a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WidgetData {
    Slider {
        value: f64,
        #[serde(default)]
        min: f64,
        #[serde(default = "default_max")]
        max: f64,
        #[serde(default = "default_step")]
        step: f64,
    },
    Switch {
        value: bool,
    },
    Progress {
        value: f64,
        #[serde(default = "default_max")]
        max: f64,
    },
}

fn default_max() -> f64 {
    100.0
}

fn default_step() -> f64 {
    1.0
}

/// Row action (secondary verbs shown next to an item)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub keep_open: bool,
    /// Stored request for replaying this action without an open plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<serde_json::Value>,
}

/// Toolbar action of the active plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginAction {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardData {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormData {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub fields: Vec<FormField>,
    #[serde(default = "default_submit_label")]
    pub submit_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_label: Option<String>,
    /// Send every change as a live step instead of waiting for submit
    #[serde(default)]
    pub live_update: bool,
}

fn default_submit_label() -> String {
    "Submit".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, rename = "type")]
    pub field_type: FormFieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FormOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormFieldType {
    #[default]
    Text,
    Password,
    Number,
    Textarea,
    Select,
    Checkbox,
    Switch,
    Slider,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormOption {
    pub value: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBrowserData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default)]
    pub images: Vec<ImageItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageItem {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridBrowserData {
    #[serde(default)]
    pub items: Vec<GridItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

/// Side effect requested by a plugin.
///
/// This is a closed set: a plugin can never ask the core to run an
/// arbitrary command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecuteAction {
    /// Launch a desktop entry
    Launch { desktop_file: String },
    OpenUrl { url: String },
    /// Open a file or folder with the default application
    Open { path: String },
    Copy { text: String },
    TypeText { text: String },
    PlaySound { sound: String },
    Notify { message: String },
}

/// Persistent status item shown while the launcher is idle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmbientItem {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Auto-removal delay in ms (0 = permanent)
    #[serde(default)]
    pub duration: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FabOverride {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub badges: Vec<Badge>,
    /// Higher priority wins when multiple plugins set one
    #[serde(default)]
    pub priority: i32,
}

/// Badges, chips and ambient items a plugin shows on its main-list entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginStatus {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub badges: Vec<Badge>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "deserialize_null_as_empty_vec"
    )]
    pub chips: Vec<Chip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fab: Option<FabOverride>,
    /// `null` clears ambient items, a missing field leaves them alone
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_ambient"
    )]
    pub ambient: Option<Vec<AmbientItem>>,
}

fn deserialize_ambient<'de, D>(deserializer: D) -> Result<Option<Vec<AmbientItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<AmbientItem>> = Option::deserialize(deserializer)?;
    Ok(Some(opt.unwrap_or_default()))
}

/// Usage counters embedded on index items and history records.
///
/// Field names carry the leading underscore used by the on-disk index cache
/// so they can be flattened next to plugin-provided item fields without
/// colliding with them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frecency {
    /// Total executions
    #[serde(rename = "_count", default)]
    pub count: u32,

    /// Last execution, ms since epoch
    #[serde(rename = "_lastUsed", default)]
    pub last_used: u64,

    /// Search terms that led to this item, most recent first
    #[serde(
        rename = "_recentSearchTerms",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub recent_search_terms: Vec<String>,

    /// Executions per hour of day (0-23)
    #[serde(
        rename = "_hourSlotCounts",
        default,
        skip_serializing_if = "is_zero_slots"
    )]
    pub hour_slot_counts: [u32; 24],

    /// Executions per day of week (0 = Sunday)
    #[serde(
        rename = "_dayOfWeekCounts",
        default,
        skip_serializing_if = "is_zero_slots"
    )]
    pub day_of_week_counts: [u32; 7],

    /// Executions that started from an empty query
    #[serde(
        rename = "_launchFromEmptyCount",
        default,
        skip_serializing_if = "is_zero_u32"
    )]
    pub launch_from_empty_count: u32,
}

impl Frecency {
    #[must_use]
    pub fn new_with_usage(count: u32, last_used: u64) -> Self {
        Self {
            count,
            last_used,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn has_usage(&self) -> bool {
        self.count > 0
    }

    /// Age in ms since last use
    #[must_use]
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_item_accepts_type_alias_and_null_lists() {
        let item: ResultItem = serde_json::from_value(json!({
            "id": "a",
            "name": "Alpha",
            "type": "webSearch",
            "badges": null,
            "keywords": ["first", "letter"]
        }))
        .unwrap();

        assert_eq!(item.result_type, ResultType::WebSearch);
        assert!(item.badges.is_empty());
        assert_eq!(item.keywords, vec!["first", "letter"]);
        assert_eq!(item.icon_or_default(), "extension");
    }

    #[test]
    fn result_item_omits_empty_fields() {
        let item = ResultItem {
            id: "x".to_string(),
            name: "X".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&item).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("badges"));
        assert!(!obj.contains_key("keepOpen"));
        assert!(!obj.contains_key("entryPoint"));
    }

    #[test]
    fn apply_patch_keeps_unspecified_fields() {
        let mut item = ResultItem {
            id: "vol".to_string(),
            name: "Volume".to_string(),
            description: Some("Output".to_string()),
            ..Default::default()
        };
        item.apply_patch(&ResultPatch {
            id: "vol".to_string(),
            widget: Some(WidgetData::Slider {
                value: 40.0,
                min: 0.0,
                max: 100.0,
                step: 5.0,
            }),
            ..Default::default()
        });

        assert_eq!(item.name, "Volume");
        assert_eq!(item.description.as_deref(), Some("Output"));
        assert!(item.is_slider());
    }

    #[test]
    fn frecency_uses_underscore_field_names() {
        let frecency = Frecency::new_with_usage(3, 1000);
        let value = serde_json::to_value(&frecency).unwrap();
        assert_eq!(value["_count"], 3);
        assert_eq!(value["_lastUsed"], 1000);
        assert!(value.get("_hourSlotCounts").is_none());

        let back: Frecency = serde_json::from_value(json!({"_count": 2})).unwrap();
        assert_eq!(back.count, 2);
        assert_eq!(back.last_used, 0);
    }

    #[test]
    fn status_null_ambient_means_clear() {
        let cleared: PluginStatus = serde_json::from_value(json!({"ambient": null})).unwrap();
        assert_eq!(cleared.ambient, Some(vec![]));

        let untouched: PluginStatus = serde_json::from_value(json!({"badges": []})).unwrap();
        assert_eq!(untouched.ambient, None);
    }

    #[test]
    fn execute_action_is_tagged() {
        let action: ExecuteAction =
            serde_json::from_value(json!({"type": "open_url", "url": "https://example.com"}))
                .unwrap();
        assert_eq!(
            action,
            ExecuteAction::OpenUrl {
                url: "https://example.com".to_string()
            }
        );
    }

    #[test]
    fn core_event_round_trips_through_tag() {
        let event: CoreEvent =
            serde_json::from_value(json!({"type": "open_plugin", "plugin_id": "calc"})).unwrap();
        assert!(matches!(event, CoreEvent::OpenPlugin { plugin_id } if plugin_id == "calc"));
    }
}
