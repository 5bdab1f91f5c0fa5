use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_CATEGORY: &str = "engagement";

/// One tracked interaction as it lands on the data layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "event")]
    pub name: String,
    #[serde(rename = "event_category")]
    pub category: String,
    #[serde(rename = "event_action")]
    pub action: String,
    #[serde(rename = "event_label")]
    pub label: String,
    pub timestamp: String,
    pub session_id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EventRecord {
    /// Flat object for the tag-manager queue. Extra keys win over base keys.
    pub fn to_data_layer_entry(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    /// Properties for the CDP `track` call: action, label and the extras.
    pub fn cdp_properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("action".into(), Value::String(self.action.clone()));
        props.insert("label".into(), Value::String(self.label.clone()));
        for (key, value) in &self.extra {
            props.insert(key.clone(), value.clone());
        }
        Value::Object(props)
    }
}

/// Builds the `extra` map from `key => value` pairs.
#[macro_export]
macro_rules! extra {
    () => { ::serde_json::Map::new() };
    ($($key:literal => $value:expr),+ $(,)?) => {{
        let mut map = ::serde_json::Map::new();
        $( map.insert($key.to_string(), ::serde_json::json!($value)); )+
        map
    }};
}
