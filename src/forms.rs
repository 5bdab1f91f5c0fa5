use crate::dom;
use kuchiki::NodeRef;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

pub const SUCCESS_LABEL: &str = "Thank You!";
pub const SUCCESS_BACKGROUND: &str = "#10B981";

/// Coarse flags derived from submitted values; raw values never leave here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSummary {
    pub form_id: String,
    pub field_count: usize,
    pub has_email: bool,
    pub has_phone: bool,
    pub interest_area: String,
    pub experience_level: String,
    pub newsletter_opt_in: bool,
}

impl FormSummary {
    /// Later entries with the same name win, like building an object from
    /// form data.
    pub fn from_entries(form_id: &str, entries: &[(String, String)]) -> Self {
        let values: HashMap<&str, &str> = entries
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let present = |key: &str| values.get(key).is_some_and(|v| !v.is_empty());
        let or_unspecified = |key: &str| {
            values
                .get(key)
                .filter(|v| !v.is_empty())
                .map(|v| v.to_string())
                .unwrap_or_else(|| "not_specified".to_string())
        };
        Self {
            form_id: form_id.to_string(),
            field_count: values.len(),
            has_email: present("email"),
            has_phone: present("phone"),
            interest_area: or_unspecified("interest"),
            experience_level: or_unspecified("experience"),
            newsletter_opt_in: present("newsletter"),
        }
    }

    pub fn to_extra(&self) -> Map<String, Value> {
        let yes_no = |flag: bool| if flag { "yes" } else { "no" };
        let mut extra = Map::new();
        extra.insert("form_id".into(), json!(self.form_id));
        extra.insert("form_fields".into(), json!(self.field_count));
        extra.insert("has_email".into(), json!(yes_no(self.has_email)));
        extra.insert("has_phone".into(), json!(yes_no(self.has_phone)));
        extra.insert("interest_area".into(), json!(self.interest_area));
        extra.insert("experience_level".into(), json!(self.experience_level));
        extra.insert(
            "newsletter_opt_in".into(),
            json!(yes_no(self.newsletter_opt_in)),
        );
        extra
    }
}

pub fn submit_button(form: &NodeRef) -> Option<NodeRef> {
    dom::select_within(form, r#"button[type="submit"]"#)
        .ok()
        .and_then(|buttons| buttons.into_iter().next())
}

/// Swaps the button into its "sent" look; returns the label it had.
pub fn apply_success_feedback(button: &NodeRef) -> String {
    let original = dom::text(button);
    dom::set_text(button, SUCCESS_LABEL);
    dom::set_attr(button, "disabled", "");
    dom::set_style_property(button, "background", SUCCESS_BACKGROUND);
    original
}

pub fn revert_success_feedback(button: &NodeRef, original_label: &str) {
    dom::set_text(button, original_label);
    dom::remove_attr(button, "disabled");
    dom::set_style_property(button, "background", "");
}
