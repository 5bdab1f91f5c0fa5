use crate::bindings::{LoadTiming, ScriptFault, tracking_id};
use crate::dom;
use crate::extra;
use crate::forms::{self, FormSummary};
use crate::relay::{PageEffect, Relay};
use crate::scroll::scroll_percentage;
use kuchiki::NodeRef;
use serde_json::Map;
use tracing::debug;

const MODAL_ID: &str = "video-modal";
const FORM_SECTION_ID: &str = "form-section";
const CLICK_TEXT_LIMIT: usize = 50;

/// Button style from its classes; anything unstyled counts as outline.
pub fn button_type(class_name: &str) -> &'static str {
    if class_name.contains("btn-primary") {
        "primary"
    } else if class_name.contains("btn-secondary") {
        "secondary"
    } else {
        "outline"
    }
}

/// Which third of the viewport an element's top edge sits in.
pub fn position_bucket(top: f64, viewport_height: f64) -> &'static str {
    if top < viewport_height * 0.33 {
        "top"
    } else if top < viewport_height * 0.66 {
        "middle"
    } else {
        "bottom"
    }
}

pub fn page_section(node: &NodeRef) -> String {
    dom::closest(node, "section")
        .map(|section| dom::attr(&section, "id").unwrap_or_default())
        .unwrap_or_else(|| "unknown".to_string())
}

fn trimmed_text(node: &NodeRef) -> String {
    dom::text(node).trim().to_string()
}

fn program_name(card: &NodeRef) -> String {
    dom::select_within(card, "h3")
        .ok()
        .and_then(|headings| headings.into_iter().next())
        .map(|h| dom::text(&h))
        .unwrap_or_default()
}

fn non_empty_or(value: String, fallback: &str) -> String {
    if value.is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

impl Relay {
    fn element_position(&self, node: &NodeRef) -> &'static str {
        let geometry = &self.ctx().geometry;
        position_bucket(
            geometry.bounding_rect(node).top,
            geometry.viewport().height,
        )
    }

    pub(crate) fn on_cta(&self, button: &NodeRef) {
        let tracking = tracking_id(button);
        self.track(
            "cta_click",
            &tracking,
            &trimmed_text(button),
            extra!(
                "button_type" => button_type(&dom::class_name(button)),
                "button_position" => self.element_position(button),
                "page_section" => page_section(button),
            ),
        );
        match tracking.as_str() {
            "video_cta" => self.open_video_modal(),
            "hero_cta" => self.scroll_to_form(),
            _ => {}
        }
    }

    pub(crate) fn on_navigation(&self, link: &NodeRef) {
        let href = dom::attr(link, "href")
            .map(|h| self.config().resolve_href(&h))
            .unwrap_or_default();
        self.track(
            "navigation_click",
            &tracking_id(link),
            &trimmed_text(link),
            extra!("link_url" => href, "link_position" => "header_nav"),
        );
    }

    pub(crate) fn on_social(&self, link: &NodeRef) {
        let platform = tracking_id(link).replacen("social_", "", 1);
        self.track(
            "social_click",
            &platform,
            &trimmed_text(link),
            extra!("platform" => platform.clone(), "link_position" => "footer"),
        );
    }

    pub(crate) fn on_program_hover(&self, card: &NodeRef) {
        self.track(
            "program_card_hover",
            &tracking_id(card),
            &program_name(card),
            Map::new(),
        );
    }

    pub(crate) fn on_program_learn_more(&self, button: &NodeRef) {
        let card = dom::closest(button, ".program-card").unwrap_or_else(|| button.clone());
        let name = program_name(&card);
        self.track(
            "program_learn_more",
            &tracking_id(&card),
            &name,
            extra!(
                "program_name" => name.clone(),
                "card_position" => self.element_position(&card),
            ),
        );
        self.push_effect(PageEffect::Alert {
            message: format!(
                "Learn more about {name} - This would open a detailed program page in a real implementation."
            ),
        });
    }

    pub(crate) fn open_video_modal(&self) {
        let Some(modal) = self.page().by_id(MODAL_ID) else {
            debug!("video modal missing; nothing to open");
            return;
        };
        dom::set_style_property(&modal, "display", "block");
        let label = self.config().video_label.clone();
        self.track("video_modal_open", "program_video", &label, Map::new());
    }

    pub(crate) fn close_video_modal(&self) {
        let Some(modal) = self.page().by_id(MODAL_ID) else {
            return;
        };
        dom::set_style_property(&modal, "display", "none");
        let label = self.config().video_label.clone();
        self.track("video_modal_close", "program_video", &label, Map::new());
    }

    fn scroll_to_form(&self) {
        if self.page().by_id(FORM_SECTION_ID).is_some() {
            self.push_effect(PageEffect::ScrollIntoView {
                element_id: FORM_SECTION_ID.to_string(),
            });
        }
    }

    pub(crate) fn on_page_timing(&self, timing: &LoadTiming) {
        let load_ms = timing.load_event_end_ms;
        self.track(
            "page_load_time",
            "performance",
            &format!("{load_ms}ms"),
            extra!(
                "load_time_ms" => load_ms,
                "dom_content_loaded" => timing.dom_content_loaded_ms,
            ),
        );
    }

    pub(crate) fn on_script_error(&self, fault: &ScriptFault) {
        self.track(
            "javascript_error",
            "error",
            &fault.message,
            extra!(
                "error_message" => fault.message.clone(),
                "error_filename" => fault.filename.clone(),
                "error_lineno" => fault.line,
                "error_colno" => fault.column,
            ),
        );
    }

    pub(crate) fn on_scroll(&self, scroll_y: f64, scroll_height: f64) {
        let viewport_height = self.ctx().geometry.viewport().height;
        let Some(percentage) = scroll_percentage(scroll_y, scroll_height, viewport_height) else {
            return;
        };
        let reached = self.state_mut().ladder.observe(percentage);
        for depth in reached {
            self.track(
                "scroll_depth",
                &depth.to_string(),
                &format!("{depth}%"),
                Map::new(),
            );
        }
    }

    pub(crate) fn on_heatmap_click(&self, target: &NodeRef) {
        // Text node targets report their parent element.
        let Some(element) = target
            .inclusive_ancestors()
            .find(|node| node.as_element().is_some())
        else {
            return;
        };
        let geometry = &self.ctx().geometry;
        let rect = geometry.bounding_rect(&element);
        let viewport = geometry.viewport();
        let (x, y) = rect.center();
        let text: String = dom::text(&element).chars().take(CLICK_TEXT_LIMIT).collect();
        self.track(
            "element_click",
            &dom::tag_name(&element),
            &text,
            extra!(
                "element_id" => non_empty_or(dom::attr(&element, "id").unwrap_or_default(), "no_id"),
                "element_class" => non_empty_or(dom::class_name(&element), "no_class"),
                "position_x" => x,
                "position_y" => y,
                "viewport_width" => viewport.width,
                "viewport_height" => viewport.height,
            ),
        );
    }

    pub(crate) fn on_field(&self, field: &NodeRef, event_name: &str) {
        let name = dom::attr(field, "name")
            .filter(|n| !n.is_empty())
            .or_else(|| dom::attr(field, "id"))
            .unwrap_or_default();
        self.track(event_name, &name, "form_interaction", Map::new());
    }

    /// Reports the submission and plays the success feedback; the form is
    /// never sent anywhere.
    pub(crate) fn on_form_submit(&self, form: &NodeRef) {
        let form_id = non_empty_or(
            dom::attr(form, "id").unwrap_or_default(),
            &self.config().default_form_id,
        );
        let summary = FormSummary::from_entries(&form_id, &dom::form_entries(form));
        self.track("form_submission", "success", &form_id, summary.to_extra());

        let Some(button) = forms::submit_button(form) else {
            debug!(%form_id, "form has no submit button; skipping feedback");
            return;
        };
        let label = forms::apply_success_feedback(&button);
        self.schedule_submit_reset(form.clone(), button, label);
    }
}
