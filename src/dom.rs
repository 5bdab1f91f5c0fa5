use kuchiki::traits::*;
use kuchiki::{NodeRef, Selectors};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("invalid selector {0:?}")]
    Selector(String),
}

/// Client rect of an element, viewport-relative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (i64, i64) {
        (
            (self.left + self.width / 2.0).round() as i64,
            (self.top + self.height / 2.0).round() as i64,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

/// Layout information a parsed tree cannot compute on its own.
pub trait Geometry {
    fn viewport(&self) -> Viewport;
    fn bounding_rect(&self, node: &NodeRef) -> Rect;
}

/// Host-supplied layout: one viewport and rects for the nodes that have one.
/// Nodes without a rect sit at the origin with zero size.
#[derive(Debug, Default)]
pub struct FixedGeometry {
    viewport: Viewport,
    rects: RefCell<Vec<(NodeRef, Rect)>>,
}

impl FixedGeometry {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            rects: RefCell::new(Vec::new()),
        }
    }

    pub fn set_rect(&self, node: &NodeRef, rect: Rect) {
        let mut rects = self.rects.borrow_mut();
        if let Some(slot) = rects.iter_mut().find(|(n, _)| n == node) {
            slot.1 = rect;
        } else {
            rects.push((node.clone(), rect));
        }
    }
}

impl Geometry for FixedGeometry {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn bounding_rect(&self, node: &NodeRef) -> Rect {
        self.rects
            .borrow()
            .iter()
            .find(|(n, _)| n == node)
            .map(|(_, rect)| *rect)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
enum ControlDefault {
    Input {
        value: Option<String>,
        checked: bool,
    },
    Textarea(String),
    Select(Vec<bool>),
}

/// Parsed host document plus the default state of its form controls.
pub struct Page {
    document: NodeRef,
    defaults: Vec<(NodeRef, ControlDefault)>,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let document = kuchiki::parse_html().one(html);
        let defaults = capture_defaults(&document);
        debug!(controls = defaults.len(), "parsed page");
        Self { document, defaults }
    }

    pub fn title(&self) -> String {
        self.document
            .select_first("title")
            .map(|t| t.as_node().text_contents().trim().to_string())
            .unwrap_or_default()
    }

    pub fn select_all(&self, selector: &str) -> Result<Vec<NodeRef>, PageError> {
        select_within(&self.document, selector)
    }

    pub fn select_first(&self, selector: &str) -> Result<Option<NodeRef>, PageError> {
        Ok(self.select_all(selector)?.into_iter().next())
    }

    pub fn by_id(&self, id: &str) -> Option<NodeRef> {
        self.document
            .descendants()
            .find(|node| attr(node, "id").as_deref() == Some(id))
    }

    /// Restores every control inside `form` to its parsed default.
    pub fn reset_form(&self, form: &NodeRef) {
        for (control, default) in &self.defaults {
            if !control.ancestors().any(|a| &a == form) {
                continue;
            }
            match default {
                ControlDefault::Input { value, checked } => {
                    match value {
                        Some(v) => set_attr(control, "value", v),
                        None => remove_attr(control, "value"),
                    }
                    if *checked {
                        set_attr(control, "checked", "");
                    } else {
                        remove_attr(control, "checked");
                    }
                }
                ControlDefault::Textarea(text) => set_text(control, text),
                ControlDefault::Select(selected) => {
                    for (option, was_selected) in options(control).iter().zip(selected) {
                        if *was_selected {
                            set_attr(option, "selected", "");
                        } else {
                            remove_attr(option, "selected");
                        }
                    }
                }
            }
        }
    }

    pub fn to_html(&self) -> String {
        self.document.to_string()
    }
}

fn capture_defaults(document: &NodeRef) -> Vec<(NodeRef, ControlDefault)> {
    let Ok(controls) = select_within(document, "input, select, textarea") else {
        return Vec::new();
    };
    controls
        .into_iter()
        .map(|control| {
            let default = match tag_name(&control).as_str() {
                "textarea" => ControlDefault::Textarea(control.text_contents()),
                "select" => ControlDefault::Select(
                    options(&control)
                        .iter()
                        .map(|o| has_attr(o, "selected"))
                        .collect(),
                ),
                _ => ControlDefault::Input {
                    value: attr(&control, "value"),
                    checked: has_attr(&control, "checked"),
                },
            };
            (control, default)
        })
        .collect()
}

pub fn compile(selector: &str) -> Result<Selectors, PageError> {
    Selectors::compile(selector).map_err(|_| PageError::Selector(selector.to_string()))
}

pub fn select_within(root: &NodeRef, selector: &str) -> Result<Vec<NodeRef>, PageError> {
    let nodes = root
        .select(selector)
        .map_err(|_| PageError::Selector(selector.to_string()))?;
    Ok(nodes.map(|n| n.as_node().clone()).collect())
}

pub fn matches(node: &NodeRef, selectors: &Selectors) -> bool {
    node.clone()
        .into_element_ref()
        .is_some_and(|el| selectors.matches(&el))
}

/// Nearest inclusive ancestor matching `selector`.
pub fn closest(node: &NodeRef, selector: &str) -> Option<NodeRef> {
    let selectors = compile(selector).ok()?;
    node.inclusive_ancestors().find(|n| matches(n, &selectors))
}

pub fn tag_name(node: &NodeRef) -> String {
    node.as_element()
        .map(|el| el.name.local.to_string().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn attr(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|el| el.attributes.borrow().get(name).map(str::to_string))
}

pub fn has_attr(node: &NodeRef, name: &str) -> bool {
    node.as_element()
        .is_some_and(|el| el.attributes.borrow().contains(name))
}

pub fn set_attr(node: &NodeRef, name: &str, value: &str) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().insert(name, value.to_string());
    }
}

pub fn remove_attr(node: &NodeRef, name: &str) {
    if let Some(el) = node.as_element() {
        el.attributes.borrow_mut().remove(name);
    }
}

pub fn class_name(node: &NodeRef) -> String {
    attr(node, "class").unwrap_or_default()
}

pub fn has_class(node: &NodeRef, class: &str) -> bool {
    class_name(node).split_whitespace().any(|c| c == class)
}

pub fn add_class(node: &NodeRef, class: &str) {
    if has_class(node, class) {
        return;
    }
    let mut classes: Vec<String> = class_name(node)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    classes.push(class.to_string());
    set_attr(node, "class", &classes.join(" "));
}

pub fn remove_class(node: &NodeRef, class: &str) {
    if !has_class(node, class) {
        return;
    }
    let current = class_name(node);
    let remaining: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
    set_attr(node, "class", &remaining.join(" "));
}

pub fn text(node: &NodeRef) -> String {
    node.text_contents()
}

pub fn set_text(node: &NodeRef, value: &str) {
    let existing: Vec<_> = node.children().collect();
    for child in existing {
        child.detach();
    }
    node.append(NodeRef::new_text(value));
}

pub fn style_property(node: &NodeRef, property: &str) -> Option<String> {
    style_declarations(node)
        .into_iter()
        .find(|(name, _)| name == property)
        .map(|(_, value)| value)
}

/// Sets one inline style property; an empty value removes it.
pub fn set_style_property(node: &NodeRef, property: &str, value: &str) {
    let mut declarations = style_declarations(node);
    declarations.retain(|(name, _)| name != property);
    if !value.is_empty() {
        declarations.push((property.to_string(), value.to_string()));
    }
    if declarations.is_empty() {
        remove_attr(node, "style");
    } else {
        let rendered = declarations
            .iter()
            .map(|(name, value)| format!("{name}: {value}"))
            .collect::<Vec<_>>()
            .join("; ");
        set_attr(node, "style", &rendered);
    }
}

fn style_declarations(node: &NodeRef) -> Vec<(String, String)> {
    attr(node, "style")
        .unwrap_or_default()
        .split(';')
        .filter_map(|decl| {
            let (name, value) = decl.split_once(':')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect()
}

fn options(select: &NodeRef) -> Vec<NodeRef> {
    select_within(select, "option").unwrap_or_default()
}

fn option_value(option: &NodeRef) -> String {
    attr(option, "value").unwrap_or_else(|| option.text_contents().trim().to_string())
}

/// Sets the live value of a control the way typing or picking would.
pub fn fill_control(control: &NodeRef, value: &str) {
    match tag_name(control).as_str() {
        "textarea" => set_text(control, value),
        "select" => {
            for option in options(control) {
                if option_value(&option) == value {
                    set_attr(&option, "selected", "");
                } else {
                    remove_attr(&option, "selected");
                }
            }
        }
        _ => set_attr(control, "value", value),
    }
}

pub fn set_checked(control: &NodeRef, checked: bool) {
    if checked {
        set_attr(control, "checked", "");
    } else {
        remove_attr(control, "checked");
    }
}

/// Name/value pairs a browser would submit for `form`, in tree order.
pub fn form_entries(form: &NodeRef) -> Vec<(String, String)> {
    let Ok(controls) = select_within(form, "input, select, textarea") else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for control in controls {
        let Some(name) = attr(&control, "name").filter(|n| !n.is_empty()) else {
            continue;
        };
        if has_attr(&control, "disabled")
            || control
                .ancestors()
                .any(|a| tag_name(&a) == "fieldset" && has_attr(&a, "disabled"))
        {
            continue;
        }
        match tag_name(&control).as_str() {
            "textarea" => entries.push((name, control.text_contents())),
            "select" => {
                let all = options(&control);
                let selected: Vec<&NodeRef> =
                    all.iter().filter(|o| has_attr(o, "selected")).collect();
                if selected.is_empty() {
                    if !has_attr(&control, "multiple")
                        && let Some(first) = all.first()
                    {
                        entries.push((name, option_value(first)));
                    }
                } else if has_attr(&control, "multiple") {
                    for option in selected {
                        entries.push((name.clone(), option_value(option)));
                    }
                } else if let Some(last) = selected.last() {
                    entries.push((name, option_value(last)));
                }
            }
            _ => {
                let kind = attr(&control, "type")
                    .unwrap_or_default()
                    .to_ascii_lowercase();
                match kind.as_str() {
                    "submit" | "button" | "reset" | "image" | "file" => {}
                    "checkbox" | "radio" => {
                        if has_attr(&control, "checked") {
                            let value = attr(&control, "value").unwrap_or_else(|| "on".into());
                            entries.push((name, value));
                        }
                    }
                    _ => entries.push((name, attr(&control, "value").unwrap_or_default())),
                }
            }
        }
    }
    entries
}
