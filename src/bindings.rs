use crate::dom::{self, Page};
use kuchiki::NodeRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Click,
    MouseEnter,
    Focus,
    Blur,
    Submit,
    Scroll,
    Load,
    Error,
}

impl EventKind {
    /// Whether ancestors of the target also hear the event.
    pub fn bubbles(self) -> bool {
        matches!(self, EventKind::Click | EventKind::Submit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Window,
    Document,
    Selector(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    AcceptConsent,
    DeclineConsent,
    Cta,
    Navigation,
    Social,
    ProgramHover,
    ProgramLearnMore,
    ModalClose,
    ModalBackdrop,
    PageTiming,
    ScriptError,
    ScrollDepth,
    Heatmap,
    FieldFocus,
    FieldBlur,
    FormSubmit,
}

#[derive(Debug, Clone, Copy)]
pub struct Binding {
    pub scope: Scope,
    pub kind: EventKind,
    pub handler: Handler,
}

const fn bind(scope: Scope, kind: EventKind, handler: Handler) -> Binding {
    Binding {
        scope,
        kind,
        handler,
    }
}

/// Listeners installed at startup regardless of consent.
pub const BASE_BINDINGS: &[Binding] = &[
    bind(Scope::Selector("#accept-cookies"), EventKind::Click, Handler::AcceptConsent),
    bind(Scope::Selector("#decline-cookies"), EventKind::Click, Handler::DeclineConsent),
    bind(Scope::Selector("[data-tracking]"), EventKind::Click, Handler::Cta),
    bind(Scope::Selector(".nav-link"), EventKind::Click, Handler::Navigation),
    bind(Scope::Selector(".social-link"), EventKind::Click, Handler::Social),
    bind(Scope::Selector(".program-card"), EventKind::MouseEnter, Handler::ProgramHover),
    bind(
        Scope::Selector(".program-card .btn-outline"),
        EventKind::Click,
        Handler::ProgramLearnMore,
    ),
    bind(Scope::Selector(".close"), EventKind::Click, Handler::ModalClose),
    bind(Scope::Selector("#video-modal"), EventKind::Click, Handler::ModalBackdrop),
    bind(Scope::Window, EventKind::Load, Handler::PageTiming),
    bind(Scope::Window, EventKind::Error, Handler::ScriptError),
];

pub const FORM_BINDINGS: &[Binding] = &[
    bind(Scope::Selector("form input, form select, form textarea"), EventKind::Focus, Handler::FieldFocus),
    bind(Scope::Selector("form input, form select, form textarea"), EventKind::Blur, Handler::FieldBlur),
    bind(Scope::Selector("form"), EventKind::Submit, Handler::FormSubmit),
];

pub const SCROLL_BINDINGS: &[Binding] =
    &[bind(Scope::Window, EventKind::Scroll, Handler::ScrollDepth)];

pub const HEATMAP_BINDINGS: &[Binding] =
    &[bind(Scope::Document, EventKind::Click, Handler::Heatmap)];

/// Navigation timings reported by the host at window load, in ms since
/// navigation start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadTiming {
    pub dom_content_loaded_ms: u64,
    pub load_event_end_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptFault {
    pub message: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

#[derive(Debug, Clone)]
pub enum DomEvent {
    Click(NodeRef),
    MouseEnter(NodeRef),
    Focus(NodeRef),
    Blur(NodeRef),
    Submit(NodeRef),
    Scroll { scroll_y: f64, scroll_height: f64 },
    Load(LoadTiming),
    Error(ScriptFault),
}

impl DomEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DomEvent::Click(_) => EventKind::Click,
            DomEvent::MouseEnter(_) => EventKind::MouseEnter,
            DomEvent::Focus(_) => EventKind::Focus,
            DomEvent::Blur(_) => EventKind::Blur,
            DomEvent::Submit(_) => EventKind::Submit,
            DomEvent::Scroll { .. } => EventKind::Scroll,
            DomEvent::Load(_) => EventKind::Load,
            DomEvent::Error(_) => EventKind::Error,
        }
    }

    pub fn target(&self) -> Option<&NodeRef> {
        match self {
            DomEvent::Click(node)
            | DomEvent::MouseEnter(node)
            | DomEvent::Focus(node)
            | DomEvent::Blur(node)
            | DomEvent::Submit(node) => Some(node),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Anchor {
    Window,
    Document,
    Node(NodeRef),
}

#[derive(Debug, Clone)]
struct Listener {
    anchor: Anchor,
    kind: EventKind,
    handler: Handler,
}

/// A handler to run for one dispatched event. `current` is the node the
/// listener sits on, absent for window and document listeners.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub handler: Handler,
    pub current: Option<NodeRef>,
}

#[derive(Debug, Default)]
pub struct ListenerTable {
    listeners: Vec<Listener>,
}

impl ListenerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Resolves `bindings` against the page and installs one listener per
    /// matched node. Returns how many listeners were added.
    pub fn install(&mut self, page: &Page, bindings: &[Binding]) -> usize {
        let before = self.listeners.len();
        for binding in bindings {
            match binding.scope {
                Scope::Window => self.push(Anchor::Window, binding),
                Scope::Document => self.push(Anchor::Document, binding),
                Scope::Selector(selector) => match page.select_all(selector) {
                    Ok(nodes) if nodes.is_empty() => {
                        debug!(%selector, handler = ?binding.handler, "no elements; listener skipped");
                    }
                    Ok(nodes) => {
                        for node in nodes {
                            self.push(Anchor::Node(node), binding);
                        }
                    }
                    Err(err) => warn!(%selector, %err, "binding selector rejected"),
                },
            }
        }
        self.listeners.len() - before
    }

    fn push(&mut self, anchor: Anchor, binding: &Binding) {
        self.listeners.push(Listener {
            anchor,
            kind: binding.kind,
            handler: binding.handler,
        });
    }

    pub fn has_handler(&self, handler: Handler) -> bool {
        self.listeners.iter().any(|l| l.handler == handler)
    }

    /// Listeners hit by `event`, in the order a browser would invoke them:
    /// the target, then its ancestors for bubbling events, then document,
    /// then window. Registration order holds within one anchor.
    pub fn route(&self, event: &DomEvent) -> Vec<Invocation> {
        let kind = event.kind();
        let mut invocations = Vec::new();

        if let Some(target) = event.target() {
            let path: Vec<NodeRef> = if kind.bubbles() {
                target.inclusive_ancestors().collect()
            } else {
                vec![target.clone()]
            };
            for node in &path {
                for listener in self.listeners.iter().filter(|l| l.kind == kind) {
                    if let Anchor::Node(anchor) = &listener.anchor
                        && anchor == node
                    {
                        invocations.push(Invocation {
                            handler: listener.handler,
                            current: Some(node.clone()),
                        });
                    }
                }
            }
            if kind.bubbles() {
                invocations.extend(self.anchored(kind, |a| matches!(a, Anchor::Document)));
            }
        } else {
            invocations.extend(self.anchored(kind, |a| matches!(a, Anchor::Window)));
        }
        invocations
    }

    fn anchored<'a>(
        &'a self,
        kind: EventKind,
        pick: impl Fn(&Anchor) -> bool + 'a,
    ) -> impl Iterator<Item = Invocation> + 'a {
        self.listeners
            .iter()
            .filter(move |l| l.kind == kind && pick(&l.anchor))
            .map(|l| Invocation {
                handler: l.handler,
                current: None,
            })
    }
}

/// Tracking id carried by an element, empty when it has none.
pub fn tracking_id(node: &NodeRef) -> String {
    dom::attr(node, "data-tracking").unwrap_or_default()
}
