use crate::bindings::{DomEvent, LoadTiming, ScriptFault};
use crate::consent::{ConsentState, VerbosityTier};
use crate::dom::{self, FixedGeometry, PageError, Rect};
use crate::relay::{PageEffect, Relay};
use crate::sinks::{CdpCall, RecordingCdp};
use kuchiki::NodeRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("scenario is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("reading scenario failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("no element matches {0:?}")]
    UnknownSelector(String),
    #[error(transparent)]
    Page(#[from] PageError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub rects: Vec<RectSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Extra time to let pending timers run after the last step.
    #[serde(default)]
    pub settle_ms: u64,
}

/// Layout for every element matching `selector`.
#[derive(Debug, Clone, Deserialize)]
pub struct RectSpec {
    pub selector: String,
    #[serde(flatten)]
    pub rect: Rect,
}

fn checked_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    Click { selector: String },
    Hover { selector: String },
    Focus { selector: String },
    Blur { selector: String },
    Fill { selector: String, value: String },
    Check {
        selector: String,
        #[serde(default = "checked_default")]
        checked: bool,
    },
    Submit { selector: String },
    Scroll { y: f64, height: f64 },
    Load {
        #[serde(flatten)]
        timing: LoadTiming,
    },
    Error {
        #[serde(flatten)]
        fault: ScriptFault,
    },
    Wait { ms: u64 },
}

impl Scenario {
    pub fn from_toml_str(raw: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

/// Applies the layout, initializes the relay, then plays every step.
pub async fn run(
    relay: &Relay,
    geometry: &FixedGeometry,
    scenario: &Scenario,
) -> Result<(), ScenarioError> {
    for spec in &scenario.rects {
        for node in relay.page().select_all(&spec.selector)? {
            geometry.set_rect(&node, spec.rect);
        }
    }

    relay.init();

    for (index, step) in scenario.steps.iter().enumerate() {
        debug!(index, ?step, "scenario step");
        play(relay, step).await?;
    }

    if scenario.settle_ms > 0 {
        tokio::time::sleep(Duration::from_millis(scenario.settle_ms)).await;
    }
    info!(
        steps = scenario.steps.len(),
        events = relay.data_layer().len(),
        "scenario finished"
    );
    Ok(())
}

async fn play(relay: &Relay, step: &Step) -> Result<(), ScenarioError> {
    match step {
        Step::Click { selector } => click(relay, &find(relay, selector)?),
        Step::Hover { selector } => {
            relay.dispatch(DomEvent::MouseEnter(find(relay, selector)?));
        }
        Step::Focus { selector } => {
            relay.dispatch(DomEvent::Focus(find(relay, selector)?));
        }
        Step::Blur { selector } => {
            relay.dispatch(DomEvent::Blur(find(relay, selector)?));
        }
        Step::Fill { selector, value } => dom::fill_control(&find(relay, selector)?, value),
        Step::Check { selector, checked } => {
            dom::set_checked(&find(relay, selector)?, *checked)
        }
        Step::Submit { selector } => {
            relay.dispatch(DomEvent::Submit(find(relay, selector)?));
        }
        Step::Scroll { y, height } => {
            relay.dispatch(DomEvent::Scroll {
                scroll_y: *y,
                scroll_height: *height,
            });
        }
        Step::Load { timing } => {
            relay.dispatch(DomEvent::Load(*timing));
        }
        Step::Error { fault } => {
            relay.dispatch(DomEvent::Error(fault.clone()));
        }
        Step::Wait { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
    }
    Ok(())
}

fn find(relay: &Relay, selector: &str) -> Result<NodeRef, ScenarioError> {
    relay
        .page()
        .select_first(selector)?
        .ok_or_else(|| ScenarioError::UnknownSelector(selector.to_string()))
}

/// A user click: disabled controls ignore it, and a submit button that is
/// not prevented goes on to submit its form.
fn click(relay: &Relay, target: &NodeRef) {
    if dom::has_attr(target, "disabled") {
        debug!("click on disabled control ignored");
        return;
    }
    let outcome = relay.dispatch(DomEvent::Click(target.clone()));
    if outcome.default_prevented {
        return;
    }
    let submitter = dom::closest(target, r#"button[type="submit"], input[type="submit"]"#);
    if let Some(submitter) = submitter
        && let Some(form) = dom::closest(&submitter, "form")
    {
        relay.dispatch(DomEvent::Submit(form));
    }
}

/// Everything a replay left behind, ready to print.
#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub session_id: String,
    pub user_id: String,
    pub consent: ConsentState,
    pub tier: Option<VerbosityTier>,
    pub scroll_depths: Vec<u8>,
    pub data_layer: Vec<Value>,
    pub cdp_calls: Vec<CdpCall>,
    pub effects: Vec<PageEffect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl ScenarioReport {
    pub fn collect(relay: &Relay, cdp: Option<&RecordingCdp>, include_html: bool) -> Self {
        Self {
            session_id: relay.session_id(),
            user_id: relay.user_id(),
            consent: relay.consent(),
            tier: relay.tier(),
            scroll_depths: relay.scroll_depths_fired(),
            data_layer: relay.data_layer().entries(),
            cdp_calls: cdp.map(RecordingCdp::calls).unwrap_or_default(),
            effects: relay.take_effects(),
            html: include_html.then(|| relay.page().to_html()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::RuntimeClock;
    use crate::config::RelayConfig;
    use crate::dom::Page;
    use crate::relay::RelayContext;
    use crate::sinks::{CdpSdk, DataLayer, Sinks};
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::rc::Rc;
    use tokio::task::LocalSet;

    const LANDING: &str = include_str!("../demos/landing.html");
    const VISIT: &str = include_str!("../demos/visit.toml");

    fn event_actions(report: &ScenarioReport, event: &str) -> Vec<String> {
        report
            .data_layer
            .iter()
            .filter(|e| e["event"] == json!(event))
            .map(|e| e["event_action"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn replays_demo_visit() {
        LocalSet::new()
            .run_until(async {
                let cdp = Rc::new(RecordingCdp::new());
                let geometry = Rc::new(FixedGeometry::default());
                let relay = Relay::new(RelayContext {
                    config: RelayConfig::default(),
                    page: Page::parse(LANDING),
                    geometry: geometry.clone(),
                    durable: Rc::new(MemoryStore::new()),
                    session: Rc::new(MemoryStore::new()),
                    sinks: Sinks::new(DataLayer::new(), Some(cdp.clone() as Rc<dyn CdpSdk>)),
                    clock: Rc::new(RuntimeClock::new()),
                });
                let scenario = Scenario::from_toml_str(VISIT).unwrap();
                run(&relay, &geometry, &scenario).await.unwrap();

                let report = ScenarioReport::collect(&relay, Some(&cdp), true);
                assert_eq!(report.consent, ConsentState::Accepted);
                assert_eq!(report.tier, Some(VerbosityTier::Full));
                assert_eq!(report.scroll_depths, vec![25, 50, 75, 90, 100]);
                assert_eq!(event_actions(&report, "cookie_consent"), vec!["accepted"]);
                assert_eq!(event_actions(&report, "time_on_page"), vec!["30"]);
                assert_eq!(event_actions(&report, "page_load_time"), vec!["performance"]);
                assert_eq!(
                    event_actions(&report, "program_card_hover"),
                    vec!["program_full_time"]
                );

                let submissions: Vec<&Value> = report
                    .data_layer
                    .iter()
                    .filter(|e| e["event"] == json!("form_submission"))
                    .collect();
                assert_eq!(submissions.len(), 1);
                assert_eq!(submissions[0]["form_fields"], json!(6));
                assert_eq!(submissions[0]["interest_area"], json!("finance"));
                assert_eq!(submissions[0]["experience_level"], json!("not_specified"));
                assert_eq!(submissions[0]["newsletter_opt_in"], json!("yes"));

                let button = relay
                    .page()
                    .select_first("#lead-form button")
                    .unwrap()
                    .unwrap();
                assert_eq!(dom::text(&button), "Request Info");
                assert!(matches!(report.cdp_calls[0], CdpCall::Page { .. }));
                assert_eq!(
                    report.cdp_calls.len(),
                    report.data_layer.len(),
                    "every entry is mirrored to the CDP"
                );
                assert!(report.html.as_deref().unwrap().contains("cookie-banner"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_selector_stops_replay() {
        LocalSet::new()
            .run_until(async {
                let geometry = Rc::new(FixedGeometry::default());
                let relay = Relay::new(RelayContext {
                    config: RelayConfig::default(),
                    page: Page::parse(LANDING),
                    geometry: geometry.clone(),
                    durable: Rc::new(MemoryStore::new()),
                    session: Rc::new(MemoryStore::new()),
                    sinks: Sinks::new(DataLayer::new(), None),
                    clock: Rc::new(RuntimeClock::new()),
                });
                let scenario = Scenario::from_toml_str(
                    r##"
                    [[steps]]
                    kind = "click"
                    selector = "#missing"
                    "##,
                )
                .unwrap();
                let err = run(&relay, &geometry, &scenario).await.unwrap_err();
                assert!(matches!(err, ScenarioError::UnknownSelector(s) if s == "#missing"));
            })
            .await;
    }

    #[test]
    fn parses_steps_and_rects() {
        let scenario = Scenario::from_toml_str(
            r##"
            settle_ms = 3500

            [[rects]]
            selector = "#hero-cta"
            top = 120.0
            height = 48.0

            [[steps]]
            kind = "click"
            selector = "#accept-cookies"

            [[steps]]
            kind = "check"
            selector = "[name=newsletter]"

            [[steps]]
            kind = "load"
            dom_content_loaded_ms = 420
            load_event_end_ms = 910

            [[steps]]
            kind = "error"
            message = "boom"

            [[steps]]
            kind = "wait"
            ms = 30000
            "##,
        )
        .unwrap();

        assert_eq!(scenario.settle_ms, 3500);
        assert_eq!(scenario.rects[0].rect.top, 120.0);
        assert_eq!(scenario.rects[0].rect.width, 0.0);
        assert_eq!(
            scenario.steps[1],
            Step::Check {
                selector: "[name=newsletter]".into(),
                checked: true
            }
        );
        assert_eq!(
            scenario.steps[2],
            Step::Load {
                timing: LoadTiming {
                    dom_content_loaded_ms: 420,
                    load_event_end_ms: 910
                }
            }
        );
        match &scenario.steps[3] {
            Step::Error { fault } => {
                assert_eq!(fault.message, "boom");
                assert_eq!(fault.line, 0);
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(scenario.steps[4], Step::Wait { ms: 30000 });
    }

    #[test]
    fn unknown_step_kind_is_rejected() {
        let err = Scenario::from_toml_str(
            r#"
            [[steps]]
            kind = "teleport"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ScenarioError::Parse(_)));
    }
}
