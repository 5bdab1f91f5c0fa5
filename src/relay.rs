use crate::bindings::{
    BASE_BINDINGS, DomEvent, FORM_BINDINGS, HEATMAP_BINDINGS, Handler, Invocation, ListenerTable,
    SCROLL_BINDINGS,
};
use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::consent::{self, ConsentChoice, ConsentState, VerbosityTier};
use crate::dom::{self, Geometry, Page};
use crate::event::{DEFAULT_CATEGORY, EventRecord};
use crate::forms;
use crate::identity;
use crate::scroll::{ScrollDepthLadder, TimeOnPage};
use crate::sinks::{DataLayer, PageView, Sinks};
use crate::storage::KeyValueStore;
use kuchiki::NodeRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};
use tracing::{debug, info, warn};

pub const BANNER_ID: &str = "cookie-banner";
pub const BANNER_VISIBLE_CLASS: &str = "show";

/// Everything the relay needs from its host, injected once.
pub struct RelayContext {
    pub config: RelayConfig,
    pub page: Page,
    pub geometry: Rc<dyn Geometry>,
    /// Survives restarts (local storage).
    pub durable: Rc<dyn KeyValueStore>,
    /// Lives for one browsing session (session storage).
    pub session: Rc<dyn KeyValueStore>,
    pub sinks: Sinks,
    pub clock: Rc<dyn Clock>,
}

/// Requests for the host that a parsed tree cannot carry out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum PageEffect {
    ScrollIntoView { element_id: String },
    Alert { message: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub default_prevented: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct Armed {
    forms: bool,
    scroll: bool,
    heatmap: bool,
    milestones: bool,
}

pub(crate) struct RelayState {
    consent: ConsentState,
    tier: Option<VerbosityTier>,
    armed: Armed,
    listeners: ListenerTable,
    pub(crate) ladder: ScrollDepthLadder,
    pub(crate) effects: Vec<PageEffect>,
    pending_resets: Vec<PendingReset>,
    reset_generation: u64,
    initialized: bool,
}

/// A form showing submit feedback. Only the timer armed by the latest
/// submit (`generation`) may restore it.
struct PendingReset {
    form: NodeRef,
    label: String,
    generation: u64,
}

struct RelayInner {
    ctx: RelayContext,
    state: RefCell<RelayState>,
}

/// `Rc`-shared and single-threaded; its timers are `spawn_local` tasks, so
/// it must be driven inside a [`tokio::task::LocalSet`].
#[derive(Clone)]
pub struct Relay {
    inner: Rc<RelayInner>,
}

impl Relay {
    pub fn new(ctx: RelayContext) -> Self {
        Self {
            inner: Rc::new(RelayInner {
                ctx,
                state: RefCell::new(RelayState {
                    consent: ConsentState::Unset,
                    tier: None,
                    armed: Armed::default(),
                    listeners: ListenerTable::new(),
                    ladder: ScrollDepthLadder::default(),
                    effects: Vec::new(),
                    pending_resets: Vec::new(),
                    reset_generation: 0,
                    initialized: false,
                }),
            }),
        }
    }

    fn from_weak(weak: &Weak<RelayInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn ctx(&self) -> &RelayContext {
        &self.inner.ctx
    }

    pub(crate) fn state(&self) -> Ref<'_, RelayState> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, RelayState> {
        self.inner.state.borrow_mut()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.ctx.config
    }

    pub fn page(&self) -> &Page {
        &self.inner.ctx.page
    }

    pub fn data_layer(&self) -> &DataLayer {
        self.inner.ctx.sinks.data_layer()
    }

    pub fn consent(&self) -> ConsentState {
        self.state().consent
    }

    /// Most recently enabled tier; `None` before [`Relay::init`].
    pub fn tier(&self) -> Option<VerbosityTier> {
        self.state().tier
    }

    pub fn listener_count(&self) -> usize {
        self.state().listeners.len()
    }

    pub fn scroll_depths_fired(&self) -> Vec<u8> {
        self.state().ladder.fired()
    }

    pub fn take_effects(&self) -> Vec<PageEffect> {
        std::mem::take(&mut self.state_mut().effects)
    }

    /// Reads consent, installs page listeners, records the page view and
    /// arms the tier consent allows. Runs once; later calls are ignored.
    pub fn init(&self) {
        if self.state().initialized {
            warn!("relay already initialized");
            return;
        }
        self.state_mut().initialized = true;

        let consent = consent::load(&*self.ctx().durable);
        self.state_mut().consent = consent;
        if consent == ConsentState::Unset && self.page().by_id(BANNER_ID).is_some() {
            self.schedule_banner();
        }

        let installed = self
            .state_mut()
            .listeners
            .install(self.page(), BASE_BINDINGS);
        self.track_page_view();
        self.enable_verbosity(consent.tier());

        info!(
            ?consent,
            listeners = installed,
            cdp = self.ctx().sinks.has_cdp(),
            "consent relay initialized"
        );
    }

    pub fn session_id(&self) -> String {
        identity::session_id(&*self.ctx().session, &*self.ctx().clock)
    }

    pub fn user_id(&self) -> String {
        identity::user_id(&*self.ctx().durable, &*self.ctx().clock)
    }

    /// Stamps ids and time onto an event and hands it to every sink.
    pub fn track(&self, name: &str, action: &str, label: &str, extra: Map<String, Value>) {
        let record = EventRecord {
            name: name.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            action: action.to_string(),
            label: label.to_string(),
            timestamp: self.ctx().clock.iso_now(),
            session_id: self.session_id(),
            user_id: self.user_id(),
            extra,
        };
        self.ctx().sinks.emit(&record);
        debug!(
            event = %record.name,
            action = %record.action,
            label = %record.label,
            "event tracked"
        );
    }

    pub fn track_page_view(&self) {
        let ctx = self.ctx();
        let view = PageView {
            title: self.page().title(),
            url: ctx.config.page_url.to_string(),
            referrer: ctx.config.referrer.clone(),
            user_agent: ctx.config.user_agent.clone(),
            timestamp: ctx.clock.iso_now(),
        };
        ctx.sinks.emit_page_view(&view);
        debug!(title = %view.title, url = %view.url, "page view tracked");
    }

    /// Records the banner choice, hides the banner, reports the choice and
    /// then enables the tier it allows.
    pub fn set_consent(&self, choice: ConsentChoice) {
        if let Err(err) = consent::persist(&*self.ctx().durable, choice, &*self.ctx().clock) {
            warn!(%err, choice = choice.as_str(), "failed to persist consent");
        }
        self.state_mut().consent = choice.into();
        if let Some(banner) = self.page().by_id(BANNER_ID) {
            dom::remove_class(&banner, BANNER_VISIBLE_CLASS);
        }
        info!(choice = choice.as_str(), "consent recorded");

        self.track("cookie_consent", choice.as_str(), "user_preference", Map::new());
        self.enable_verbosity(choice.tier());
    }

    /// Arms the listeners of `tier`. Features already armed stay armed and
    /// are not armed twice.
    pub fn enable_verbosity(&self, tier: VerbosityTier) {
        let start_milestones = {
            let mut state = self.state_mut();
            let state = &mut *state;
            let page = self.page();
            state.tier = Some(tier);

            if !state.armed.forms {
                state.listeners.install(page, FORM_BINDINGS);
                state.armed.forms = true;
            }
            if tier == VerbosityTier::Full {
                if !state.armed.scroll {
                    state.listeners.install(page, SCROLL_BINDINGS);
                    state.armed.scroll = true;
                }
                if !state.armed.heatmap {
                    state.listeners.install(page, HEATMAP_BINDINGS);
                    state.armed.heatmap = true;
                }
            }
            let start = tier == VerbosityTier::Full && !state.armed.milestones;
            if start {
                state.armed.milestones = true;
            }
            start
        };
        if start_milestones {
            self.arm_milestones();
        }
        info!(?tier, "analytics tier enabled");
    }

    /// Runs every listener `event` reaches.
    pub fn dispatch(&self, event: DomEvent) -> DispatchOutcome {
        let invocations = self.state().listeners.route(&event);
        let mut outcome = DispatchOutcome {
            invoked: invocations.len(),
            default_prevented: false,
        };
        for invocation in &invocations {
            if self.invoke(invocation, &event) {
                outcome.default_prevented = true;
            }
        }
        outcome
    }

    /// Returns whether the handler suppressed the default action.
    fn invoke(&self, invocation: &Invocation, event: &DomEvent) -> bool {
        match invocation.handler {
            Handler::AcceptConsent => {
                self.set_consent(ConsentChoice::Accepted);
                return false;
            }
            Handler::DeclineConsent => {
                self.set_consent(ConsentChoice::Declined);
                return false;
            }
            Handler::PageTiming => {
                if let DomEvent::Load(timing) = event {
                    self.on_page_timing(timing);
                }
                return false;
            }
            Handler::ScriptError => {
                if let DomEvent::Error(fault) = event {
                    self.on_script_error(fault);
                }
                return false;
            }
            Handler::ScrollDepth => {
                if let DomEvent::Scroll {
                    scroll_y,
                    scroll_height,
                } = event
                {
                    self.on_scroll(*scroll_y, *scroll_height);
                }
                return false;
            }
            Handler::Heatmap => {
                if let Some(target) = event.target() {
                    self.on_heatmap_click(target);
                }
                return false;
            }
            _ => {}
        }

        let Some(current) = invocation.current.as_ref() else {
            return false;
        };
        match invocation.handler {
            Handler::Cta => self.on_cta(current),
            Handler::Navigation => self.on_navigation(current),
            Handler::Social => self.on_social(current),
            Handler::ProgramHover => self.on_program_hover(current),
            Handler::ProgramLearnMore => {
                self.on_program_learn_more(current);
                return true;
            }
            Handler::ModalClose => self.close_video_modal(),
            Handler::ModalBackdrop => {
                if event.target() == Some(current) {
                    self.close_video_modal();
                }
            }
            Handler::FieldFocus => self.on_field(current, "form_field_focus"),
            Handler::FieldBlur => self.on_field(current, "form_field_blur"),
            Handler::FormSubmit => {
                self.on_form_submit(current);
                return true;
            }
            _ => {}
        }
        false
    }

    pub(crate) fn push_effect(&self, effect: PageEffect) {
        debug!(?effect, "page effect requested");
        self.state_mut().effects.push(effect);
    }

    fn schedule_banner(&self) {
        let weak = Rc::downgrade(&self.inner);
        let delay = self.config().banner_delay();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(relay) = Relay::from_weak(&weak) {
                relay.show_banner_if_undecided();
            }
        });
    }

    fn show_banner_if_undecided(&self) {
        if self.consent() != ConsentState::Unset {
            return;
        }
        if let Some(banner) = self.page().by_id(BANNER_ID) {
            dom::add_class(&banner, BANNER_VISIBLE_CLASS);
            debug!("consent banner shown");
        }
    }

    fn arm_milestones(&self) {
        let weak = Rc::downgrade(&self.inner);
        let interval = self.config().milestone_interval();
        let step = self.config().milestone_interval_secs;
        tokio::task::spawn_local(async move {
            let mut time_on_page = TimeOnPage::new(step);
            while !time_on_page.finished() {
                tokio::time::sleep(interval).await;
                let Some(relay) = Relay::from_weak(&weak) else {
                    break;
                };
                for mark in time_on_page.tick() {
                    relay.track("time_on_page", &mark.to_string(), "seconds", Map::new());
                }
            }
        });
    }

    /// Records feedback on `form` and arms its reset. A form already showing
    /// feedback keeps its first label; earlier timers for it go stale.
    pub(crate) fn schedule_submit_reset(&self, form: NodeRef, button: NodeRef, label: String) {
        let generation = {
            let mut state = self.state_mut();
            state.reset_generation += 1;
            let generation = state.reset_generation;
            match state.pending_resets.iter().position(|p| p.form == form) {
                Some(pos) => state.pending_resets[pos].generation = generation,
                None => state.pending_resets.push(PendingReset {
                    form: form.clone(),
                    label,
                    generation,
                }),
            }
            generation
        };

        let weak = Rc::downgrade(&self.inner);
        let delay = self.config().submit_reset_delay();
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(relay) = Relay::from_weak(&weak) {
                relay.finish_submit_reset(&form, &button, generation);
            }
        });
    }

    fn finish_submit_reset(&self, form: &NodeRef, button: &NodeRef, generation: u64) {
        let original = {
            let mut state = self.state_mut();
            let Some(pos) = state
                .pending_resets
                .iter()
                .position(|p| &p.form == form && p.generation == generation)
            else {
                debug!(generation, "stale submit reset skipped");
                return;
            };
            state.pending_resets.remove(pos).label
        };
        self.page().reset_form(form);
        forms::revert_success_feedback(button, &original);
        debug!(label = %original, "form reset after submit");
    }

    pub fn debug_surface(&self) -> DebugSurface {
        DebugSurface {
            relay: self.clone(),
        }
    }
}

/// Inspection handle for hosts and tooling.
#[derive(Clone)]
pub struct DebugSurface {
    relay: Relay,
}

impl DebugSurface {
    pub fn track_event(&self, name: &str, action: &str, label: &str, extra: Map<String, Value>) {
        self.relay.track(name, action, label, extra);
    }

    pub fn session_id(&self) -> String {
        self.relay.session_id()
    }

    pub fn user_id(&self) -> String {
        self.relay.user_id()
    }

    pub fn enable_full_analytics(&self) {
        self.relay.enable_verbosity(VerbosityTier::Full);
    }

    pub fn enable_limited_analytics(&self) {
        self.relay.enable_verbosity(VerbosityTier::Limited);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{LoadTiming, ScriptFault};
    use crate::clock::RuntimeClock;
    use crate::dom::{FixedGeometry, Rect, Viewport};
    use crate::sinks::{CdpCall, CdpSdk, RecordingCdp};
    use crate::storage::{CONSENT_DATE_KEY, CONSENT_KEY, MemoryStore, UnavailableStore};
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::LocalSet;

    const LANDING: &str = r##"<html><head><title>MBA Programs</title></head><body>
        <div id="cookie-banner" class="cookie-banner">
          <button id="accept-cookies">Accept</button>
          <button id="decline-cookies">Decline</button>
        </div>
        <nav><a class="nav-link" href="#programs">Programs</a></nav>
        <section id="hero">
          <button id="hero-cta" class="btn btn-primary" data-tracking="hero_cta">Request Info</button>
          <button id="video" class="btn btn-secondary" data-tracking="video_cta"> Watch Video </button>
        </section>
        <section id="programs">
          <div class="program-card" data-tracking="program_mba">
            <h3>Full-time MBA</h3>
            <button id="learn" class="btn btn-outline">Learn More</button>
          </div>
        </section>
        <section id="form-section">
          <form id="lead-form">
            <input name="email" id="email">
            <input name="phone">
            <select name="interest"><option value="">Choose</option><option value="finance">Finance</option></select>
            <input type="checkbox" name="newsletter">
            <button type="submit" class="btn btn-primary">Submit</button>
          </form>
        </section>
        <footer><a class="social-link" data-tracking="social_linkedin" href="https://linkedin.com/school/x">LinkedIn</a></footer>
        <div id="video-modal" class="modal" style="display: none">
          <div class="modal-content" id="modal-content"><span class="close">x</span></div>
        </div>
        </body></html>"##;

    struct Harness {
        relay: Relay,
        durable: Rc<MemoryStore>,
        cdp: Rc<RecordingCdp>,
        geometry: Rc<FixedGeometry>,
    }

    fn harness(stored_consent: Option<&str>) -> Harness {
        harness_with(RelayConfig::default(), stored_consent)
    }

    fn harness_with(config: RelayConfig, stored_consent: Option<&str>) -> Harness {
        let durable = Rc::new(MemoryStore::new());
        if let Some(value) = stored_consent {
            durable.set(CONSENT_KEY, value).unwrap();
        }
        let cdp = Rc::new(RecordingCdp::new());
        let geometry = Rc::new(FixedGeometry::new(Viewport::default()));
        let relay = Relay::new(RelayContext {
            config,
            page: Page::parse(LANDING),
            geometry: geometry.clone(),
            durable: durable.clone(),
            session: Rc::new(MemoryStore::new()),
            sinks: Sinks::new(DataLayer::new(), Some(cdp.clone() as Rc<dyn CdpSdk>)),
            clock: Rc::new(RuntimeClock::new()),
        });
        Harness {
            relay,
            durable,
            cdp,
            geometry,
        }
    }

    fn node(relay: &Relay, selector: &str) -> NodeRef {
        relay.page().select_first(selector).unwrap().unwrap()
    }

    fn click(relay: &Relay, selector: &str) -> DispatchOutcome {
        relay.dispatch(DomEvent::Click(node(relay, selector)))
    }

    fn actions(relay: &Relay, event: &str) -> Vec<String> {
        relay
            .data_layer()
            .events_named(event)
            .iter()
            .map(|e| e["event_action"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    fn event_names(relay: &Relay) -> Vec<String> {
        relay
            .data_layer()
            .entries()
            .iter()
            .map(|e| e["event"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn init_picks_tier_from_stored_consent() {
        LocalSet::new()
            .run_until(async {
                for (stored, consent, tier) in [
                    (None, ConsentState::Unset, VerbosityTier::Limited),
                    (Some("declined"), ConsentState::Declined, VerbosityTier::Limited),
                    (Some("accepted"), ConsentState::Accepted, VerbosityTier::Full),
                ] {
                    let h = harness(stored);
                    h.relay.init();
                    assert_eq!(h.relay.consent(), consent);
                    assert_eq!(h.relay.tier(), Some(tier));

                    let state = h.relay.state();
                    let full = tier == VerbosityTier::Full;
                    assert!(state.listeners.has_handler(Handler::FormSubmit));
                    assert_eq!(state.listeners.has_handler(Handler::ScrollDepth), full);
                    assert_eq!(state.listeners.has_handler(Handler::Heatmap), full);
                }
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn init_records_one_page_view() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                h.relay.init();

                let views = h.relay.data_layer().events_named("page_view");
                assert_eq!(views.len(), 1);
                assert_eq!(views[0]["page_title"], json!("MBA Programs"));
                assert_eq!(views[0]["page_url"], json!("http://localhost/"));
                assert!(matches!(
                    &h.cdp.calls()[0],
                    CdpCall::Page { title, .. } if title == "MBA Programs"
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn banner_appears_after_delay_while_undecided() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let banner = node(&h.relay, "#cookie-banner");
                assert!(!dom::has_class(&banner, BANNER_VISIBLE_CLASS));

                tokio::time::sleep(Duration::from_millis(2001)).await;
                assert!(dom::has_class(&banner, BANNER_VISIBLE_CLASS));

                click(&h.relay, "#decline-cookies");
                assert!(!dom::has_class(&banner, BANNER_VISIBLE_CLASS));
                assert_eq!(actions(&h.relay, "cookie_consent"), vec!["declined"]);
                assert_eq!(h.relay.tier(), Some(VerbosityTier::Limited));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn banner_stays_hidden_once_decided() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Some("accepted"));
                h.relay.init();
                tokio::time::sleep(Duration::from_secs(5)).await;
                assert!(!dom::has_class(
                    &node(&h.relay, "#cookie-banner"),
                    BANNER_VISIBLE_CLASS
                ));

                let h = harness(None);
                h.relay.init();
                click(&h.relay, "#accept-cookies");
                tokio::time::sleep(Duration::from_secs(5)).await;
                assert!(!dom::has_class(
                    &node(&h.relay, "#cookie-banner"),
                    BANNER_VISIBLE_CLASS
                ));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn accepting_persists_and_arms_full_tier() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                click(&h.relay, "#accept-cookies");

                assert_eq!(
                    h.durable.get(CONSENT_KEY).unwrap().as_deref(),
                    Some("accepted")
                );
                assert!(h.durable.get(CONSENT_DATE_KEY).unwrap().is_some());
                assert_eq!(h.relay.consent(), ConsentState::Accepted);
                assert_eq!(h.relay.tier(), Some(VerbosityTier::Full));

                let consent = h.relay.data_layer().events_named("cookie_consent");
                assert_eq!(consent.len(), 1);
                assert_eq!(consent[0]["event_action"], json!("accepted"));
                assert_eq!(consent[0]["event_label"], json!("user_preference"));
                // the accept click itself is not part of the heatmap
                assert!(h.relay.data_layer().events_named("element_click").is_empty());

                click(&h.relay, "#hero-cta");
                let names = event_names(&h.relay);
                let consent_at = names.iter().position(|n| n == "cookie_consent").unwrap();
                let heatmap_at = names.iter().position(|n| n == "element_click").unwrap();
                assert!(consent_at < heatmap_at);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn form_submit_is_suppressed_and_resets() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let email = node(&h.relay, "#email");
                dom::fill_control(&email, "visitor@example.edu");

                let form = node(&h.relay, "#lead-form");
                let outcome = h.relay.dispatch(DomEvent::Submit(form.clone()));
                assert!(outcome.default_prevented);

                let submissions = h.relay.data_layer().events_named("form_submission");
                assert_eq!(submissions.len(), 1);
                let entry = &submissions[0];
                assert_eq!(entry["event_action"], json!("success"));
                assert_eq!(entry["event_label"], json!("lead-form"));
                assert_eq!(entry["form_fields"], json!(3));
                assert_eq!(entry["has_email"], json!("yes"));
                assert_eq!(entry["has_phone"], json!("no"));
                assert_eq!(entry["interest_area"], json!("not_specified"));
                assert_eq!(entry["newsletter_opt_in"], json!("no"));

                let button = node(&h.relay, "#lead-form button");
                assert_eq!(dom::text(&button), forms::SUCCESS_LABEL);
                assert!(dom::has_attr(&button, "disabled"));

                // a second submit inside the window keeps the original label
                h.relay.dispatch(DomEvent::Submit(form.clone()));
                assert_eq!(h.relay.data_layer().events_named("form_submission").len(), 2);

                tokio::time::sleep(Duration::from_millis(3001)).await;
                assert_eq!(dom::text(&button), "Submit");
                assert!(!dom::has_attr(&button, "disabled"));
                assert!(!dom::has_attr(&email, "value"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn resubmits_restart_the_feedback_window() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let form = node(&h.relay, "#lead-form");
                let button = node(&h.relay, "#lead-form button");
                let submit = || {
                    h.relay.dispatch(DomEvent::Submit(form.clone()));
                };

                submit();
                tokio::time::sleep(Duration::from_secs(2)).await;
                submit();
                tokio::time::sleep(Duration::from_millis(1500)).await;
                // the first timer is stale once the form was submitted again
                assert_eq!(dom::text(&button), forms::SUCCESS_LABEL);

                tokio::time::sleep(Duration::from_millis(500)).await;
                submit();
                tokio::time::sleep(Duration::from_millis(1500)).await;
                assert_eq!(dom::text(&button), forms::SUCCESS_LABEL);
                assert!(dom::has_attr(&button, "disabled"));

                tokio::time::sleep(Duration::from_millis(1600)).await;
                assert_eq!(dom::text(&button), "Submit");
                assert!(!dom::has_attr(&button, "disabled"));
                assert_eq!(h.relay.data_layer().events_named("form_submission").len(), 3);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_thresholds_fire_once_each() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Some("accepted"));
                h.relay.init();
                let scroll = |y: f64| {
                    h.relay.dispatch(DomEvent::Scroll {
                        scroll_y: y,
                        scroll_height: 2800.0,
                    });
                };

                scroll(100.0);
                assert!(actions(&h.relay, "scroll_depth").is_empty());
                scroll(500.0);
                scroll(1000.0);
                scroll(0.0);
                scroll(1000.0);
                assert_eq!(actions(&h.relay, "scroll_depth"), vec!["25", "50"]);

                scroll(2000.0);
                scroll(2000.0);
                assert_eq!(
                    actions(&h.relay, "scroll_depth"),
                    vec!["25", "50", "75", "90", "100"]
                );
                let last = h.relay.data_layer().events_named("scroll_depth");
                assert_eq!(last[4]["event_label"], json!("100%"));
                assert_eq!(h.relay.scroll_depths_fired(), vec![25, 50, 75, 90, 100]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn limited_tier_ignores_scroll() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Some("declined"));
                h.relay.init();
                let outcome = h.relay.dispatch(DomEvent::Scroll {
                    scroll_y: 2000.0,
                    scroll_height: 2800.0,
                });
                assert_eq!(outcome.invoked, 0);
                assert!(h.relay.data_layer().events_named("scroll_depth").is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn time_milestones_follow_the_clock() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Some("accepted"));
                h.relay.init();

                tokio::time::sleep(Duration::from_secs(29)).await;
                assert!(actions(&h.relay, "time_on_page").is_empty());

                tokio::time::sleep(Duration::from_secs(100)).await;
                assert_eq!(actions(&h.relay, "time_on_page"), vec!["30", "60", "120"]);
                let first = &h.relay.data_layer().events_named("time_on_page")[0];
                assert_eq!(first["event_label"], json!("seconds"));

                // re-enabling does not start a second timer
                h.relay.enable_verbosity(VerbosityTier::Full);
                tokio::time::sleep(Duration::from_secs(200)).await;
                assert_eq!(actions(&h.relay, "time_on_page").len(), 3);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn uneven_milestone_interval_still_reports_every_mark() {
        LocalSet::new()
            .run_until(async {
                let config = RelayConfig::from_toml_str("milestone_interval_secs = 7").unwrap();
                let h = harness_with(config, Some("accepted"));
                h.relay.init();

                tokio::time::sleep(Duration::from_secs(34)).await;
                assert!(actions(&h.relay, "time_on_page").is_empty());
                tokio::time::sleep(Duration::from_secs(2)).await;
                assert_eq!(actions(&h.relay, "time_on_page"), vec!["30"]);

                tokio::time::sleep(Duration::from_secs(300)).await;
                assert_eq!(actions(&h.relay, "time_on_page"), vec!["30", "60", "120"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn without_cdp_events_still_reach_data_layer() {
        LocalSet::new()
            .run_until(async {
                let relay = Relay::new(RelayContext {
                    config: RelayConfig::default(),
                    page: Page::parse(LANDING),
                    geometry: Rc::new(FixedGeometry::default()),
                    durable: Rc::new(UnavailableStore),
                    session: Rc::new(UnavailableStore),
                    sinks: Sinks::new(DataLayer::new(), None),
                    clock: Rc::new(RuntimeClock::new()),
                });
                relay.init();
                assert_eq!(relay.consent(), ConsentState::Unset);

                relay.debug_surface().track_event(
                    "custom_check",
                    "debug",
                    "manual",
                    crate::extra!("source" => "console"),
                );
                let manual = relay.data_layer().events_named("custom_check");
                assert_eq!(manual.len(), 1);
                assert_eq!(manual[0]["source"], json!("console"));
                assert_eq!(manual[0]["event_category"], json!("engagement"));
                assert!(manual[0]["session_id"].as_str().unwrap().starts_with("session_"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn ids_are_stable_until_storage_clears() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                let debug = h.relay.debug_surface();
                let user = debug.user_id();
                assert!(user.starts_with("user_"));
                assert_eq!(debug.user_id(), user);
                assert_eq!(debug.session_id(), h.relay.session_id());

                h.durable.clear().unwrap();
                assert_ne!(debug.user_id(), user);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn hero_cta_reports_position_and_scrolls_to_form() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let hero = node(&h.relay, "#hero-cta");
                h.geometry.set_rect(
                    &hero,
                    Rect {
                        left: 40.0,
                        top: 600.0,
                        width: 200.0,
                        height: 48.0,
                    },
                );
                click(&h.relay, "#hero-cta");

                let cta = &h.relay.data_layer().events_named("cta_click")[0];
                assert_eq!(cta["event_action"], json!("hero_cta"));
                assert_eq!(cta["event_label"], json!("Request Info"));
                assert_eq!(cta["button_type"], json!("primary"));
                assert_eq!(cta["button_position"], json!("bottom"));
                assert_eq!(cta["page_section"], json!("hero"));
                assert_eq!(
                    h.relay.take_effects(),
                    vec![PageEffect::ScrollIntoView {
                        element_id: "form-section".into()
                    }]
                );
                assert!(h.relay.take_effects().is_empty());
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn video_modal_opens_and_closes() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let modal = node(&h.relay, "#video-modal");

                click(&h.relay, "#video");
                assert_eq!(dom::style_property(&modal, "display").as_deref(), Some("block"));
                let opened = &h.relay.data_layer().events_named("video_modal_open")[0];
                assert_eq!(opened["event_action"], json!("program_video"));
                assert_eq!(opened["event_label"], json!("ASU MBA Overview"));

                // clicks inside the content do not count as the backdrop
                click(&h.relay, "#modal-content");
                assert_eq!(dom::style_property(&modal, "display").as_deref(), Some("block"));

                click(&h.relay, ".close");
                assert_eq!(dom::style_property(&modal, "display").as_deref(), Some("none"));
                assert_eq!(h.relay.data_layer().events_named("video_modal_close").len(), 1);

                click(&h.relay, "#video-modal");
                assert_eq!(h.relay.data_layer().events_named("video_modal_close").len(), 2);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn learn_more_is_suppressed_with_alert() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let outcome = click(&h.relay, "#learn");
                assert!(outcome.default_prevented);

                let learn = &h.relay.data_layer().events_named("program_learn_more")[0];
                assert_eq!(learn["event_action"], json!("program_mba"));
                assert_eq!(learn["program_name"], json!("Full-time MBA"));
                assert_eq!(learn["card_position"], json!("top"));
                assert!(matches!(
                    h.relay.take_effects().as_slice(),
                    [PageEffect::Alert { message }] if message.starts_with("Learn more about Full-time MBA")
                ));

                h.relay
                    .dispatch(DomEvent::MouseEnter(node(&h.relay, ".program-card")));
                assert_eq!(actions(&h.relay, "program_card_hover"), vec!["program_mba"]);
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn links_report_destination() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                click(&h.relay, ".nav-link");
                click(&h.relay, ".social-link");

                let nav = &h.relay.data_layer().events_named("navigation_click")[0];
                assert_eq!(nav["event_label"], json!("Programs"));
                assert_eq!(nav["link_url"], json!("http://localhost/#programs"));
                assert_eq!(nav["link_position"], json!("header_nav"));

                let social = &h.relay.data_layer().events_named("social_click")[0];
                assert_eq!(social["event_action"], json!("linkedin"));
                assert_eq!(social["platform"], json!("linkedin"));
                assert_eq!(social["link_position"], json!("footer"));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn heatmap_reports_click_geometry() {
        LocalSet::new()
            .run_until(async {
                let h = harness(Some("accepted"));
                h.relay.init();
                let video = node(&h.relay, "#video");
                h.geometry.set_rect(
                    &video,
                    Rect {
                        left: 100.0,
                        top: 50.0,
                        width: 200.0,
                        height: 40.0,
                    },
                );
                // a text node target reports its element
                let text = video.first_child().unwrap();
                h.relay.dispatch(DomEvent::Click(text));

                let click = &h.relay.data_layer().events_named("element_click")[0];
                assert_eq!(click["event_action"], json!("button"));
                assert_eq!(click["element_id"], json!("video"));
                assert_eq!(click["element_class"], json!("btn btn-secondary"));
                assert_eq!(click["position_x"], json!(200));
                assert_eq!(click["position_y"], json!(70));
                assert_eq!(click["viewport_width"], json!(1280.0));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn window_events_track_timing_and_errors() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                h.relay.dispatch(DomEvent::Load(LoadTiming {
                    dom_content_loaded_ms: 420,
                    load_event_end_ms: 910,
                }));
                h.relay.dispatch(DomEvent::Error(ScriptFault {
                    message: "x is not defined".into(),
                    filename: "app.js".into(),
                    line: 12,
                    column: 4,
                }));

                let timing = &h.relay.data_layer().events_named("page_load_time")[0];
                assert_eq!(timing["event_label"], json!("910ms"));
                assert_eq!(timing["dom_content_loaded"], json!(420));

                let error = &h.relay.data_layer().events_named("javascript_error")[0];
                assert_eq!(error["event_action"], json!("error"));
                assert_eq!(error["error_filename"], json!("app.js"));
                assert_eq!(error["error_lineno"], json!(12));
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn field_focus_and_blur_are_tracked() {
        LocalSet::new()
            .run_until(async {
                let h = harness(None);
                h.relay.init();
                let email = node(&h.relay, "#email");
                h.relay.dispatch(DomEvent::Focus(email.clone()));
                h.relay.dispatch(DomEvent::Blur(email));

                assert_eq!(actions(&h.relay, "form_field_focus"), vec!["email"]);
                let blur = &h.relay.data_layer().events_named("form_field_blur")[0];
                assert_eq!(blur["event_label"], json!("form_interaction"));
            })
            .await;
    }
}
