use crate::event::EventRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink rejected call: {0}")]
    Rejected(String),
}

/// Append-only tag-manager queue (`dataLayer`). Cloning shares the queue.
#[derive(Debug, Clone, Default)]
pub struct DataLayer {
    entries: Rc<RefCell<Vec<Value>>>,
}

impl DataLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: Value) {
        self.entries.borrow_mut().push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn entries(&self) -> Vec<Value> {
        self.entries.borrow().clone()
    }

    /// Entries whose `event` key equals `name`.
    pub fn events_named(&self, name: &str) -> Vec<Value> {
        self.entries
            .borrow()
            .iter()
            .filter(|entry| entry.get("event").and_then(Value::as_str) == Some(name))
            .cloned()
            .collect()
    }
}

/// Customer-data-platform client surface.
pub trait CdpSdk {
    fn ready(&self, callback: Box<dyn FnOnce()>);
    fn page(&self, title: &str, properties: Value) -> Result<(), SinkError>;
    fn track(&self, name: &str, properties: Value) -> Result<(), SinkError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum CdpCall {
    Page { title: String, properties: Value },
    Track { name: String, properties: Value },
}

/// Mock CDP client that logs every call and keeps it for inspection.
#[derive(Debug, Default)]
pub struct RecordingCdp {
    calls: RefCell<Vec<CdpCall>>,
}

impl RecordingCdp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<CdpCall> {
        self.calls.borrow().clone()
    }
}

impl CdpSdk for RecordingCdp {
    fn ready(&self, callback: Box<dyn FnOnce()>) {
        callback();
    }

    fn page(&self, title: &str, properties: Value) -> Result<(), SinkError> {
        info!(target: "consent_relay.cdp", %title, %properties, "cdp page");
        self.calls.borrow_mut().push(CdpCall::Page {
            title: title.to_string(),
            properties,
        });
        Ok(())
    }

    fn track(&self, name: &str, properties: Value) -> Result<(), SinkError> {
        info!(target: "consent_relay.cdp", %name, %properties, "cdp track");
        self.calls.borrow_mut().push(CdpCall::Track {
            name: name.to_string(),
            properties,
        });
        Ok(())
    }
}

/// Both outbound sinks. The CDP client is capability-checked once, here.
#[derive(Clone)]
pub struct Sinks {
    data_layer: DataLayer,
    cdp: Option<Rc<dyn CdpSdk>>,
}

impl Sinks {
    pub fn new(data_layer: DataLayer, cdp: Option<Rc<dyn CdpSdk>>) -> Self {
        if let Some(cdp) = &cdp {
            cdp.ready(Box::new(|| info!("CDP analytics loaded")));
        } else {
            debug!("no CDP sink configured; data layer only");
        }
        Self { data_layer, cdp }
    }

    pub fn data_layer(&self) -> &DataLayer {
        &self.data_layer
    }

    pub fn has_cdp(&self) -> bool {
        self.cdp.is_some()
    }

    pub fn emit(&self, record: &EventRecord) {
        match record.to_data_layer_entry() {
            Ok(entry) => self.data_layer.push(entry),
            Err(err) => warn!(event = %record.name, %err, "event not serializable; data layer skipped"),
        }
        if let Some(cdp) = &self.cdp
            && let Err(err) = cdp.track(&record.name, record.cdp_properties())
        {
            warn!(event = %record.name, %err, "cdp track failed");
        }
    }

    pub fn emit_page_view(&self, view: &PageView) {
        self.data_layer.push(serde_json::json!({
            "event": "page_view",
            "page_title": view.title,
            "page_url": view.url,
            "page_referrer": view.referrer,
        }));
        if let Some(cdp) = &self.cdp {
            let properties = serde_json::json!({
                "url": view.url,
                "referrer": view.referrer,
                "userAgent": view.user_agent,
            });
            if let Err(err) = cdp.page(&view.title, properties) {
                warn!(title = %view.title, %err, "cdp page failed");
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageView {
    pub title: String,
    pub url: String,
    pub referrer: String,
    pub user_agent: String,
    pub timestamp: String,
}
