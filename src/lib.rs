pub mod bindings;
pub mod clock;
pub mod config;
pub mod consent;
pub mod dom;
pub mod event;
pub mod forms;
mod handlers;
pub mod identity;
pub mod relay;
pub mod scenario;
pub mod scroll;
pub mod sinks;
pub mod storage;

pub use bindings::{DomEvent, LoadTiming, ScriptFault};
pub use clock::{Clock, RuntimeClock};
pub use config::RelayConfig;
pub use consent::{ConsentChoice, ConsentState, VerbosityTier};
pub use dom::{FixedGeometry, Geometry, Page, Rect, Viewport};
pub use event::EventRecord;
pub use handlers::{button_type, page_section, position_bucket};
pub use relay::{DebugSurface, DispatchOutcome, PageEffect, Relay, RelayContext};
pub use scenario::{Scenario, ScenarioError, ScenarioReport};
pub use sinks::{CdpCall, CdpSdk, DataLayer, RecordingCdp, Sinks};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError, UnavailableStore};
