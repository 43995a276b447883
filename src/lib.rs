pub mod artifacts;
pub mod browser;
pub mod capture;
pub mod config;
pub mod dom;
pub mod engine;
pub mod error;
pub mod fidelity;
pub mod handoff;
pub mod host;
pub mod locator;
pub mod script;
pub mod session;
pub mod transfer;

//  Re-export commonly used items
pub use browser::chrome::{ChromeDriver, ConnectionMode};
pub use capture::{CaptureAgent, PageSignal};
pub use config::RecorderConfig;
pub use engine::{EngineClient, EngineEvent, EngineRequest, SseDecoder};
pub use error::{RecorderError, Result};
pub use handoff::{build_step_records, finalize, hand_off, HandoffSummary, StepRecord};
pub use host::PageHost;
pub use locator::{locate, resolve_meaningful_target, Locator, TargetDescriptor};
pub use script::{
    render_script, synthesize, ExecutionReport, ReplayExecutor, ReplayScript, ReplayStep,
    ScriptValidator, StepKind,
};
pub use session::{FileStore, KeyValueStore, MemoryStore, SessionCoordinator, Trace};
pub use transfer::{Frame, TransferReceiver, TransferSender};
