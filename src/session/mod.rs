pub mod coordinator;
pub mod store;
pub mod trace;

pub use coordinator::{
    CaptureState, ClickReport, ClickTicket, FlagUpdate, InputReport, KnownVariable,
    SessionCoordinator, SessionPhase, SessionStatus,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use trace::{
    CaptureFlags, ClickEvent, InputElement, InputEvent, InputVariable, Modifiers,
    NavigationEvent, Pointer, Screenshot, Trace,
};
