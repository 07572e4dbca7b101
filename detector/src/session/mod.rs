pub mod debounce;
pub mod sink;
pub mod state;

pub use debounce::CaptureDebounce;
pub use sink::{CaptureSink, SnapshotReceiver};
pub use state::{
    OverlayReceiver, Session, SessionCommand, SessionHandle, SessionStatus, StatusReceiver,
};
