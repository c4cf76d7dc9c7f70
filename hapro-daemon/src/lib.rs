//! Relay runtime: backup watcher + completion poller, event-bus subscription
//! relay, and the HTTP surface.

pub mod controllers;
mod error;
pub mod poller;
pub mod protocol;
pub mod relay;
mod runtime;
pub mod server;
pub mod watcher;

pub use error::DaemonError;
pub use poller::{poll_until_listed, CompletionTracker};
pub use protocol::{InboundMessage, OutboundMessage};
pub use relay::{
    run_relay, run_session, ChannelConnector, EventChannel, RelaySession, RelaySettings,
    RelayState, SessionSummary, Step, WsConnector,
};
pub use runtime::{init_tracing, run, start_blocking};
pub use server::{route_request, router, ApiReply, AppState};
pub use watcher::{list_files, watcher_task, DirectoryWatcher, WatchState};
