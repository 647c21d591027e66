//! Client side of the town hall real-time dashboards: section pollers, the
//! push stream reader, topic routing and session teardown.

pub mod fetch;
pub mod manager;
pub mod poller;
pub mod push;
pub mod routing;
pub mod section;
pub mod view;

pub use fetch::{FetchError, HttpFetcher, SectionFetcher};
pub use manager::{Signal, SyncConfig, SyncError, SyncManager, SyncStats};
pub use push::{HttpPushConnector, PushConnector, PushError, PushMessage, PushState, PushStream};
pub use routing::{ReloadAction, RoutingTable};
pub use section::{Role, Section};
pub use view::{ConsoleView, DashboardView, MemoryView, Notice, NoticeLevel};
