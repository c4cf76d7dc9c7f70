//! Outbound HTTP for the relay: the credential cache, the dispatcher that
//! posts to the external service, and the backend (supervisor) client.

pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod supervisor;

pub use credentials::{CachedToken, ClientCredentials, CredentialCache, TokenGrant, TokenSource};
pub use dispatcher::{CompletionNotifier, NotificationSink, OutboundDispatcher};
pub use error::{ClientError, Result};
pub use supervisor::{
    fetch_download, parse_backup_list, BackupCatalog, BackupEntry, CoreBody, CoreReply, Download,
    SupervisorClient,
};
