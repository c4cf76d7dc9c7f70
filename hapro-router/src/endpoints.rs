//! The relay's static controller table.

use std::fmt;

use crate::route::{Route, RouteTable};

/// Controller a route dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Ping,
    Info,
    Ip,
    Users,
    Updates,
    UpdateIcon,
    UpdateSkip,
    UpdateClear,
    UpdatePerform,
    SystemMonitorEnable,
    SystemMonitorEnableEntities,
    StatisticHistory,
    Backups,
    BackupInfo,
    BackupDownload,
    BackupUpload,
    BackupDelete,
    BackupRestore,
    BackupStatus,
    FileUpload,
}

impl Endpoint {
    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Ping => "ping",
            Endpoint::Info => "info",
            Endpoint::Ip => "ip",
            Endpoint::Users => "users",
            Endpoint::Updates => "updates",
            Endpoint::UpdateIcon => "update_icon",
            Endpoint::UpdateSkip => "update_skip",
            Endpoint::UpdateClear => "update_clear",
            Endpoint::UpdatePerform => "update_perform",
            Endpoint::SystemMonitorEnable => "systemmonitor_enable",
            Endpoint::SystemMonitorEnableEntities => "systemmonitor_enable_entities",
            Endpoint::StatisticHistory => "statistic_history",
            Endpoint::Backups => "backups",
            Endpoint::BackupInfo => "backup_info",
            Endpoint::BackupDownload => "backup_download",
            Endpoint::BackupUpload => "backup_upload",
            Endpoint::BackupDelete => "backup_delete",
            Endpoint::BackupRestore => "backup_restore",
            Endpoint::BackupStatus => "backup_status",
            Endpoint::FileUpload => "file_upload",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Build the route table. Order matters: the first path match decides.
pub fn table() -> RouteTable<Endpoint> {
    RouteTable::new(vec![
        Route::get("/", Endpoint::Ping),
        Route::get("/info", Endpoint::Info),
        Route::get("/ip", Endpoint::Ip),
        Route::get("/users", Endpoint::Users),
        Route::get("/updates", Endpoint::Updates),
        Route::get("/updates/:updateId/icon", Endpoint::UpdateIcon),
        Route::post("/updates/:updateId/skip", Endpoint::UpdateSkip),
        Route::post("/updates/:updateId/clear", Endpoint::UpdateClear),
        Route::post("/updates/:updateId", Endpoint::UpdatePerform),
        Route::post("/systemmonitor/enable", Endpoint::SystemMonitorEnable),
        Route::post(
            "/systemmonitor/enable_entities",
            Endpoint::SystemMonitorEnableEntities,
        ),
        Route::get("/statistic/history/:entityId", Endpoint::StatisticHistory),
        Route::get("/backups", Endpoint::Backups),
        Route::get("/backups/:backupId/info", Endpoint::BackupInfo),
        Route::get("/backups/:backupId/download", Endpoint::BackupDownload),
        Route::post("/backups/upload", Endpoint::BackupUpload),
        Route::delete("/backups/:backupId/delete", Endpoint::BackupDelete),
        Route::post("/backups/:backupId/restore", Endpoint::BackupRestore),
        Route::get("/backups/:backupId/status", Endpoint::BackupStatus),
        Route::post("/file/upload", Endpoint::FileUpload),
    ])
}
