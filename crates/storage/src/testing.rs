//! Test fixtures

use tempfile::TempDir;

use crate::{CommandExecutor, DatabaseManager};

/// Executor with every store opened in a fresh temporary directory
pub(crate) async fn open_stores() -> (TempDir, CommandExecutor, DatabaseManager) {
    let dir = tempfile::tempdir().unwrap();
    let executor = CommandExecutor::spawn(64);
    let manager = DatabaseManager::new(executor.clone());
    manager.initialize(dir.path()).await.unwrap();
    (dir, executor, manager)
}
