use std::io;
use std::path::Path;

use tokio::fs;

/// Reads the whole file; `Ok(None)` when it does not exist.
pub async fn read_if_exists(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}
