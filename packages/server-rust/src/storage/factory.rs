//! Builds a [`StorageEngine`] from a datasource string.
//!
//! Supported forms:
//!
//! - `memory:` (or `memory`): process-local [`MemoryEngine`]
//! - `redb:<path>`: durable [`RedbEngine`](crate::storage::engines::RedbEngine)
//!   at `<path>` (requires the `redb` feature)

use std::sync::Arc;

use anyhow::bail;

use crate::storage::engine::StorageEngine;
use crate::storage::engines::MemoryEngine;

/// Opens the engine named by `datasource`.
///
/// # Errors
///
/// Returns an error for an unknown scheme, a missing path, or when the
/// durable engine cannot open its file.
pub fn open_engine(datasource: &str) -> anyhow::Result<Arc<dyn StorageEngine>> {
    let (scheme, rest) = datasource.split_once(':').unwrap_or((datasource, ""));
    match scheme {
        "memory" => Ok(Arc::new(MemoryEngine::new())),
        "redb" => open_redb(rest),
        other => bail!("unsupported datasource scheme '{other}' in '{datasource}'"),
    }
}

#[cfg(feature = "redb")]
fn open_redb(path: &str) -> anyhow::Result<Arc<dyn StorageEngine>> {
    if path.is_empty() {
        bail!("redb datasource requires a path, e.g. redb:./seatline.redb");
    }
    Ok(Arc::new(crate::storage::engines::RedbEngine::open(path)?))
}

#[cfg(not(feature = "redb"))]
fn open_redb(_path: &str) -> anyhow::Result<Arc<dyn StorageEngine>> {
    bail!("redb datasource requested but the server was built without the `redb` feature")
}
