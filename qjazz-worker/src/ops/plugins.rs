//!
//! Plugin inspection
//!
use crate::connection::{Connection, Reply};
use crate::engine::QgisEngine;
use crate::errors::Result;

/// Stream the loaded plugins
pub fn inspect_plugins<C: Connection, E: QgisEngine>(conn: &mut C, engine: &E) -> Result<()> {
    for plugin in engine.plugins() {
        conn.send_item(plugin)?;
    }
    conn.send_nodata()
}
