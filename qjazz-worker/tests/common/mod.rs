//!
//! Shared fixture for process level tests
//!
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Once;

use qjazz_pool::Builder;
use tempfile::TempDir;

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        // Point the pool at the worker binary under test
        std::env::set_var("QJAZZ_WORKER_EXEC", env!("CARGO_BIN_EXE_qjazz-worker-bin"));
    });
}

fn write_project(dir: &Path, name: &str) {
    let mut f = File::create(dir.join(name)).unwrap();
    f.write_all(b"<qgis/>").unwrap();
}

/// Temporary data directory exposed as the `/france` search path
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        setup();
        let dir = TempDir::new().unwrap();
        let france = dir.path().join("france");
        std::fs::create_dir(&france).unwrap();
        write_project(&france, "france_parts.qgs");
        write_project(&france, "france_drom.qgs");
        write_project(&france, "montpellier.qgs");
        Self { dir }
    }

    pub fn builder(&self) -> Builder {
        let mut builder = Builder::new(Vec::<String>::new());
        builder
            .name("test")
            .process_start_timeout(10)
            .process_config(serde_json::json!({
                "projects": {
                    "search_paths": {
                        "/france": format!("file:{}/france", self.dir.path().display()),
                    }
                }
            }));
        builder
    }
}
