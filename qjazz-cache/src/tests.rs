//!
//! Unit tests
//!
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Once;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use crate::config::ProjectsConfig;
use crate::errors::Error;
use crate::handlers::Handlers;
use crate::loader::{LayerSummary, ProjectDocument, ProjectLoader};
use crate::manager::{CacheManager, CheckoutState};
use crate::metadata::ProjectMetadata;
use crate::status::CheckoutStatus;

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

// Loader double: the "project" is its own uri; layers are
// invalid when the file name asks for it.
struct TestLoader;

impl ProjectLoader for TestLoader {
    type Project = String;

    fn load(
        &self,
        md: &ProjectMetadata,
        _config: &ProjectsConfig,
    ) -> crate::Result<ProjectDocument<String>> {
        Ok(ProjectDocument {
            project: md.uri.clone(),
            filename: md.uri.clone(),
            crs: "EPSG:4326".into(),
            saved_version: Some("test-1.0".into()),
            layers: vec![LayerSummary {
                layer_id: "layer0".into(),
                name: "Layer".into(),
                source: md.uri.clone(),
                crs: "EPSG:4326".into(),
                is_valid: !md.name.contains("invalid"),
                is_spatial: true,
            }],
            debug_metadata: Default::default(),
        })
    }
}

struct Fixture {
    _dir: TempDir,
    manager: CacheManager<TestLoader>,
}

fn write_project(dir: &Path, name: &str) {
    let mut f = File::create(dir.join(name)).unwrap();
    f.write_all(b"<qgis/>").unwrap();
}

fn fixture() -> Fixture {
    fixture_with(|_| {})
}

fn fixture_with<F: FnOnce(&mut ProjectsConfig)>(patch: F) -> Fixture {
    setup();
    let dir = TempDir::new().unwrap();
    let france = dir.path().join("france");
    std::fs::create_dir(&france).unwrap();
    write_project(&france, "france_parts.qgs");
    write_project(&france, "france_drom.qgs");
    write_project(&france, "project_with_invalid.qgs");

    let mut search_paths = BTreeMap::new();
    search_paths.insert("/france".to_string(), format!("file:{}", france.display()));
    search_paths.insert(
        "/dyn/{loc}".to_string(),
        format!("file:{}/{{loc}}", dir.path().display()),
    );

    let mut config = ProjectsConfig {
        search_paths,
        ..Default::default()
    };
    patch(&mut config);

    let manager = CacheManager::new(config, Handlers::new(), TestLoader).unwrap();
    Fixture { _dir: dir, manager }
}

#[test]
fn test_path_resolution() {
    let f = fixture();
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();
    assert_eq!(url.scheme(), "file");
    assert!(url.path().ends_with("/france/france_parts"));
}

#[test]
fn test_dynamic_path_resolution() {
    let f = fixture();
    let url = f
        .manager
        .resolve_path("/dyn/france/france_parts.qgs", false)
        .unwrap();
    assert_eq!(url.scheme(), "file");
    assert!(url.path().ends_with("/france/france_parts.qgs"));
}

#[test]
fn test_invalid_path() {
    let f = fixture();
    assert!(matches!(
        f.manager.resolve_path("/i_do_not_exists", false),
        Err(Error::ResourceNotAllowed(_))
    ));
}

#[test]
fn test_direct_resolution() {
    let f = fixture_with(|config| {
        config.allow_direct_path_resolution = true;
    });
    let url = f
        .manager
        .resolve_path("/absolute/path/project.qgs", true)
        .unwrap();
    assert_eq!(url.path(), "/absolute/path/project.qgs");

    // Denied when the caller does not allow it
    assert!(f.manager.resolve_path("/absolute/path/project.qgs", false).is_err());
}

#[test]
fn test_checkout_cycle() {
    let mut f = fixture();
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();

    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::New);

    let (entry, status) = f.manager.update(state).unwrap();
    assert_eq!(status, CheckoutStatus::New);
    let uri = entry.expect("expecting cache entry").metadata().uri.clone();

    // Checkout is idempotent with respect to cache state
    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::Unchanged);

    // Unchanged update is a no-op
    let (_, status) = f.manager.update(state).unwrap();
    assert_eq!(status, CheckoutStatus::Unchanged);
    assert_eq!(f.manager.len(), 1);

    // Drop followed by checkout returns NEW
    assert!(f.manager.drop_project(&uri).is_some());
    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::New);
}

#[test]
fn test_checkout_needupdate() {
    let mut f = fixture();
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();

    let state = f.manager.checkout(&url).unwrap();
    let uri = state.uri().to_string();
    f.manager.update(state).unwrap();

    let file = File::options().write(true).open(&uri).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();

    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::NeedUpdate);

    let (entry, status) = f.manager.update(state).unwrap();
    assert_eq!(status, CheckoutStatus::Updated);
    assert!(entry.is_some());

    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::Unchanged);
}

#[test]
fn test_checkout_removed() {
    let mut f = fixture();
    let url = f.manager.resolve_path("/france/france_drom", false).unwrap();

    let state = f.manager.checkout(&url).unwrap();
    let uri = state.uri().to_string();
    f.manager.update(state).unwrap();

    std::fs::remove_file(&uri).unwrap();

    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::Removed);

    let (entry, status) = f.manager.update(state).unwrap();
    assert_eq!(status, CheckoutStatus::Removed);
    assert!(entry.is_none());
    assert!(f.manager.is_empty());

    // Gone for good
    let state = f.manager.checkout(&url).unwrap();
    assert_eq!(state.status(), CheckoutStatus::NotFound);
}

#[test]
fn test_strict_checking() {
    let mut f = fixture();
    let url = f
        .manager
        .resolve_path("/france/project_with_invalid", false)
        .unwrap();

    let state = f.manager.checkout(&url).unwrap();
    assert!(matches!(
        f.manager.update(state),
        Err(Error::StrictCheckingFailure(_))
    ));

    // Relaxed mode loads it anyway
    let mut f = fixture_with(|config| {
        config.strict_check = false;
    });
    let url = f
        .manager
        .resolve_path("/france/project_with_invalid", false)
        .unwrap();
    let state = f.manager.checkout(&url).unwrap();
    let (entry, _) = f.manager.update(state).unwrap();
    assert!(entry.unwrap().document().has_bad_layers());
}

#[test]
fn test_max_projects() {
    let mut f = fixture_with(|config| {
        config.max_projects = 1;
    });
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();
    let state = f.manager.checkout(&url).unwrap();
    f.manager.update(state).unwrap();

    // The cap only rejects new loads
    let url = f.manager.resolve_path("/france/france_drom", false).unwrap();
    let state = f.manager.checkout(&url).unwrap();
    assert!(matches!(
        f.manager.update(state),
        Err(Error::MaxProjectsReached(1))
    ));
    assert_eq!(f.manager.len(), 1);
}

#[test]
fn test_pinned_survives_maintenance() {
    let mut f = fixture();
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();
    let state = f.manager.checkout(&url).unwrap();
    let uri = state.uri().to_string();
    f.manager.update(state).unwrap();
    assert!(f.manager.pin(&uri, true));

    std::fs::remove_file(&uri).unwrap();

    let report = f.manager.update_cache().unwrap();
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].1, CheckoutStatus::Removed);
    // Still cached
    assert!(f.manager.get(&uri).is_some());

    // Explicit drop evicts regardless of pinning
    assert!(f.manager.drop_project(&uri).is_some());
    assert!(f.manager.is_empty());
}

#[test]
fn test_update_cache_refresh() {
    let mut f = fixture();
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();
    let state = f.manager.checkout(&url).unwrap();
    let uri = state.uri().to_string();
    f.manager.update(state).unwrap();

    let file = File::options().write(true).open(&uri).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();

    let report = f.manager.update_cache().unwrap();
    assert_eq!(report, vec![(uri, CheckoutStatus::Updated)]);
}

#[test]
fn test_collect_projects() {
    let f = fixture();
    let collected = f.manager.collect_projects(None).unwrap();
    assert_eq!(collected.len(), 3);
    for (md, public_path) in &collected {
        assert_eq!(md.scheme, "file");
        assert_eq!(md.storage, "file");
        assert!(public_path.starts_with("/france/"), "{public_path}");
    }
}

#[test]
fn test_collect_projects_with_prefix() {
    let f = fixture();
    let collected = f.manager.collect_projects(Some("/france")).unwrap();
    assert_eq!(collected.len(), 3);

    // Unknown prefix yields nothing
    let collected = f.manager.collect_projects(Some("/nowhere")).unwrap();
    assert!(collected.is_empty());
}

#[test]
fn test_shared_document_outlives_eviction() {
    let mut f = fixture();
    let url = f.manager.resolve_path("/france/france_parts", false).unwrap();
    let state = f.manager.checkout(&url).unwrap();
    let uri = state.uri().to_string();
    let (entry, _) = f.manager.update(state).unwrap();

    let document = entry.unwrap().document();
    f.manager.drop_project(&uri);

    // The captured handle still observes the loaded project
    assert_eq!(document.project, uri);
}

#[test]
fn test_checkout_state_report() {
    let state = CheckoutState::NotFound("/nowhere".into());
    assert_eq!(state.status(), CheckoutStatus::NotFound);
    assert_eq!(state.uri(), "/nowhere");
}
