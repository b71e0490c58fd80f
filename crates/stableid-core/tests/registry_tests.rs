//! Integration tests for the IdRegistry public interface.
//!
//! These run against a real project directory: registry file, session lock
//! and scene files on disk.

use stableid_core::{
    Discrepancy, IdRegistry, ObjectGraph, ObjectKey, PersistentId, RegistryConfig, RegistryError,
    RepairPlan, SceneDirectory, SceneFile, SceneObject, ScopeKey, Settings,
};
use tempfile::TempDir;

/// Create a project directory with default settings.
fn create_test_project() -> (TempDir, Settings) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let settings = Settings::for_root(temp_dir.path());
    std::fs::create_dir_all(settings.scenes_path()).unwrap();
    (temp_dir, settings)
}

fn scope(name: &str) -> ScopeKey {
    ScopeKey::new(name).unwrap()
}

fn write_scene(scenes: &SceneDirectory, name: &str, objects: &[(&str, u32)]) {
    let scene = SceneFile {
        objects: objects
            .iter()
            .map(|(object, id)| SceneObject::new(*object).with_id(*id))
            .collect(),
        ..SceneFile::default()
    };
    scenes.write_scene(&scope(name), &scene).unwrap();
}

#[test]
fn test_open_creates_nothing_until_first_write() {
    let (_temp, settings) = create_test_project();
    let registry = IdRegistry::open(&settings).unwrap();

    assert!(registry.holds_lock());
    assert_eq!(registry.registered_count(), 0);
    assert!(!settings.registry_file().exists());
}

#[test]
fn test_second_session_is_locked_out() {
    let (_temp, settings) = create_test_project();
    let _first = IdRegistry::open(&settings).unwrap();

    let second = IdRegistry::open(&settings);
    assert!(matches!(second, Err(RegistryError::Locked(_))));
}

#[test]
fn test_allocate_remove_reallocate() {
    let (_temp, settings) = create_test_project();
    let mut registry = IdRegistry::open(&settings).unwrap();
    let a = scope("sceneA");

    let v1 = registry.allocate(&a).unwrap();
    let v2 = registry.allocate(&a).unwrap();
    assert_ne!(v1, v2);
    assert!(v1.is_assigned() && v2.is_assigned());
    assert_eq!(registry.identifiers_in_scope(&a).len(), 2);

    let released = registry.remove_scope(&a).unwrap();
    assert_eq!(released.len(), 2);
    assert!(registry.identifiers_in_scope(&a).is_empty());
    assert!(!registry.is_registered(v1));

    let v3 = registry.allocate(&a).unwrap();
    assert!(v3.is_assigned());
    assert_eq!(registry.all_identifiers(), vec![v3]);
}

#[test]
fn test_register_same_value_in_two_scopes() {
    let (_temp, settings) = create_test_project();
    let mut registry = IdRegistry::open(&settings).unwrap();

    registry.register(&scope("sceneA"), PersistentId::new(42)).unwrap();
    let err = registry
        .register(&scope("sceneB"), PersistentId::new(42))
        .unwrap_err();

    match err {
        RegistryError::DuplicateIdentifier { id, existing_scope } => {
            assert_eq!(id, PersistentId::new(42));
            assert_eq!(existing_scope, "sceneA");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(registry.registered_count(), 1);
    assert!(registry.identifiers_in_scope(&scope("sceneB")).is_empty());
}

#[test]
fn test_state_survives_reopen() {
    let (_temp, settings) = create_test_project();
    let (a, b) = {
        let mut registry = IdRegistry::open(&settings).unwrap();
        let a = registry.allocate(&scope("one")).unwrap();
        let b = registry.allocate(&scope("two")).unwrap();
        (a, b)
    };

    let registry = IdRegistry::open(&settings).unwrap();
    assert_eq!(registry.registered_count(), 2);
    assert_eq!(registry.scope_of(a), Some(&scope("one")));
    assert_eq!(registry.scope_of(b), Some(&scope("two")));
}

#[test]
fn test_registry_file_is_byte_stable() {
    let (_temp, settings) = create_test_project();
    {
        let mut registry = IdRegistry::open(&settings).unwrap();
        for _ in 0..5 {
            registry.allocate(&scope("levels/intro")).unwrap();
        }
        registry.allocate(&scope("menu")).unwrap();
    }
    let written = std::fs::read(settings.registry_file()).unwrap();

    let registry = IdRegistry::open(&settings).unwrap();
    registry.flush().unwrap();
    let rewritten = std::fs::read(settings.registry_file()).unwrap();

    assert_eq!(written, rewritten);
}

#[test]
fn test_registry_file_layout() {
    let (_temp, settings) = create_test_project();
    {
        let mut registry = IdRegistry::open(&settings).unwrap();
        registry.register(&scope("b"), PersistentId::new(9)).unwrap();
        registry.register(&scope("b"), PersistentId::new(3)).unwrap();
        registry.register(&scope("a"), PersistentId::new(7)).unwrap();
    }

    let raw = std::fs::read_to_string(settings.registry_file()).unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["version"], 1);
    assert_eq!(json["scopes"]["a"], serde_json::json!([7]));
    assert_eq!(json["scopes"]["b"], serde_json::json!([3, 9]));
}

#[test]
fn test_backup_written_when_enabled() {
    let (_temp, mut settings) = create_test_project();
    settings.keep_backup = true;

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.allocate(&scope("a")).unwrap();
    registry.allocate(&scope("a")).unwrap();

    let backup = settings.registry_file().with_extension("json.bak");
    assert!(backup.exists());
}

#[test]
fn test_assign_pass_over_scene_files() {
    let (_temp, settings) = create_test_project();
    let mut scenes = SceneDirectory::from_settings(&settings);
    write_scene(&scenes, "intro", &[("door", 0), ("lamp", 0)]);
    write_scene(&scenes, "levels/one", &[("chest", 0)]);

    let mut registry = IdRegistry::open(&settings).unwrap();
    let changes = registry.assign_pass(&mut scenes).unwrap();
    assert_eq!(changes.len(), 3);

    let on_disk = scenes.live_objects(&scope("levels/one")).unwrap();
    assert!(on_disk[0].id.is_assigned());
    assert_eq!(registry.scope_of(on_disk[0].id), Some(&scope("levels/one")));
    assert!(registry.validate_registry(&scenes).unwrap().is_clean());
}

#[test]
fn test_scene_duplication_reissues_every_identifier() {
    let (_temp, settings) = create_test_project();
    let mut scenes = SceneDirectory::from_settings(&settings);
    write_scene(&scenes, "a", &[("x", 0), ("y", 0), ("z", 0)]);

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.assign_pass(&mut scenes).unwrap();
    let originals = registry.identifiers_in_scope(&scope("a"));

    let reassigned = registry
        .duplicate_scene(&scenes, &scope("a"), &scope("b"))
        .unwrap();

    assert_eq!(reassigned.len(), 3);
    let copies = registry.identifiers_in_scope(&scope("b"));
    assert_eq!(copies.len(), 3);
    assert!(copies.iter().all(|id| !originals.contains(id)));
    assert!(registry.validate_registry(&scenes).unwrap().is_clean());
}

#[test]
fn test_same_name_copy_in_one_scene_is_reissued() {
    let (_temp, settings) = create_test_project();
    let mut scenes = SceneDirectory::from_settings(&settings);
    // An object pasted into its own scene keeps name and identifier
    write_scene(&scenes, "a", &[("door", 5), ("door", 5)]);

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.register(&scope("a"), PersistentId::new(5)).unwrap();

    let changes = registry.assign_pass(&mut scenes).unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].previous, PersistentId::new(5));

    let live = scenes.live_objects(&scope("a")).unwrap();
    assert_eq!(live[0].id, PersistentId::new(5));
    assert_ne!(live[1].id, PersistentId::new(5));
    assert!(registry.validate_registry(&scenes).unwrap().is_clean());
}

#[test]
fn test_same_name_objects_get_distinct_identifiers() {
    let (_temp, settings) = create_test_project();
    let mut scenes = SceneDirectory::from_settings(&settings);
    write_scene(&scenes, "a", &[("door", 0), ("door", 0)]);

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.assign_pass(&mut scenes).unwrap();

    let live = scenes.live_objects(&scope("a")).unwrap();
    assert!(live[0].id.is_assigned());
    assert!(live[1].id.is_assigned());
    assert_ne!(live[0].id, live[1].id);
    assert_eq!(registry.registered_count(), 2);

    let report = registry.validate_registry(&scenes).unwrap();
    assert!(report.is_clean(), "{:?}", report.discrepancies);
}

#[test]
fn test_untracked_copy_is_reported_then_repaired() {
    let (_temp, settings) = create_test_project();
    let mut scenes = SceneDirectory::from_settings(&settings);
    write_scene(&scenes, "a", &[("x", 0)]);

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.assign_pass(&mut scenes).unwrap();
    let original = registry.identifiers_in_scope(&scope("a"))[0];

    // Copied outside any session: the registry never heard about it
    std::fs::copy(
        settings.scenes_path().join("a.scene.json"),
        settings.scenes_path().join("b.scene.json"),
    )
    .unwrap();

    let report = registry.validate_registry(&scenes).unwrap();
    assert_eq!(report.duplicate_count(), 1);
    assert!(matches!(
        &report.discrepancies[0],
        Discrepancy::CrossScopeDuplicate { id, holders } if *id == original && holders.len() == 2
    ));

    // Without an explicit keeper nothing changes
    let summary = registry
        .repair(&mut scenes, &report, &RepairPlan::non_destructive())
        .unwrap();
    assert_eq!(summary.skipped, 1);
    assert!(summary.reassigned.is_empty());

    let plan = RepairPlan::default().keep(original, ObjectKey::new("a/x"));
    let summary = registry.repair(&mut scenes, &report, &plan).unwrap();
    assert_eq!(summary.reassigned.len(), 1);
    assert_eq!(summary.reassigned[0].scope, scope("b"));

    assert!(registry.validate_registry(&scenes).unwrap().is_clean());
    assert_eq!(registry.registered_count(), 2);
}

#[test]
fn test_deleted_scene_leaves_orphans_until_repaired() {
    let (_temp, settings) = create_test_project();
    let mut scenes = SceneDirectory::from_settings(&settings);
    write_scene(&scenes, "doomed", &[("x", 0), ("y", 0)]);

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.assign_pass(&mut scenes).unwrap();
    std::fs::remove_file(settings.scenes_path().join("doomed.scene.json")).unwrap();

    let report = registry.validate_registry(&scenes).unwrap();
    assert_eq!(report.orphan_count(), 2);
    assert_eq!(report.missing_scopes, vec![scope("doomed")]);

    let plan = RepairPlan {
        drop_orphans: true,
        ..RepairPlan::default()
    };
    let summary = registry.repair(&mut scenes, &report, &plan).unwrap();
    assert_eq!(summary.orphans_dropped, 2);
    assert_eq!(registry.registered_count(), 0);
}

#[test]
fn test_container_rename_by_path() {
    let (_temp, settings) = create_test_project();
    let mut registry = IdRegistry::open(&settings).unwrap();
    let id = registry.allocate(&scope("old")).unwrap();

    let from = settings.scenes_path().join("old.scene.json");
    let to = settings.scenes_path().join("nested").join("new.scene.json");
    registry
        .container_renamed(&from.to_string_lossy(), &to.to_string_lossy())
        .unwrap();

    assert_eq!(registry.scope_of(id), Some(&scope("nested/new")));
}

#[test]
fn test_settings_file_is_honoured() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::write(
        temp_dir.path().join(RegistryConfig::SETTINGS_FILE_NAME),
        r#"{ "registryPath": "ids.json", "maxAllocationAttempts": 3 }"#,
    )
    .unwrap();

    let settings = Settings::load(temp_dir.path()).unwrap();
    assert_eq!(settings.max_allocation_attempts, 3);

    let mut registry = IdRegistry::open(&settings).unwrap();
    registry.allocate(&scope("a")).unwrap();
    assert!(temp_dir.path().join("ids.json").exists());
}
