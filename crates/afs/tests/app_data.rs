use std::fs;
use std::sync::{Arc, Mutex};

use afs::{AfsError, AppData, AppFileSystem};
use afs_backends::{ExtensionScanner, HeapStorage, LocalFileScanner};
use afs_config::{AfsConfig, ConfigError};
use afs_core::{AppFileSystemStorage, NewNode, NodeEvent, StorageEvent};

fn case_scanners() -> Vec<Arc<dyn LocalFileScanner>> {
    vec![Arc::new(ExtensionScanner::new("case", "TEST", ["tst"]))]
}

fn config(dir: &std::path::Path) -> AfsConfig {
    let cases = dir.join("cases");
    fs::create_dir_all(&cases).unwrap();
    fs::write(cases.join("n.tst"), b"").unwrap();

    AfsConfig::from_yaml(&format!(
        r#"
name: platform
events:
  capacity: 8
drives:
  scratch:
    type: heap
  main:
    type: mmap
    path: {}
    mmap_size: 1mb
    remotely_accessible: true
  cases:
    type: local
    root: {}
"#,
        dir.join("main.db").display(),
        cases.display()
    ))
    .unwrap()
}

#[test]
fn drives_are_built_in_configuration_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut app_data = AppData::from_config(&config(dir.path()), &case_scanners()).unwrap();

    assert_eq!(app_data.file_system_names(), vec!["scratch", "main", "cases"]);
    let root_names: Vec<_> = app_data
        .file_systems()
        .map(|drive| drive.storage().node_name(&drive.root_node()).unwrap())
        .collect();
    assert_eq!(root_names, vec!["scratch", "main", "cases"]);

    let cases = app_data.file_system("cases").unwrap();
    let case = app_data.node("cases:/n.tst").unwrap();
    assert_eq!(cases.storage().node_pseudo_class(&case).unwrap(), "case");
    assert!(!cases.storage().is_writable(&cases.root_node()).unwrap());

    app_data.close().unwrap();
    assert!(app_data.file_system_names().is_empty());
    app_data.close().unwrap();
}

#[test]
fn events_from_every_drive_share_one_bus() {
    let dir = tempfile::tempdir().unwrap();
    let mut app_data = AppData::from_config(&config(dir.path()), &[]).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    app_data.events_bus().add_listener(move |event: &StorageEvent| {
        sink.lock().unwrap().push(event.file_system.clone())
    });

    for name in ["scratch", "main"] {
        let drive = app_data.file_system(name).unwrap();
        drive
            .storage()
            .create_node(&drive.root_node(), NewNode::folder("f"))
            .unwrap();
    }
    assert_eq!(*seen.lock().unwrap(), vec!["scratch", "main"]);
    app_data.close().unwrap();
}

#[test]
fn persistent_drive_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut app_data = AppData::from_config(&config(dir.path()), &[]).unwrap();
        let main = app_data.file_system("main").unwrap();
        let root = main.root_node();
        let projects = main.storage().create_node(&root, NewNode::folder("projects")).unwrap();
        main.storage().create_project(&projects, "study", "kept").unwrap();
        app_data.close().unwrap();
    }

    let mut app_data = AppData::from_config(&config(dir.path()), &[]).unwrap();
    let study = app_data.node("main:/projects/study").unwrap();
    let main = app_data.file_system("main").unwrap();
    assert_eq!(main.storage().node_info(&study).unwrap().description, "kept");
    assert!(app_data.node("main:/projects/study/root").is_ok());
    assert!(app_data.node("scratch:/projects").unwrap_err().is_not_found());
    app_data.close().unwrap();
}

#[test]
fn remote_access_follows_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let mut app_data = AppData::from_config(&config(dir.path()), &[]).unwrap();

    assert_eq!(app_data.remotely_accessible_file_system_names(), vec!["main"]);
    assert!(app_data.remotely_accessible_storage("main").is_some());
    assert!(app_data.remotely_accessible_storage("scratch").is_none());
    assert!(app_data.remotely_accessible_storage("missing").is_none());
    app_data.close().unwrap();
}

#[test]
fn node_paths_must_name_a_known_drive() {
    let app_data = AppData::new();
    assert!(matches!(app_data.node("no-drive"), Err(AfsError::InvalidPath(_))));
    assert!(matches!(app_data.node(":/a"), Err(AfsError::InvalidPath(_))));
    assert!(matches!(
        app_data.node("other:/a"),
        Err(AfsError::UnknownFileSystem(_))
    ));
}

#[test]
fn duplicate_drive_names_are_rejected() {
    let mut app_data = AppData::new();
    let bus = app_data.events_bus().clone();
    let first = AppFileSystem::new(Arc::new(HeapStorage::with_events_bus("d", bus.clone())), false);
    let second = AppFileSystem::new(Arc::new(HeapStorage::with_events_bus("d", bus)), true);

    app_data.add_file_system(first).unwrap();
    assert!(matches!(
        app_data.add_file_system(second),
        Err(AfsError::DuplicateFileSystem(name)) if name == "d"
    ));
    assert!(!app_data.file_system("d").unwrap().is_remotely_accessible());
}

#[test]
fn invalid_configuration_builds_nothing() {
    let config = AfsConfig::from_yaml(
        r#"
drives:
  "bad:name":
    type: heap
"#,
    )
    .unwrap();
    assert!(matches!(
        AppData::from_config(&config, &[]),
        Err(AfsError::Config(ConfigError::InvalidDriveName(..)))
    ));
}

#[test]
fn events_carry_node_changes() {
    let app_data = AppData::new();
    let storage = HeapStorage::with_events_bus("d", app_data.events_bus().clone());
    let mut receiver = app_data.events_bus().subscribe();
    let root = storage.root_node();
    let id = storage.create_node(&root, NewNode::folder("f")).unwrap();

    let event = receiver.try_recv().unwrap();
    assert_eq!(event.event, NodeEvent::NodeCreated { id, parent: root });
}
