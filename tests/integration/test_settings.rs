//! Settings files driving a real service, without loading the model.

use jobmatch::config::IndexKindSetting;
use jobmatch::{JobSearchService, MatchError, Settings};
use tempfile::TempDir;

#[test]
fn test_settings_file_paths_resolve_against_workspace() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config_path = dir.path().join("settings.toml");
    std::fs::write(
        &config_path,
        r#"
[store]
database_path = "data/jobs.db"

[index]
path = "data/index"
kind = "auto"

[search]
nprobe = 16
"#,
    )
    .unwrap();

    let mut settings = Settings::load_from(&config_path).unwrap();
    settings.workspace_root = Some(dir.path().to_path_buf());

    assert_eq!(settings.index.kind, IndexKindSetting::Auto);
    assert_eq!(settings.search.nprobe, Some(16));
    assert_eq!(settings.database_path(), dir.path().join("data/jobs.db"));
    assert_eq!(settings.index_dir(), dir.path().join("data/index"));
    // untouched sections keep their defaults
    assert_eq!(settings.index.min_training_vectors, 39);
    assert_eq!(settings.embedding.model, "AllMiniLML6V2");
}

#[test]
fn test_open_creates_store_and_reports_missing_index() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut settings = Settings::default();
    settings.workspace_root = Some(dir.path().to_path_buf());
    settings.store.database_path = "nested/jobs.db".into();
    settings.index.path = "nested/index".into();

    let service = JobSearchService::open(settings).unwrap();
    assert!(dir.path().join("nested/jobs.db").exists());
    assert!(!service.embedder().is_loaded());

    let err = service.search_jobs("rust developer", 5).unwrap_err();
    assert!(matches!(err, MatchError::IndexNotBuilt { .. }), "got {err:?}");
    // the index check comes before the model is needed
    assert!(!service.embedder().is_loaded());
}

#[test]
fn test_open_rejects_invalid_settings() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut settings = Settings::default();
    settings.workspace_root = Some(dir.path().to_path_buf());
    settings.index.min_training_vectors = 0;

    let err = JobSearchService::open(settings).unwrap_err();
    assert!(matches!(err, MatchError::Config { .. }), "got {err:?}");
}

#[test]
fn test_unknown_model_is_a_config_error() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut settings = Settings::default();
    settings.workspace_root = Some(dir.path().to_path_buf());
    settings.embedding.model = "NoSuchModel".to_string();

    let err = JobSearchService::open(settings).unwrap_err();
    assert!(matches!(err, MatchError::Config { .. }), "got {err:?}");
}
