//! Build preconditions, artifact contents, rebuilds and reloads.

use std::sync::Arc;

use crate::common::{
    HashedWordsGenerator, KeywordEmbeddingGenerator, PoisonedGenerator, TestEnv,
    seed_three_postings,
};
use jobmatch::config::IndexKindSetting;
use jobmatch::indexing::indexed_job_ids;
use jobmatch::{IndexArtifact, IndexKind, JobId, MatchError, NewJobPosting, UpsertOutcome};

#[test]
fn test_search_before_any_build_is_index_not_built() {
    let env = TestEnv::flat();
    seed_three_postings(&env);

    let err = env.service.search_jobs("Python", 3).unwrap_err();
    assert!(matches!(err, MatchError::IndexNotBuilt { .. }), "got {err:?}");
}

#[test]
fn test_ivfpq_below_threshold_writes_nothing() {
    let env = TestEnv::new(IndexKindSetting::Ivfpq, Arc::new(KeywordEmbeddingGenerator));
    seed_three_postings(&env);

    let err = env.service.rebuild_index().unwrap_err();
    match err {
        MatchError::InsufficientData {
            available,
            required,
        } => {
            assert_eq!(available, 3);
            assert_eq!(required, 39);
        }
        other => panic!("expected InsufficientData, got {other:?}"),
    }

    assert!(!IndexArtifact::path_in(&env.index_dir()).exists());
    assert!(matches!(
        env.service.search_jobs("Python", 1),
        Err(MatchError::IndexNotBuilt { .. })
    ));
    // embeddings computed before the failure are kept for the next attempt
    assert_eq!(env.service.store().count_embedded().unwrap(), 3);
}

#[test]
fn test_empty_store_cannot_build() {
    let env = TestEnv::flat();

    let err = env.service.rebuild_index().unwrap_err();
    assert!(matches!(
        err,
        MatchError::InsufficientData { available: 0, .. }
    ));
    assert!(!IndexArtifact::path_in(&env.index_dir()).exists());
}

#[test]
fn test_auto_kind_falls_back_to_flat() {
    let env = TestEnv::new(IndexKindSetting::Auto, Arc::new(KeywordEmbeddingGenerator));
    seed_three_postings(&env);

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.kind, Some(IndexKind::Flat));
    assert_eq!(report.clusters, 0);
}

#[test]
fn test_artifact_covers_every_embedded_posting() {
    let env = TestEnv::flat();
    seed_three_postings(&env);

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.postings_embedded, 3);
    assert_eq!(report.total_indexed, 3);

    let artifact = IndexArtifact::load(&env.index_dir()).unwrap().unwrap();
    let metadata = artifact.metadata();
    assert_eq!(metadata.ntotal, artifact.mapping().len());
    assert_eq!(metadata.model_id, "keyword-concepts");
    assert_eq!(metadata.dimension, 6);
    assert_eq!(metadata.kind, IndexKind::Flat);
    assert_eq!(
        indexed_job_ids(&artifact),
        vec![JobId::new(1), JobId::new(2), JobId::new(3)]
    );
}

#[test]
fn test_rebuild_without_changes_is_idempotent() {
    let env = TestEnv::flat();
    seed_three_postings(&env);

    env.service.rebuild_index().unwrap();
    let first = IndexArtifact::load(&env.index_dir()).unwrap().unwrap();

    let report = env.service.rebuild_index().unwrap();
    let second = IndexArtifact::load(&env.index_dir()).unwrap().unwrap();

    assert_eq!(report.postings_embedded, 0);
    assert_eq!(indexed_job_ids(&first), indexed_job_ids(&second));
    assert_eq!(first.metadata().ntotal, second.metadata().ntotal);
}

#[test]
fn test_changed_description_is_re_embedded() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let outcome = env
        .service
        .store()
        .upsert_posting(&NewJobPosting::new(2, "ML Engineer", "Python machine learning engineer"))
        .unwrap();
    assert_eq!(
        outcome,
        UpsertOutcome::Updated {
            embedding_cleared: true
        }
    );

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.postings_embedded, 1);

    let results = env.service.search_jobs("Python ML developer", 1).unwrap();
    assert!([JobId::new(2), JobId::new(3)].contains(&results[0].job_id));
}

#[test]
fn test_new_posting_is_searchable_only_after_rebuild() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    env.insert(4, "React Developer", "Frontend React developer");
    assert_eq!(env.service.search_jobs("frontend", 10).unwrap().len(), 3);

    env.service.rebuild_index().unwrap();
    assert_eq!(env.service.search_jobs("frontend", 10).unwrap().len(), 4);
}

#[test]
fn test_failed_embeddings_are_skipped() {
    let env = TestEnv::new(IndexKindSetting::Flat, Arc::new(PoisonedGenerator));
    seed_three_postings(&env);
    env.insert(4, "Broken", "poison pill posting");

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.embedding_failures, 1);
    assert_eq!(report.failures[0].0, JobId::new(4));
    assert_eq!(report.total_indexed, 3);

    let results = env.service.search_jobs("engineer", 10).unwrap();
    assert!(!results.iter().any(|m| m.job_id == JobId::new(4)));
}

#[test]
fn test_fresh_service_loads_persisted_index() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let other = env.reopen(IndexKindSetting::Flat, Arc::new(KeywordEmbeddingGenerator));
    assert!(!other.matcher().is_loaded());

    let results = other.search_jobs("Python ML developer", 1).unwrap();
    assert_eq!(results[0].job_id, JobId::new(3));
    assert!(other.matcher().is_loaded());
}

#[test]
fn test_reload_picks_up_another_writer() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();
    assert_eq!(env.service.matcher().metadata().unwrap().ntotal, 3);

    let writer = env.reopen(IndexKindSetting::Flat, Arc::new(KeywordEmbeddingGenerator));
    env.insert(4, "Backend Developer", "Server backend developer");
    writer.rebuild_index().unwrap();

    // still serving what it published
    assert_eq!(env.service.matcher().metadata().unwrap().ntotal, 3);
    assert!(env.service.matcher().reload().unwrap());
    assert_eq!(env.service.matcher().metadata().unwrap().ntotal, 4);
}

#[test]
fn test_index_from_other_model_is_incompatible() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let other = env.reopen(IndexKindSetting::Flat, Arc::new(HashedWordsGenerator::new(32)));
    let err = other.search_jobs("Python", 1).unwrap_err();
    assert!(matches!(err, MatchError::IncompatibleIndex { .. }), "got {err:?}");
}

#[test]
fn test_model_change_re_embeds_everything() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let other = env.reopen(IndexKindSetting::Flat, Arc::new(HashedWordsGenerator::new(32)));
    let report = other.rebuild_index().unwrap();
    assert_eq!(report.postings_embedded, 3);

    let metadata = other.matcher().metadata().unwrap();
    assert_eq!(metadata.model_id, "hashed-words");
    assert_eq!(metadata.dimension, 32);
    assert!(other.search_jobs("Python", 1).is_ok());
}

#[test]
fn test_reset_then_embed_missing() {
    let env = TestEnv::flat();
    seed_three_postings(&env);

    let report = env.service.embed_missing().unwrap();
    assert_eq!(report.postings_embedded, 3);
    assert_eq!(env.service.store().count_embedded().unwrap(), 3);

    assert_eq!(env.service.reset_embeddings().unwrap(), 3);
    assert_eq!(env.service.store().count_embedded().unwrap(), 0);

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.postings_embedded, 3);
}
