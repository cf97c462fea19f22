//! End-to-end runs with the real fastembed model.

use crate::common::settings_in;
use jobmatch::config::IndexKindSetting;
use jobmatch::{JobId, JobSearchService, NewJobPosting};
use tempfile::TempDir;

fn real_service(dir: &TempDir) -> anyhow::Result<JobSearchService> {
    let mut settings = settings_in(dir, IndexKindSetting::Flat);
    // shared across runs so the model downloads once
    settings.embedding.cache_dir =
        std::env::temp_dir().join(format!("jobmatch_model_cache_{}", whoami()));
    Ok(JobSearchService::open(settings)?)
}

fn whoami() -> String {
    std::env::var("USER").unwrap_or_else(|_| "test".to_string())
}

#[test]
#[ignore = "Downloads 86MB embedding model - run with --ignored"]
fn test_real_model_ranks_ml_posting_first() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let service = real_service(&dir)?;

    let store = service.store();
    store.upsert_posting(&NewJobPosting::new(1, "Backend Engineer", "Python backend engineer"))?;
    store.upsert_posting(&NewJobPosting::new(2, "Frontend Developer", "Frontend React developer"))?;
    store.upsert_posting(&NewJobPosting::new(
        3,
        "ML Engineer",
        "Machine learning engineer, Python, PyTorch",
    ))?;

    let report = service.rebuild_index()?;
    assert_eq!(report.postings_embedded, 3);

    let metadata = service.matcher().metadata()?;
    assert_eq!(metadata.dimension, 384);

    let results = service.search_jobs("Python ML developer", 2)?;
    println!("Results: {results:?}");
    assert_eq!(results[0].job_id, JobId::new(3));
    assert!(!results.iter().any(|m| m.job_id == JobId::new(2)));
    Ok(())
}

#[test]
#[ignore = "Downloads 86MB embedding model - run with --ignored"]
fn test_real_model_embeddings_are_unit_length() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let service = real_service(&dir)?;

    let embedder = service.embedder();
    assert!(!embedder.is_loaded());

    let long_text = "distributed systems engineer ".repeat(400);
    let embeddings = embedder.embed_batch(&["rust developer", long_text.as_str()])?;
    assert!(embedder.is_loaded());

    for embedding in &embeddings {
        assert_eq!(embedding.dimension().get(), 384);
        assert!((embedding.norm() - 1.0).abs() < 1e-3);
    }

    service.shutdown();
    assert!(!embedder.is_loaded());
    Ok(())
}
