//! Ranking order, score bounds and stale-entry backfill on small flat indexes.

use crate::common::{KeywordEmbeddingGenerator, TestEnv, seed_three_postings};
use jobmatch::JobId;

fn ids(matches: &[jobmatch::JobMatch]) -> Vec<i64> {
    matches.iter().map(|m| m.job_id.get()).collect()
}

#[test]
fn test_ml_query_prefers_ml_posting() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let results = env.service.search_jobs("Python ML developer", 2).unwrap();

    assert_eq!(ids(&results), vec![3, 1]);
    assert!(results[0].score > results[1].score);
    assert!(!results.iter().any(|m| m.job_id == JobId::new(2)));
}

#[test]
fn test_scores_are_cosine_similarities() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let results = env.service.search_jobs("Python ML developer", 3).unwrap();
    assert_eq!(ids(&results), vec![3, 1, 2]);

    let query = KeywordEmbeddingGenerator::vector("Python ML developer");
    let best = KeywordEmbeddingGenerator::vector("Machine learning engineer, Python, PyTorch");
    let expected: f32 = query.iter().zip(&best).map(|(a, b)| a * b).sum();
    assert!((results[0].score.get() - expected).abs() < 1e-4);

    for window in results.windows(2) {
        assert!(window[0].score >= window[1].score);
    }
    for hit in &results {
        assert!((-1.0..=1.0).contains(&hit.score.get()));
    }
}

#[test]
fn test_top_k_larger_than_corpus_returns_everything() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let results = env.service.search_jobs("engineer", 50).unwrap();
    assert_eq!(results.len(), 3);
}

#[test]
fn test_equal_scores_order_by_job_id() {
    let env = TestEnv::flat();
    env.insert(9, "Data Engineer", "Python data pipelines");
    env.insert(5, "Data Engineer", "Python data pipelines");
    env.insert(7, "Data Engineer", "Python data pipelines");
    env.service.rebuild_index().unwrap();

    let results = env.service.search_jobs("python", 3).unwrap();
    assert_eq!(ids(&results), vec![5, 7, 9]);
}

#[test]
fn test_deleted_job_is_backfilled() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    env.service.store().delete_posting(JobId::new(3)).unwrap();

    let results = env.service.search_jobs("Python ML developer", 2).unwrap();
    assert_eq!(ids(&results), vec![1, 2]);
}

#[test]
fn test_all_deleted_yields_empty_result() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    for id in 1..=3 {
        env.service.store().delete_posting(JobId::new(id)).unwrap();
    }

    let results = env.service.search_jobs("Python ML developer", 2).unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_search_postings_resolves_full_records() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let hits = env.service.search_postings("Python ML developer", 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].posting.title, "ML Engineer");
    assert_eq!(hits[0].posting.job_id, JobId::new(3));
}

#[test]
fn test_pages_cover_ranking_in_order() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let first = env.service.search_page("Python ML developer", 1, 2).unwrap();
    let second = env.service.search_page("Python ML developer", 2, 2).unwrap();

    assert_eq!(first.total, 3);
    assert_eq!(first.total_pages, 2);
    assert_eq!(ids(&first.results), vec![3, 1]);
    assert_eq!(ids(&second.results), vec![2]);
    assert_eq!(second.total_pages, 2);
}

#[test]
fn test_page_count_reflects_all_ranked_matches() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    let first = env.service.search_page("Python ML developer", 1, 1).unwrap();
    assert_eq!(ids(&first.results), vec![3]);
    assert_eq!(first.total, 3);
    assert_eq!(first.total_pages, 3);

    let last = env.service.search_page("Python ML developer", 3, 1).unwrap();
    assert_eq!(ids(&last.results), vec![2]);
    assert_eq!(last.total_pages, 3);

    let beyond = env.service.search_page("Python ML developer", 4, 1).unwrap();
    assert!(beyond.results.is_empty());
    assert_eq!(beyond.total, 3);
}
