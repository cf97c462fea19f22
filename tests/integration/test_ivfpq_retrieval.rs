//! Search quality on a trained IVF-PQ index, checked against exact flat search.

use std::sync::Arc;

use crate::common::{HashedWordsGenerator, TestEnv};
use jobmatch::config::IndexKindSetting;
use jobmatch::{IndexArtifact, IndexKind, JobId};

const SKILLS: &[&str] = &[
    "python", "rust", "java", "golang", "react", "kubernetes", "postgres", "spark", "terraform",
    "pytorch", "swift", "kotlin", "scala", "django",
];
const ROLES: &[&str] = &["engineer", "developer", "analyst", "architect", "scientist", "manager"];
const CITIES: &[&str] = &["berlin", "lisbon", "austin", "toronto", "osaka"];

fn description(i: usize) -> String {
    format!(
        "{} {} {} {} in {} team{}",
        SKILLS[i % SKILLS.len()],
        SKILLS[(i * 7 + 3) % SKILLS.len()],
        ROLES[i % ROLES.len()],
        ROLES[(i / 3) % ROLES.len()],
        CITIES[i % CITIES.len()],
        i
    )
}

fn seeded(count: usize) -> TestEnv {
    seeded_with(IndexKindSetting::Ivfpq, count)
}

fn seeded_with(kind: IndexKindSetting, count: usize) -> TestEnv {
    let env = TestEnv::new(kind, Arc::new(HashedWordsGenerator::new(64)));
    for i in 0..count {
        env.insert(i as i64 + 1, &format!("Posting {i}"), &description(i));
    }
    env
}

#[test]
fn test_ivfpq_build_metadata() {
    let env = seeded(120);

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.kind, Some(IndexKind::IvfPq));
    assert_eq!(report.total_indexed, 120);

    let artifact = IndexArtifact::load(&env.index_dir()).unwrap().unwrap();
    let metadata = artifact.metadata();
    assert_eq!(metadata.kind, IndexKind::IvfPq);
    // 120 / 39 rounds down to 3, raised to the minimum of 4
    assert_eq!(metadata.number_of_clusters, 4);
    assert_eq!(metadata.training_sample_size, 120);
    assert_eq!(metadata.codebook_size, 120);
    assert_eq!(metadata.quantization_bits, 8);
    assert_eq!(metadata.ntotal, 120);
    assert_eq!(metadata.default_nprobe, 4);
    assert_eq!(metadata.ntotal, artifact.mapping().len());
    assert!(metadata.normalized);
}

#[test]
fn test_postings_retrieve_themselves() {
    let env = seeded(120);
    env.service.rebuild_index().unwrap();

    let probes: Vec<usize> = (0..120).step_by(6).collect();
    let found = probes
        .iter()
        .filter(|&&i| {
            let results = env.service.search_jobs(&description(i), 5).unwrap();
            results.iter().any(|m| m.job_id == JobId::new(i as i64 + 1))
        })
        .count();

    assert!(
        found * 10 >= probes.len() * 9,
        "only {found}/{} postings found themselves in the top 5",
        probes.len()
    );
}

#[test]
fn test_flat_index_finds_every_posting_from_its_description() {
    let env = seeded_with(IndexKindSetting::Flat, 60);
    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.kind, Some(IndexKind::Flat));

    for i in 0..60 {
        let own = JobId::new(i as i64 + 1);
        let results = env.service.search_jobs(&description(i), 3).unwrap();
        let hit = results
            .iter()
            .find(|m| m.job_id == own)
            .unwrap_or_else(|| panic!("job {own} missing from its own top 3"));
        assert!((hit.score.get() - 1.0).abs() < 1e-4);
        assert!((results[0].score.get() - 1.0).abs() < 1e-4);
    }
}

#[test]
fn test_ivfpq_results_are_ordered_and_bounded() {
    let env = seeded(120);
    env.service.rebuild_index().unwrap();

    let results = env.service.search_jobs("python engineer in berlin", 10).unwrap();
    assert_eq!(results.len(), 10);
    for window in results.windows(2) {
        assert!(
            window[0].score > window[1].score
                || (window[0].score == window[1].score && window[0].job_id < window[1].job_id)
        );
    }
    for hit in &results {
        assert!((-1.0..=1.0).contains(&hit.score.get()));
    }
}

#[test]
fn test_ivfpq_backfills_deleted_jobs() {
    let env = seeded(120);
    env.service.rebuild_index().unwrap();

    let before = env.service.search_jobs("rust developer", 5).unwrap();
    for hit in &before {
        env.service.store().delete_posting(hit.job_id).unwrap();
    }

    let after = env.service.search_jobs("rust developer", 5).unwrap();
    assert_eq!(after.len(), 5);
    assert!(after.iter().all(|hit| !before.iter().any(|b| b.job_id == hit.job_id)));
}
