//! Postings files feeding the store and a subsequent build.

use std::io::Write;

use crate::common::TestEnv;
use jobmatch::io::read_postings;
use jobmatch::{JobId, MatchError, UpsertOutcome};
use tempfile::NamedTempFile;

const POSTINGS: &str = r#"{
  "jobs": [
    {"job_id": 10, "title": "Platform Engineer", "company": "Acme",
     "description": "Backend server engineer", "location": "Remote"},
    {"job_id": 11, "title": "Data Scientist", "company": "Globex",
     "description": "Machine learning with Python", "url": "https://example.com/11"},
    {"job_id": 12, "title": "UI Developer",
     "description": "Frontend React developer"}
  ]
}"#;

fn postings_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_imported_postings_are_searchable() {
    let env = TestEnv::flat();
    let file = postings_file(POSTINGS);

    let postings = read_postings(file.path()).unwrap();
    for posting in &postings {
        let outcome = env.service.store().upsert_posting(posting).unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
    }
    assert_eq!(env.service.store().count_postings().unwrap(), 3);

    env.service.rebuild_index().unwrap();
    let hits = env.service.search_postings("python machine learning", 1).unwrap();
    assert_eq!(hits[0].posting.job_id, JobId::new(11));
    assert_eq!(hits[0].posting.company, "Globex");
    assert_eq!(hits[0].posting.url.as_deref(), Some("https://example.com/11"));
}

#[test]
fn test_reimport_keeps_embeddings_of_unchanged_postings() {
    let env = TestEnv::flat();
    let file = postings_file(POSTINGS);
    for posting in &read_postings(file.path()).unwrap() {
        env.service.store().upsert_posting(posting).unwrap();
    }
    env.service.rebuild_index().unwrap();

    for posting in &read_postings(file.path()).unwrap() {
        let outcome = env.service.store().upsert_posting(posting).unwrap();
        assert_eq!(
            outcome,
            UpsertOutcome::Updated {
                embedding_cleared: false
            }
        );
    }

    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.postings_embedded, 0);
    assert_eq!(report.total_indexed, 3);
}

#[test]
fn test_blank_description_is_rejected_by_the_store() {
    let env = TestEnv::flat();
    let file = postings_file(r#"[{"job_id": 1, "title": "Empty", "description": "   "}]"#);

    let postings = read_postings(file.path()).unwrap();
    let err: MatchError = env
        .service
        .store()
        .upsert_posting(&postings[0])
        .unwrap_err()
        .into();
    assert_eq!(err.status_code(), "INVALID_INPUT");
    assert_eq!(env.service.store().count_postings().unwrap(), 0);
}
