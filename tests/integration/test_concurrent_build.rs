//! Single-writer builds and searches served while a build runs.

use std::sync::mpsc;
use std::time::Duration;

use crate::common::{GatedGenerator, TestEnv, seed_three_postings};
use jobmatch::config::IndexKindSetting;
use jobmatch::{JobId, MatchError};

#[test]
fn test_second_build_is_rejected_while_first_runs() {
    let (factory, gate) = GatedGenerator::factory();
    let env = TestEnv::with_factory(IndexKindSetting::Flat, factory);
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    env.insert(4, "Slow Engineer", "slow python engineer");

    std::thread::scope(|scope| {
        let running = scope.spawn(|| env.service.rebuild_index());

        gate.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("build never reached the embedder");
        assert!(env.service.is_building());

        let err = env.service.rebuild_index().unwrap_err();
        assert!(matches!(err, MatchError::BuildInProgress), "got {err:?}");
        let err = env.service.embed_missing().unwrap_err();
        assert!(matches!(err, MatchError::BuildInProgress), "got {err:?}");

        // the previous index keeps serving
        let results = env.service.search_jobs("Python ML developer", 10).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].job_id, JobId::new(3));

        gate.release.send(()).unwrap();
        let report = running.join().unwrap().unwrap();
        assert_eq!(report.total_indexed, 4);
    });

    assert!(!env.service.is_building());
    assert_eq!(env.service.matcher().metadata().unwrap().ntotal, 4);
    assert_eq!(env.service.search_jobs("engineer", 10).unwrap().len(), 4);
}

#[test]
fn test_cancelled_build_keeps_previous_index() {
    let (factory, gate) = GatedGenerator::factory();
    let env = TestEnv::with_factory(IndexKindSetting::Flat, factory);
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    env.insert(4, "Slow Engineer", "slow python engineer");

    std::thread::scope(|scope| {
        let running = scope.spawn(|| env.service.rebuild_index());

        gate.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("build never reached the embedder");
        env.service.cancel_build();
        gate.release.send(()).unwrap();

        let err = running.join().unwrap().unwrap_err();
        assert!(matches!(err, MatchError::BuildCancelled), "got {err:?}");
    });

    assert!(!env.service.is_building());
    assert_eq!(env.service.matcher().metadata().unwrap().ntotal, 3);
    assert!(env.service.matcher().reload().unwrap());
    assert_eq!(env.service.matcher().metadata().unwrap().ntotal, 3);

    // the flag is reset for the next build
    let report = env.service.rebuild_index().unwrap();
    assert_eq!(report.total_indexed, 4);
}

#[test]
fn test_query_embedding_does_not_wait_on_build_batch() {
    let (factory, gate) = GatedGenerator::factory();
    let env = TestEnv::with_factory(IndexKindSetting::Flat, factory);
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();
    // load the query model before the build holds its own
    env.service.search_jobs("Python", 1).unwrap();

    env.insert(4, "Slow Engineer", "slow python engineer");

    std::thread::scope(|scope| {
        let running = scope.spawn(|| env.service.rebuild_index());
        gate.entered
            .recv_timeout(Duration::from_secs(10))
            .expect("build never reached the embedder");

        // the build's generator now holds its session lock
        let (done_tx, done_rx) = mpsc::channel();
        let service = &env.service;
        scope.spawn(move || {
            let results = service.search_jobs("Python ML developer", 2);
            let _ = done_tx.send(results);
        });
        let searched = done_rx.recv_timeout(Duration::from_secs(10));

        gate.release.send(()).unwrap();
        running.join().unwrap().unwrap();

        let results = searched
            .expect("search waited on the build's embedding batch")
            .unwrap();
        assert_eq!(results[0].job_id, JobId::new(3));
    });
}

#[test]
fn test_parallel_searches_share_one_index() {
    let env = TestEnv::flat();
    seed_three_postings(&env);
    env.service.rebuild_index().unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| env.service.search_jobs("Python ML developer", 2)))
            .collect();
        for handle in handles {
            let results = handle.join().unwrap().unwrap();
            assert_eq!(
                results.iter().map(|m| m.job_id.get()).collect::<Vec<_>>(),
                vec![3, 1]
            );
        }
    });
}
