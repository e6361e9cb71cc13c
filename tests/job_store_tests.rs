//! Integration tests for the job store: ordering, lifecycle and claim races.

use homework_worker::db::Database;
use homework_worker::db::jobs::Transition;
use homework_worker::types::JobStatus;
use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

fn payload() -> serde_json::Value {
    json!({"raw_text": "Матеша: №12", "child_id": 1})
}

mod lifecycle_tests {
    use super::*;

    #[test]
    fn claims_oldest_pending_first() {
        let db = setup_db();
        let first = db.create_job(1, "import_homework", &payload()).unwrap();
        let second = db.create_job(1, "import_homework", &payload()).unwrap();

        let claimed = db.claim_next_job().unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);

        let claimed = db.claim_next_job().unwrap().unwrap();
        assert_eq!(claimed.id, second.id);

        assert!(db.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn complete_writes_result_once() {
        let db = setup_db();
        let job = db.create_job(1, "import_homework", &payload()).unwrap();
        assert!(db.claim_job(job.id).unwrap());

        let done = db
            .complete_job(job.id, JobStatus::Done, &json!({"count": 2}))
            .unwrap();
        let Transition::Applied(done) = done else {
            panic!("expected applied transition");
        };
        assert_eq!(done.status, JobStatus::Done);
        assert_eq!(done.result.unwrap()["count"], 2);

        // terminal: neither failed nor re-running
        let again = db
            .complete_job(job.id, JobStatus::Failed, &json!({"error": {}}))
            .unwrap();
        assert!(matches!(
            again,
            Transition::Rejected {
                current: JobStatus::Done
            }
        ));
        assert!(!db.claim_job(job.id).unwrap());
        assert_eq!(
            db.get_job(job.id).unwrap().unwrap().result.unwrap()["count"],
            2
        );
    }

    #[test]
    fn running_job_never_returns_to_pending() {
        let db = setup_db();
        let job = db.create_job(1, "import_homework", &payload()).unwrap();
        db.claim_job(job.id).unwrap();

        let outcome = db.transition_job(job.id, JobStatus::Pending, None).unwrap();
        assert!(matches!(outcome, Transition::Rejected { .. }));
        assert!(db.claim_next_job().unwrap().is_none());
    }

    #[test]
    fn owner_scoping() {
        let db = setup_db();
        let job = db.create_job(1, "import_homework", &payload()).unwrap();
        db.create_job(2, "import_homework", &payload()).unwrap();

        assert!(db.get_job_for_owner(job.id, 1).unwrap().is_some());
        assert!(db.get_job_for_owner(job.id, 2).unwrap().is_none());
        assert_eq!(db.list_jobs(1, None, None).unwrap().len(), 1);
        assert_eq!(
            db.list_jobs(1, Some(JobStatus::Running), None)
                .unwrap()
                .len(),
            0
        );
        assert_eq!(
            db.list_jobs(1, None, Some("import_homework")).unwrap().len(),
            1
        );

        assert!(!db.delete_job(job.id, 2).unwrap());
        assert!(db.delete_job(job.id, 1).unwrap());
        assert!(db.get_job(job.id).unwrap().is_none());
    }
}

mod concurrency_tests {
    use super::*;

    #[test]
    fn exactly_one_of_two_workers_claims_a_job() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.db");
        let setup = Database::open(&path).unwrap();
        let job = setup.create_job(1, "import_homework", &payload()).unwrap();

        // two independent connections, as two worker processes would have
        let handles = [Database::open(&path).unwrap(), Database::open(&path).unwrap()];
        let barrier = Arc::new(Barrier::new(2));

        let threads: Vec<_> = handles
            .into_iter()
            .map(|db| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    db.claim_job(job.id).unwrap()
                })
            })
            .collect();
        let wins: Vec<bool> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        assert_eq!(wins.iter().filter(|w| **w).count(), 1);
        assert_eq!(
            setup.get_job(job.id).unwrap().unwrap().status,
            JobStatus::Running
        );
    }

    #[test]
    fn racing_pollers_never_share_a_job() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("jobs.db");
        let setup = Database::open(&path).unwrap();
        for _ in 0..20 {
            setup.create_job(1, "import_homework", &payload()).unwrap();
        }

        let barrier = Arc::new(Barrier::new(2));
        let threads: Vec<_> = (0..2)
            .map(|_| {
                let db = Database::open(&path).unwrap();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let mut claimed = Vec::new();
                    while let Some(job) = db.claim_next_job().unwrap() {
                        claimed.push(job.id);
                    }
                    claimed
                })
            })
            .collect();

        let all: Vec<i64> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        let unique: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }
}
