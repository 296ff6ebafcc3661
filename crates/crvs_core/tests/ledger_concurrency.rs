use crvs_core::auth::ScopeSet;
use crvs_core::dedup::SqliteSearchIndex;
use crvs_core::model::action::CreatePayload;
use crvs_core::{
    open_db, Actor, ActionPayload, ActionRepository, ActionService, ActorId, NewAction, RecordId,
    RecordType, RegistryConfig, RegistryContext, SqliteActionRepository, SqliteDraftRepository,
    Submission, TransactionId,
};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

const WRITERS: usize = 4;
const APPENDS_PER_WRITER: usize = 10;

fn create_record(path: &Path, record_id: RecordId) {
    let conn = open_db(path).unwrap();
    let ledger = SqliteActionRepository::new(&conn);
    ledger
        .append(
            record_id,
            &[NewAction {
                actor_id: ActorId::from("agent-0"),
                actor_role: "FIELD_AGENT".to_string(),
                payload: ActionPayload::Create(CreatePayload {
                    record_type: RecordType::Marriage,
                }),
                transaction_id: TransactionId::generate(),
                draft_id: None,
            }],
            Some(0),
        )
        .unwrap();
}

fn assert_gap_free(path: &Path, record_id: RecordId, expected_len: usize) {
    let conn = open_db(path).unwrap();
    let history = SqliteActionRepository::new(&conn)
        .list_actions(record_id)
        .unwrap();
    assert_eq!(history.len(), expected_len);

    let sequences: Vec<u64> = history.iter().map(|action| action.sequence).collect();
    let expected: Vec<u64> = (1..=expected_len as u64).collect();
    assert_eq!(sequences, expected);

    let unique: BTreeSet<String> = history
        .iter()
        .map(|action| action.transaction_id.as_str().to_string())
        .collect();
    assert_eq!(unique.len(), expected_len);
}

#[test]
fn concurrent_ledger_appends_get_unique_contiguous_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("ledger.sqlite3"));
    let record_id = Uuid::new_v4();
    create_record(&path, record_id);

    let handles: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let path = Arc::clone(&path);
            thread::spawn(move || {
                let conn = open_db(path.as_path()).unwrap();
                let ledger = SqliteActionRepository::new(&conn);
                for n in 0..APPENDS_PER_WRITER {
                    let action = NewAction {
                        actor_id: ActorId::new(format!("agent-{writer}")),
                        actor_role: "REGISTRATION_AGENT".to_string(),
                        payload: ActionPayload::Read,
                        transaction_id: TransactionId::new(format!("w{writer}-{n}")),
                        draft_id: None,
                    };
                    ledger.append(record_id, &[action], None).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_gap_free(&path, record_id, 1 + WRITERS * APPENDS_PER_WRITER);
}

#[test]
fn concurrent_submissions_retry_past_sequence_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let path = Arc::new(dir.path().join("ledger.sqlite3"));
    let record_id = Uuid::new_v4();
    create_record(&path, record_id);

    let config = RegistryConfig {
        append_retry_budget: 16,
        ..RegistryConfig::default()
    };
    let context = Arc::new(RegistryContext::from_config(&config).unwrap());

    let handles: Vec<_> = (0..2)
        .map(|writer| {
            let path = Arc::clone(&path);
            let context = Arc::clone(&context);
            thread::spawn(move || {
                let conn = open_db(path.as_path()).unwrap();
                let service = ActionService::new(
                    SqliteActionRepository::new(&conn),
                    SqliteDraftRepository::new(&conn),
                    SqliteSearchIndex::new(&conn),
                    context.as_ref(),
                );
                let actor = Actor {
                    id: ActorId::new(format!("reader-{writer}")),
                    role: "AUDITOR".to_string(),
                    scopes: ScopeSet::parse(["record.read"]).unwrap(),
                };
                for n in 0..APPENDS_PER_WRITER {
                    let outcome = service
                        .submit(
                            &actor,
                            &Submission {
                                record_id,
                                payload: ActionPayload::Read,
                                transaction_id: TransactionId::new(format!("r{writer}-{n}")),
                                expected_prior: None,
                                draft_id: None,
                            },
                        )
                        .unwrap();
                    assert!(!outcome.replayed);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_gap_free(&path, record_id, 1 + 2 * APPENDS_PER_WRITER);
}
