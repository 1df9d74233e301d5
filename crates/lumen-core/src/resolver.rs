//! # Conflict Resolver
//!
//! Deterministic, comparison-based policy deciding what to do with a queued
//! local mutation once the authoritative remote record is known.
//!
//! ## Decision Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Resolution Decision Table                          │
//! │                                                                         │
//! │  remote record   operation   remote newer?   fields differ?   decision │
//! │  ─────────────   ─────────   ─────────────   ──────────────   ──────── │
//! │  missing         create/upd      -                -           push as  │
//! │                                                                create  │
//! │  missing         delete          -                -           no-op    │
//! │  exists          create/upd     yes              yes          CONFLICT │
//! │  exists          create/upd     yes              no           push as  │
//! │                                                                update  │
//! │  exists          create/upd     no                -           push as  │
//! │                                                                update  │
//! │  exists          delete         yes               -           CONFLICT │
//! │  exists          delete         no                -           push     │
//! │                                                                delete  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "Remote newer" means the remote `updated_at` is strictly greater than the
//! local `updated_at` captured at enqueue time. Push wins on ties: this is
//! last-writer-wins with explicit conflict flagging, not an automatic merge.
//! Conflicts always surface for resolution via the queue's resolve path.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::types::{OperationKind, RemoteRecord};

// =============================================================================
// Decision
// =============================================================================

/// The wire operation a push should use.
///
/// A `create` against an already-existing remote record is pushed as an
/// update (upsert); a `create`/`update` against a missing remote record is
/// pushed as a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushKind {
    Create,
    Update,
    Delete,
}

/// Outcome of resolving one queue entry against the remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Local wins: deliver the payload with the given wire operation.
    Push(PushKind),
    /// Nothing to deliver (e.g. deleting a record the remote never had);
    /// the entry counts as synced.
    AlreadyConsistent,
    /// Local and remote diverged; the entry must be flagged for explicit
    /// resolution.
    Conflict,
}

// =============================================================================
// Conflict Resolver
// =============================================================================

/// Stateless resolver implementing the decision table above.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn new() -> Self {
        ConflictResolver
    }

    /// Decides the outcome for one entry.
    ///
    /// ## Arguments
    /// * `operation` - The queued mutation kind
    /// * `captured_updated_at` - Local `updated_at` captured at enqueue time
    /// * `local_payload` - The payload snapshot taken at enqueue time
    /// * `remote` - The authoritative record, if the remote has one
    pub fn decide(
        &self,
        operation: OperationKind,
        captured_updated_at: DateTime<Utc>,
        local_payload: &Value,
        remote: Option<&RemoteRecord>,
    ) -> Decision {
        let Some(remote) = remote else {
            return match operation {
                // Remote has never seen this entity: it accepts the push.
                OperationKind::Create | OperationKind::Update => Decision::Push(PushKind::Create),
                // Deleting something the remote does not have.
                OperationKind::Delete => Decision::AlreadyConsistent,
            };
        };

        let remote_newer = remote.updated_at > captured_updated_at;

        match operation {
            OperationKind::Delete => {
                // Delete-vs-update race: the remote changed after the local
                // delete's capture point.
                if remote_newer {
                    Decision::Conflict
                } else {
                    Decision::Push(PushKind::Delete)
                }
            }
            OperationKind::Create | OperationKind::Update => {
                if remote_newer && !business_fields_equal(local_payload, &remote.payload) {
                    Decision::Conflict
                } else {
                    Decision::Push(PushKind::Update)
                }
            }
        }
    }
}

// =============================================================================
// Payload Comparison
// =============================================================================

/// Sync-metadata keys excluded from the business-field comparison.
const METADATA_FIELDS: &[&str] = &["sync_status", "updated_at", "synced_at"];

/// Compares two payloads on business fields only.
///
/// Top-level sync-metadata keys are ignored; everything else must be equal.
/// Non-object payloads are compared directly.
pub fn business_fields_equal(local: &Value, remote: &Value) -> bool {
    match (local, remote) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: std::collections::BTreeSet<&String> = a
                .keys()
                .chain(b.keys())
                .filter(|k| !METADATA_FIELDS.contains(&k.as_str()))
                .collect();

            keys.into_iter()
                .all(|k| a.get(k).unwrap_or(&Value::Null) == b.get(k).unwrap_or(&Value::Null))
        }
        (a, b) => a == b,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn remote(payload: Value, updated_at: DateTime<Utc>) -> RemoteRecord {
        RemoteRecord {
            entity_type: "product".into(),
            entity_id: "p-1".into(),
            payload,
            updated_at,
        }
    }

    #[test]
    fn test_missing_remote_pushes_create() {
        let resolver = ConflictResolver::new();
        let now = Utc::now();
        let payload = json!({"name": "Coke"});

        assert_eq!(
            resolver.decide(OperationKind::Create, now, &payload, None),
            Decision::Push(PushKind::Create)
        );
        assert_eq!(
            resolver.decide(OperationKind::Update, now, &payload, None),
            Decision::Push(PushKind::Create)
        );
    }

    #[test]
    fn test_delete_of_missing_remote_is_consistent() {
        let resolver = ConflictResolver::new();
        assert_eq!(
            resolver.decide(OperationKind::Delete, Utc::now(), &json!({}), None),
            Decision::AlreadyConsistent
        );
    }

    #[test]
    fn test_remote_newer_and_differing_is_conflict() {
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Pepsi"}), captured + Duration::seconds(30));

        assert_eq!(
            resolver.decide(OperationKind::Update, captured, &json!({"name": "Coke"}), Some(&r)),
            Decision::Conflict
        );
    }

    #[test]
    fn test_remote_newer_but_field_equal_pushes() {
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Coke"}), captured + Duration::seconds(30));

        assert_eq!(
            resolver.decide(OperationKind::Update, captured, &json!({"name": "Coke"}), Some(&r)),
            Decision::Push(PushKind::Update)
        );
    }

    #[test]
    fn test_remote_older_pushes_even_when_differing() {
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Pepsi"}), captured - Duration::seconds(30));

        assert_eq!(
            resolver.decide(OperationKind::Update, captured, &json!({"name": "Coke"}), Some(&r)),
            Decision::Push(PushKind::Update)
        );
    }

    #[test]
    fn test_tie_on_timestamp_pushes() {
        // Push wins when remote updated_at == captured (not strictly newer).
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Pepsi"}), captured);

        assert_eq!(
            resolver.decide(OperationKind::Update, captured, &json!({"name": "Coke"}), Some(&r)),
            Decision::Push(PushKind::Update)
        );
    }

    #[test]
    fn test_create_against_existing_remote_becomes_update() {
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Coke"}), captured - Duration::seconds(5));

        assert_eq!(
            resolver.decide(OperationKind::Create, captured, &json!({"name": "Coke"}), Some(&r)),
            Decision::Push(PushKind::Update)
        );
    }

    #[test]
    fn test_delete_vs_update_race_is_conflict() {
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Coke"}), captured + Duration::seconds(10));

        assert_eq!(
            resolver.decide(OperationKind::Delete, captured, &json!({}), Some(&r)),
            Decision::Conflict
        );
    }

    #[test]
    fn test_delete_of_unchanged_remote_pushes_delete() {
        let resolver = ConflictResolver::new();
        let captured = Utc::now();
        let r = remote(json!({"name": "Coke"}), captured - Duration::seconds(10));

        assert_eq!(
            resolver.decide(OperationKind::Delete, captured, &json!({}), Some(&r)),
            Decision::Push(PushKind::Delete)
        );
    }

    #[test]
    fn test_business_fields_ignore_sync_metadata() {
        let local = json!({"name": "Coke", "updated_at": "2026-01-01T00:00:00Z"});
        let remote = json!({"name": "Coke", "updated_at": "2026-02-01T00:00:00Z", "sync_status": "synced"});
        assert!(business_fields_equal(&local, &remote));
    }

    #[test]
    fn test_business_fields_detect_difference() {
        let local = json!({"name": "Coke", "price_cents": 250});
        let remote = json!({"name": "Coke", "price_cents": 300});
        assert!(!business_fields_equal(&local, &remote));
    }

    #[test]
    fn test_business_fields_missing_key_differs() {
        let local = json!({"name": "Coke", "barcode": "123"});
        let remote = json!({"name": "Coke"});
        assert!(!business_fields_equal(&local, &remote));
    }
}
