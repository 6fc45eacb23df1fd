mod common;

use common::{committee_fields, new_committee, FaultyStore, Harness};
use committee_core::repo::committee_repo::CommitteeRepository;
use committee_core::service::notifier::{ChangeAction, COMMITTEE_ACCESS_SUBJECT, COMMITTEE_INDEX_SUBJECT};
use committee_core::{ErrorKind, OpContext, SettingsFields};
use std::sync::Arc;

#[test]
fn etag_is_checked_before_storage() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let uid = created.base.value.uid;

    for etag in [None, Some(""), Some("abc"), Some("-1"), Some("1.5")] {
        let err = harness
            .services
            .committees
            .update_committee_base(&ctx, uid, committee_fields("Renamed"), etag)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "etag {etag:?}");
        let err = harness
            .services
            .committees
            .delete_committee(&ctx, uid, etag)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation, "etag {etag:?}");
    }

    let missing = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, committee_fields("Renamed"), None)
        .unwrap_err();
    assert_eq!(missing.to_string(), "ETag is required");

    let current = harness.services.committees.get_committee_base(&ctx, uid).unwrap();
    assert_eq!(current, created.base);
}

#[test]
fn stale_etag_is_conflict_and_fresh_etag_succeeds() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", true))
        .unwrap();
    let uid = created.base.value.uid;

    let mut fields = committee_fields("Security");
    fields.description = Some("first".to_string());
    let first = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, fields.clone(), Some(&created.base.etag()))
        .unwrap();
    assert!(first.revision > created.base.revision);
    assert_eq!(first.value.created_at, created.base.value.created_at);
    assert_eq!(first.value.sso_group_name, created.base.value.sso_group_name);

    fields.description = Some("second".to_string());
    let err = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, fields.clone(), Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = harness
        .services
        .committees
        .delete_committee(&ctx, uid, Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let quoted = format!("\"{}\"", first.revision);
    harness
        .services
        .committees
        .update_committee_base(&ctx, uid, fields, Some(&quoted))
        .unwrap();
}

#[test]
fn committee_cannot_be_its_own_parent() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let uid = created.base.value.uid;
    let mut fields = committee_fields("Security");
    fields.parent_uid = Some(uid);
    let err = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, fields, Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn rename_moves_the_name_reservation() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let other = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Governance", false))
        .unwrap();
    let uid = created.base.value.uid;

    let err = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, committee_fields("governance"), Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let renamed = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, committee_fields("Security Response"), Some(&created.base.etag()))
        .unwrap();
    assert_eq!(renamed.value.name, "Security Response");
    // two bases + two name reservations
    assert_eq!(harness.key_count(harness.committees_bucket()), 4);

    // The old name is free again, the new one is taken.
    harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let err = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("security response", false))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(harness
        .services
        .committees
        .get_committee_base(&ctx, other.base.value.uid)
        .is_ok());
}

#[test]
fn stale_rename_does_not_keep_the_new_name() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let uid = created.base.value.uid;
    let bumped = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, committee_fields("Security"), Some(&created.base.etag()))
        .unwrap();
    assert!(bumped.revision > created.base.revision);

    let err = harness
        .services
        .committees
        .update_committee_base(&ctx, uid, committee_fields("Audit"), Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Audit", false))
        .unwrap();
}

#[test]
fn enabling_sso_on_update_allocates_a_name() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let mut fields = committee_fields("Security");
    fields.sso_group_enabled = true;
    let updated = harness
        .services
        .committees
        .update_committee_base(&ctx, created.base.value.uid, fields, Some(&created.base.etag()))
        .unwrap();
    assert_eq!(updated.value.sso_group_name.as_deref(), Some("proj-security-1"));
    assert!(harness
        .services
        .committees
        .repository()
        .sso_group_reserved(&ctx, "proj-security-1")
        .unwrap());
}

#[test]
fn settings_update_is_cas_gated_and_keeps_created_at() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let uid = created.base.value.uid;
    let settings = created.settings.unwrap();

    let fields = SettingsFields {
        auditors: vec!["carol".to_string()],
        ..SettingsFields::default()
    };
    let updated = harness
        .services
        .committees
        .update_committee_settings(&ctx, uid, fields.clone(), Some(&settings.etag()))
        .unwrap();
    assert_eq!(updated.value.auditors, vec!["carol".to_string()]);
    assert_eq!(updated.value.created_at, settings.value.created_at);

    let err = harness
        .services
        .committees
        .update_committee_settings(&ctx, uid, fields, Some(&settings.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Base revision is independent of settings writes.
    let base = harness.services.committees.get_committee_base(&ctx, uid).unwrap();
    assert_eq!(base.revision, created.base.revision);
}

#[test]
fn delete_cascades_and_frees_names() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", true))
        .unwrap();
    let uid = created.base.value.uid;

    harness
        .services
        .committees
        .delete_committee(&ctx, uid, Some(&created.base.etag()))
        .unwrap();
    assert_eq!(
        harness
            .services
            .committees
            .get_committee_base(&ctx, uid)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(harness.key_count(harness.committees_bucket()), 0);
    assert_eq!(harness.key_count(harness.settings_bucket()), 0);

    let deleted = harness.notifier.messages_for(COMMITTEE_INDEX_SUBJECT);
    assert_eq!(deleted.last().unwrap().action, ChangeAction::Deleted);

    let recreated = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", true))
        .unwrap();
    assert_ne!(recreated.base.value.uid, uid);
    assert_eq!(recreated.base.value.sso_group_name.as_deref(), Some("proj-security-1"));
}

#[test]
fn delete_tolerates_missing_settings_but_not_missing_base() {
    let harness = Harness::new();
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    let uid = created.base.value.uid;
    let settings = created.settings.unwrap();
    harness
        .services
        .committees
        .repository()
        .delete_settings(&ctx, uid, settings.revision)
        .unwrap();

    let record = harness.services.committees.get_committee(&ctx, uid).unwrap();
    assert!(record.settings.is_none());

    harness
        .services
        .committees
        .delete_committee(&ctx, uid, Some(&created.base.etag()))
        .unwrap();
    let err = harness
        .services
        .committees
        .delete_committee(&ctx, uid, Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn publish_failure_does_not_fail_writes() {
    let harness = Harness::new();
    harness.notifier.set_failing(true);
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", false))
        .unwrap();
    harness
        .services
        .committees
        .delete_committee(&ctx, created.base.value.uid, Some(&created.base.etag()))
        .unwrap();
    assert!(harness.notifier.messages().is_empty());
}

#[test]
fn failed_settings_purge_still_announces_the_deleted_base() {
    let store = Arc::new(FaultyStore::new());
    let harness = Harness::with_store(store.clone());
    let ctx = OpContext::background();
    let created = harness
        .services
        .committees
        .create_committee(&ctx, new_committee("Security", true))
        .unwrap();
    let uid = created.base.value.uid;
    harness.notifier.clear();

    store.fail_deletes_in(Some(harness.settings_bucket()));
    let err = harness
        .services
        .committees
        .delete_committee(&ctx, uid, Some(&created.base.etag()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unexpected);

    // Base and both reservations are gone; only the settings record is left.
    assert_eq!(harness.key_count(harness.committees_bucket()), 0);
    assert_eq!(harness.key_count(harness.settings_bucket()), 1);

    let index = harness.notifier.messages_for(COMMITTEE_INDEX_SUBJECT);
    assert_eq!(index.len(), 1);
    assert_eq!(index[0].action, ChangeAction::Deleted);
    assert_eq!(index[0].uid, uid.to_string());
    assert_eq!(harness.notifier.messages_for(COMMITTEE_ACCESS_SUBJECT).len(), 1);
}
