use notistore_core::db::open_db_in_memory;
use notistore_core::{
    AggregateCache, CountState, DefaultGroupingPolicy, EntityRef, NewNotification, Notification,
    NotificationQuery, NotificationRepository, NotificationService, RepoError,
    SqliteNotificationRepository,
};

fn reference(entity_type: &str, id: &str) -> EntityRef {
    EntityRef::new(entity_type, id).unwrap()
}

fn user() -> EntityRef {
    reference("User", "1")
}

fn comment(
    repo: &SqliteNotificationRepository<'_>,
    article: &str,
    notifier: Option<&str>,
    created_at: i64,
) -> Notification {
    let mut input = NewNotification::new(user(), reference("Comment", "1"), "comment.default")
        .with_group(reference("Article", article));
    if let Some(notifier) = notifier {
        input = input.with_notifier(reference("User", notifier));
    }
    repo.insert_grouped(&input, &DefaultGroupingPolicy::default(), created_at)
        .unwrap()
}

#[test]
fn counts_are_batched_per_target_and_state() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();

    let owner_a = comment(&repo, "1", Some("1"), 1);
    for (at, notifier) in [(2, "2"), (3, "2"), (4, "3"), (5, "1")] {
        comment(&repo, "1", Some(notifier), at);
    }
    let owner_b = comment(&repo, "2", None, 6);
    comment(&repo, "2", Some("4"), 7);
    comment(&repo, "2", Some("5"), 8);

    let owners = repo
        .list_notifications(&NotificationQuery::unopened_index(false, false).filtered_by_target(&user()))
        .unwrap();
    assert_eq!(owners.len(), 2);

    let mut cache = AggregateCache::new(&repo, 10);
    cache.prime(&owners);

    assert_eq!(cache.member_count(owner_a.id, CountState::Unopened, None).unwrap(), 4);
    assert_eq!(cache.member_count(owner_b.id, CountState::Unopened, None).unwrap(), 2);
    assert_eq!(cache.queries_issued(), 1);

    assert_eq!(
        cache
            .distinct_notifier_count(owner_a.id, CountState::Unopened, None)
            .unwrap(),
        2
    );
    assert_eq!(
        cache
            .distinct_notifier_count(owner_b.id, CountState::Unopened, None)
            .unwrap(),
        0
    );
    assert_eq!(cache.queries_issued(), 2);

    assert_eq!(cache.member_count(owner_a.id, CountState::Opened, None).unwrap(), 0);
    assert_eq!(cache.queries_issued(), 3);
}

#[test]
fn opened_counts_are_clamped_to_limit() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();

    let owner = comment(&repo, "1", Some("1"), 1);
    for (at, notifier) in [(2, "2"), (3, "3"), (4, "4")] {
        comment(&repo, "1", Some(notifier), at);
    }
    repo.open_notification(owner.id, 10).unwrap();

    let mut cache = AggregateCache::new(&repo, 10);
    assert_eq!(cache.member_count(owner.id, CountState::Opened, None).unwrap(), 3);
    assert_eq!(cache.member_count(owner.id, CountState::Opened, Some(2)).unwrap(), 2);
    assert_eq!(
        cache
            .distinct_notifier_count(owner.id, CountState::Opened, Some(2))
            .unwrap(),
        2
    );
    assert_eq!(cache.member_count(owner.id, CountState::Unopened, None).unwrap(), 0);
}

#[test]
fn unknown_owner_is_reported() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();

    let mut cache = AggregateCache::new(&repo, 10);
    assert!(matches!(
        cache.member_count(42, CountState::Unopened, None),
        Err(RepoError::NotFound(42))
    ));
}

#[test]
fn owner_without_members_counts_zero() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let owner = comment(&repo, "1", Some("1"), 1);

    let service = NotificationService::new(repo);
    assert_eq!(service.member_count(owner.id, CountState::Unopened, None).unwrap(), 0);
    assert_eq!(
        service
            .distinct_notifier_count(owner.id, CountState::Unopened, None)
            .unwrap(),
        0
    );
}

#[test]
fn group_members_are_listed_earliest_first() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let owner = comment(&repo, "1", Some("1"), 1);
    let first = comment(&repo, "1", Some("2"), 2);
    let second = comment(&repo, "1", Some("3"), 3);

    let service = NotificationService::new(repo);
    let members = service.group_members(owner.id).unwrap();
    assert_eq!(
        members.iter().map(|row| row.id).collect::<Vec<_>>(),
        vec![first.id, second.id]
    );
    assert_eq!(
        service.group_owner(second.id).unwrap().map(|row| row.id),
        Some(owner.id)
    );
    assert!(service.group_owner(owner.id).unwrap().is_none());
}
