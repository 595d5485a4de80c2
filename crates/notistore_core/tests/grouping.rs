use notistore_core::db::open_db_in_memory;
use notistore_core::{
    DefaultGroupingPolicy, EntityRef, GroupingPolicy, NewNotification, Notification,
    NotificationQuery, NotificationRepository, SqliteNotificationRepository,
};

fn reference(entity_type: &str, id: &str) -> EntityRef {
    EntityRef::new(entity_type, id).unwrap()
}

fn grouped(user_id: &str, article_id: &str, key: &str) -> NewNotification {
    NewNotification::new(reference("User", user_id), reference("Comment", "1"), key)
        .with_group(reference("Article", article_id))
}

#[test]
fn second_create_joins_unopened_owner_and_opened_owner_starts_new_group() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let policy = DefaultGroupingPolicy::default();

    let n1 = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 100)
        .unwrap();
    let n2 = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 200)
        .unwrap();
    assert!(n1.is_group_owner());
    assert_eq!(n2.group_owner_id, Some(n1.id));

    repo.open_notification(n1.id, 250).unwrap();
    let n3 = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 300)
        .unwrap();
    assert_eq!(n3.group_owner_id, None);

    let owners = repo
        .list_notifications(
            &NotificationQuery::all_index(false, false).filtered_by_target(&reference("User", "1")),
        )
        .unwrap();
    assert_eq!(ids(&owners), vec![n3.id, n1.id]);
}

#[test]
fn members_always_point_at_owners() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let policy = DefaultGroupingPolicy::default();

    let owner = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 1)
        .unwrap();
    for at in 2..6 {
        let member = repo
            .insert_grouped(&grouped("1", "1", "comment.default"), &policy, at)
            .unwrap();
        assert_eq!(member.group_owner_id, Some(owner.id));
    }

    let members = repo
        .list_notifications(&NotificationQuery::new().members_only())
        .unwrap();
    assert_eq!(members.len(), 4);
    for member in members {
        let member_owner = repo
            .get_notification(member.group_owner_id.unwrap())
            .unwrap()
            .unwrap();
        assert!(member_owner.is_group_owner());
    }
}

#[test]
fn grouping_is_scoped_by_target_and_group() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let policy = DefaultGroupingPolicy::default();

    let owner = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 1)
        .unwrap();
    let other_target = repo
        .insert_grouped(&grouped("2", "1", "comment.default"), &policy, 2)
        .unwrap();
    let other_group = repo
        .insert_grouped(&grouped("1", "2", "comment.default"), &policy, 3)
        .unwrap();
    let ungrouped = repo
        .insert_grouped(
            &NewNotification::new(reference("User", "1"), reference("Comment", "1"), "comment.default"),
            &policy,
            4,
        )
        .unwrap();
    let ungrouped_again = repo
        .insert_grouped(
            &NewNotification::new(reference("User", "1"), reference("Comment", "1"), "comment.default"),
            &policy,
            5,
        )
        .unwrap();

    assert!(owner.is_group_owner());
    assert!(other_target.is_group_owner());
    assert!(other_group.is_group_owner());
    assert!(ungrouped.is_group_owner());
    assert!(ungrouped_again.is_group_owner());
}

#[test]
fn newest_unopened_owner_is_chosen() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let policy = DefaultGroupingPolicy::default();

    let older = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 10)
        .unwrap();
    repo.open_notification(older.id, 11).unwrap();
    let newer = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 20)
        .unwrap();
    let member = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 30)
        .unwrap();

    assert!(newer.is_group_owner());
    assert_eq!(member.group_owner_id, Some(newer.id));
}

#[test]
fn keys_merge_unless_group_by_key_is_enabled() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();

    let any_key = DefaultGroupingPolicy::default();
    let owner = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &any_key, 1)
        .unwrap();
    let reply = repo
        .insert_grouped(&grouped("1", "1", "comment.reply"), &any_key, 2)
        .unwrap();
    assert_eq!(reply.group_owner_id, Some(owner.id));

    let same_key = DefaultGroupingPolicy {
        group_by_key: true,
        window_ms: None,
    };
    let like = repo
        .insert_grouped(&grouped("1", "1", "article.like"), &same_key, 3)
        .unwrap();
    assert!(like.is_group_owner());
    let second_like = repo
        .insert_grouped(&grouped("1", "1", "article.like"), &same_key, 4)
        .unwrap();
    assert_eq!(second_like.group_owner_id, Some(like.id));
}

#[test]
fn window_policy_starts_new_group_after_expiry() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();
    let policy = DefaultGroupingPolicy {
        group_by_key: false,
        window_ms: Some(1_000),
    };

    let owner = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 0)
        .unwrap();
    let inside = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 1_000)
        .unwrap();
    let outside = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &policy, 1_001)
        .unwrap();

    assert_eq!(inside.group_owner_id, Some(owner.id));
    assert_eq!(outside.group_owner_id, None);
}

struct NeverMerge;

impl GroupingPolicy for NeverMerge {
    fn accepts(&self, _candidate: &Notification, _input: &NewNotification, _now_ms: i64) -> bool {
        false
    }
}

#[test]
fn custom_policy_can_veto_merges() {
    let conn = open_db_in_memory().unwrap();
    let repo = SqliteNotificationRepository::try_new(&conn).unwrap();

    let first = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &NeverMerge, 1)
        .unwrap();
    let second = repo
        .insert_grouped(&grouped("1", "1", "comment.default"), &NeverMerge, 2)
        .unwrap();

    assert!(first.is_group_owner());
    assert!(second.is_group_owner());
}

fn ids(rows: &[Notification]) -> Vec<i64> {
    rows.iter().map(|row| row.id).collect()
}
