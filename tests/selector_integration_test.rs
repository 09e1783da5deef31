// ==========================================
// 到期记录选择器集成测试
// ==========================================
// 测试目标: SQLite 事件存储 + 选择器 + 限制器 的组合行为
// ==========================================


use campaign_event_scheduler::engine::{ContactLimiter, ScheduledEventSelector, SchedulerError};
use campaign_event_scheduler::logging;
use campaign_event_scheduler::repository::EventLogRepository;
use chrono::Duration;
use std::sync::Arc;
use test_helpers::{test_now, LogBuilder, TestDb};

const CAMPAIGN: i64 = 2;
const EVENT: i64 = 20;

fn setup() -> (TestDb, ScheduledEventSelector<Arc<EventLogRepository>>) {
    logging::init_test();
    let db = TestDb::new();
    db.campaign(CAMPAIGN, true).event(EVENT, CAMPAIGN);
    let selector = ScheduledEventSelector::new(db.logs.clone());
    (db, selector)
}

// ==========================================
// 预算与批量
// ==========================================

#[test]
fn test_batch_smaller_than_budget() {
    let (db, selector) = setup();
    let ids = db.insert_due(CAMPAIGN, EVENT, 1, 5);

    let mut limiter = ContactLimiter::builder()
        .batch_limit(3)
        .campaign_limit(10)
        .build()
        .unwrap();
    let logs = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();

    assert_eq!(logs.iter().map(|l| l.id).collect::<Vec<_>>(), ids[..3].to_vec());
    assert_eq!(limiter.campaign_limit_remaining(), Some(7));
}

#[test]
fn test_budget_smaller_than_due_then_exhausted() {
    let (db, selector) = setup();
    db.insert_due(CAMPAIGN, EVENT, 1, 5);

    let mut limiter = ContactLimiter::builder().campaign_limit(2).build().unwrap();
    let first = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(limiter.campaign_limit_remaining(), Some(0));

    let second = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();
    assert!(second.is_empty());
}

#[test]
fn test_selection_never_exceeds_cap() {
    let (db, selector) = setup();
    db.insert_due(CAMPAIGN, EVENT, 1, 6);

    for (batch, budget) in [(1, 6), (4, 2), (10, 10), (6, 3)] {
        let mut limiter = ContactLimiter::builder()
            .batch_limit(batch)
            .campaign_limit(budget)
            .build()
            .unwrap();
        let logs = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();
        assert!(logs.len() <= batch.min(budget));
        assert_eq!(limiter.campaign_limit_remaining(), Some(budget - logs.len()));
    }
}

#[test]
fn test_unknown_event_is_not_found() {
    let (_db, selector) = setup();
    let mut limiter = ContactLimiter::builder().campaign_limit(5).build().unwrap();

    let err = selector.select_due(999, test_now(), &mut limiter).unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound(_)));
    assert_eq!(limiter.campaign_limit_remaining(), Some(5));
}

// ==========================================
// 取消调度
// ==========================================

#[test]
fn test_unschedule_and_log_removes_from_selection() {
    let (db, selector) = setup();
    let a = db.insert_log(LogBuilder::new(7, CAMPAIGN, EVENT));
    let b = db.insert_log(LogBuilder::new(7, CAMPAIGN, EVENT).trigger_in(Duration::minutes(-5)));
    let other = db.insert_log(LogBuilder::new(8, CAMPAIGN, EVENT));

    let n = selector.unschedule_and_log(7, CAMPAIGN, 0, "removed").unwrap();
    assert_eq!(n, 2);

    for id in [a, b] {
        let log = db.logs.find_by_id(id).unwrap().unwrap();
        assert!(!log.is_scheduled);
        let failed = db.logs.find_failed_log(id).unwrap().unwrap();
        assert_eq!(failed.reason.as_deref(), Some("removed"));
    }

    let mut limiter = ContactLimiter::unbounded();
    let ids: Vec<i64> = selector
        .select_due(EVENT, test_now(), &mut limiter)
        .unwrap()
        .iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(ids, vec![other]);
    assert!(selector.select_by_ids(&[a, b]).unwrap().is_empty());
}

#[test]
fn test_repeated_unschedule_keeps_latest_reason() {
    let (db, selector) = setup();
    let ids = db.insert_due(CAMPAIGN, EVENT, 7, 1);
    let id = ids[0];

    selector.unschedule_and_log(7, CAMPAIGN, 0, "removed").unwrap();
    let second = selector
        .unschedule_and_log(7, CAMPAIGN, 0, "unsubscribed")
        .unwrap();
    assert_eq!(second, 0);

    assert_eq!(db.failed_log_count(id), 1);
    assert_eq!(
        db.logs.find_failed_log(id).unwrap().unwrap().reason.as_deref(),
        Some("unsubscribed")
    );
}

#[test]
fn test_unschedule_other_rotation_untouched() {
    let (db, selector) = setup();
    let current = db.insert_log(LogBuilder::new(7, CAMPAIGN, EVENT).rotation(1));

    let n = selector.unschedule_and_log(7, CAMPAIGN, 0, "removed").unwrap();
    assert_eq!(n, 0);
    assert!(db.logs.find_by_id(current).unwrap().unwrap().is_scheduled);
    assert_eq!(db.failed_log_count(current), 0);
}

// ==========================================
// 抢占 / 复核
// ==========================================

#[test]
fn test_mark_executed_twice_is_stale() {
    let (db, selector) = setup();
    let id = db.insert_due(CAMPAIGN, EVENT, 1, 1)[0];

    selector.mark_executed(id, test_now()).unwrap();
    let err = selector.mark_executed(id, test_now()).unwrap_err();
    assert!(matches!(err, SchedulerError::StaleSelection { log_id } if log_id == id));

    let log = db.logs.find_by_id(id).unwrap().unwrap();
    assert_eq!(log.date_triggered, Some(test_now()));
}

#[test]
fn test_revalidate_skips_unscheduled_records() {
    let (db, selector) = setup();
    db.insert_due(CAMPAIGN, EVENT, 1, 3);

    let mut limiter = ContactLimiter::unbounded();
    let batch = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();
    selector.unschedule_and_log(2, CAMPAIGN, 0, "removed").unwrap();

    let fresh = selector.revalidate(&batch).unwrap();
    assert_eq!(
        fresh.iter().map(|l| l.contact_id).collect::<Vec<_>>(),
        vec![1, 3]
    );
}

// ==========================================
// 过滤条件
// ==========================================

#[test]
fn test_unpublished_campaign_respects_flag() {
    let (db, selector) = setup();
    db.campaign(3, false).event(30, 3);
    db.insert_due(3, 30, 1, 2);

    let mut published_only = ContactLimiter::unbounded();
    assert!(selector
        .select_due(30, test_now(), &mut published_only)
        .unwrap()
        .is_empty());

    let mut any = ContactLimiter::builder().published_only(false).build().unwrap();
    assert_eq!(selector.select_due(30, test_now(), &mut any).unwrap().len(), 2);
}

#[test]
fn test_future_and_executed_records_excluded() {
    let (db, selector) = setup();
    let due = db.insert_log(LogBuilder::new(1, CAMPAIGN, EVENT));
    db.insert_log(LogBuilder::new(2, CAMPAIGN, EVENT).trigger_in(Duration::hours(2)));
    db.insert_log(LogBuilder::new(3, CAMPAIGN, EVENT).executed());

    let mut limiter = ContactLimiter::unbounded();
    let logs = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();
    assert_eq!(logs.iter().map(|l| l.id).collect::<Vec<_>>(), vec![due]);
}

#[test]
fn test_due_check_uses_whole_seconds() {
    let (db, selector) = setup();
    // 整点后 0.5 秒到期，存储时截断到整点
    let id = db.insert_log(
        LogBuilder::new(1, CAMPAIGN, EVENT).trigger_in(Duration::milliseconds(500)),
    );

    let mut limiter = ContactLimiter::unbounded();
    let before = selector
        .select_due(EVENT, test_now() - Duration::milliseconds(100), &mut limiter)
        .unwrap();
    assert!(before.is_empty());

    let same_second = selector
        .select_due(EVENT, test_now() + Duration::milliseconds(200), &mut limiter)
        .unwrap();
    assert_eq!(same_second.iter().map(|l| l.id).collect::<Vec<_>>(), vec![id]);
}

#[test]
fn test_rotation_change_hides_old_records() {
    let (db, selector) = setup();
    let old = db.insert_log(LogBuilder::new(7, CAMPAIGN, EVENT).rotation(0));
    db.member(CAMPAIGN, 7, 0);

    let mut limiter = ContactLimiter::unbounded();
    assert_eq!(
        selector.select_due(EVENT, test_now(), &mut limiter).unwrap()[0].id,
        old
    );

    db.campaigns.start_next_rotation(CAMPAIGN, 7).unwrap();
    let mut limiter = ContactLimiter::unbounded();
    assert!(selector
        .select_due(EVENT, test_now(), &mut limiter)
        .unwrap()
        .is_empty());
}

#[test]
fn test_thread_partitions_cover_all_contacts_once() {
    let (db, selector) = setup();
    db.insert_due(CAMPAIGN, EVENT, 1, 10);

    let mut seen = Vec::new();
    for thread_id in 1..=3 {
        let mut limiter = ContactLimiter::builder().thread(thread_id, 3).build().unwrap();
        let logs = selector.select_due(EVENT, test_now(), &mut limiter).unwrap();
        seen.extend(logs.iter().map(|l| l.contact_id));
    }
    seen.sort_unstable();
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
}

#[test]
fn test_contact_scope_limits_selection() {
    let (db, selector) = setup();
    db.insert_due(CAMPAIGN, EVENT, 1, 6);

    let mut single = ContactLimiter::builder().contact_id(4).build().unwrap();
    let logs = selector.select_due(EVENT, test_now(), &mut single).unwrap();
    assert_eq!(logs.iter().map(|l| l.contact_id).collect::<Vec<_>>(), vec![4]);

    let mut range = ContactLimiter::builder()
        .min_contact_id(2)
        .max_contact_id(3)
        .build()
        .unwrap();
    let logs = selector.select_due(EVENT, test_now(), &mut range).unwrap();
    assert_eq!(logs.iter().map(|l| l.contact_id).collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn test_count_due_by_event_matches_selection() {
    let (db, selector) = setup();
    db.event(21, CAMPAIGN);
    db.insert_due(CAMPAIGN, EVENT, 1, 4);
    db.insert_due(CAMPAIGN, 21, 1, 2);
    db.insert_log(LogBuilder::new(9, CAMPAIGN, 21).trigger_in(Duration::days(1)));

    let limiter = ContactLimiter::builder().campaign_limit(1).build().unwrap();
    let counts = selector
        .count_due_by_event(CAMPAIGN, test_now(), &limiter)
        .unwrap();
    assert_eq!(counts.get(&EVENT), Some(&4));
    assert_eq!(counts.get(&21), Some(&2));
    assert_eq!(limiter.campaign_limit_remaining(), Some(1));
}
