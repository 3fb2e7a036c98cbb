//! Integration tests for the read path: charging, navigation, view
//! reconciliation and ranking over an on-disk database.

use std::sync::Arc;
use std::thread;

use chapterhouse::db::{episodes, members, view_counts, EpisodeStatus, NewEpisode};
use chapterhouse::{
    Config, CoreDb, CoreError, Direction, RankingPeriod, Services, Viewer,
};
use chrono::NaiveDate;
use tempfile::TempDir;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
}

/// Services over a fresh database file in a temporary directory
fn create_services() -> (Services, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage_dir = temp_dir.path().to_path_buf();
    let db = Arc::new(CoreDb::open(&config.database_path()).unwrap());
    (Services::new(db, &config).unwrap(), temp_dir)
}

/// Adds a work whose chapters cost the given coins, returning episode ids
fn add_work(services: &Services, title: &str, costs: &[i64]) -> (i64, Vec<i64>) {
    services
        .db
        .with_conn(|conn| {
            let work = episodes::create_work(conn, title, "author-1")?;
            let mut ids = vec![];
            for (i, cost) in costs.iter().enumerate() {
                ids.push(
                    episodes::create_episode(conn, &NewEpisode {
                        work_id: work.id,
                        chapter: i as i64 + 1,
                        title: format!("{} {}", title, i + 1),
                        content: format!("text of chapter {}", i + 1),
                        status: EpisodeStatus::Active,
                        coin_cost: *cost,
                    })?
                    .id,
                );
            }
            Ok((work.id, ids))
        })
        .unwrap()
}

#[test]
fn test_first_open_charges_second_is_free() {
    let (services, _temp) = create_services();
    services.wallet.register_member("reader", 15).unwrap();
    let (_, ids) = add_work(&services, "Iron Lotus", &[10]);
    let reader = Viewer::member("reader");

    let view = services.gate.open_episode(&reader, ids[0]).unwrap();
    assert_eq!(view.content, "text of chapter 1");
    assert_eq!(services.wallet.balance("reader").unwrap(), 5);

    services.gate.open_episode(&reader, ids[0]).unwrap();
    assert_eq!(services.wallet.balance("reader").unwrap(), 5);

    let history = services.wallet.coin_history("reader", 10, 0).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].used_coins, 10);
}

#[test]
fn test_ownership_survives_price_change() {
    let (services, _temp) = create_services();
    services.wallet.register_member("reader", 10).unwrap();
    let (_, ids) = add_work(&services, "W", &[10]);
    let reader = Viewer::member("reader");
    services.gate.open_episode(&reader, ids[0]).unwrap();

    services
        .db
        .with_conn(|conn| Ok(conn.execute("UPDATE episodes SET coin_cost = 50 WHERE id = ?", [ids[0]])?))
        .unwrap();

    services.gate.open_episode(&reader, ids[0]).unwrap();
    assert_eq!(services.wallet.balance("reader").unwrap(), 0);
}

#[test]
fn test_concurrent_opens_charge_once() {
    let (services, _temp) = create_services();
    services.wallet.register_member("reader", 100).unwrap();
    let (_, ids) = add_work(&services, "W", &[10]);
    let episode_id = ids[0];

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gate = Arc::clone(&services.gate);
            thread::spawn(move || gate.open_episode(&Viewer::member("reader"), episode_id).unwrap())
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(services.wallet.balance("reader").unwrap(), 90);
    assert_eq!(services.db.stats().unwrap().ledger_entries, 1);
}

#[test]
fn test_concurrent_opens_across_connections_charge_once() {
    let (services, temp) = create_services();
    services.wallet.register_member("reader", 100).unwrap();
    let (_, ids) = add_work(&services, "W", &[10]);
    let episode_id = ids[0];

    // A second handle on the same file, as a second process would have
    let mut config = Config::default();
    config.storage_dir = temp.path().to_path_buf();
    let other = Services::new(Arc::new(CoreDb::open(&config.database_path()).unwrap()), &config).unwrap();

    let gates = [Arc::clone(&services.gate), Arc::clone(&other.gate)];
    let handles: Vec<_> = (0..6)
        .map(|i| {
            let gate = Arc::clone(&gates[i % 2]);
            thread::spawn(move || gate.open_episode(&Viewer::member("reader"), episode_id))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }

    assert_eq!(services.wallet.balance("reader").unwrap(), 90);
    assert_eq!(services.db.stats().unwrap().ledger_entries, 1);
}

#[test]
fn test_insufficient_coins_then_top_up() {
    let (services, _temp) = create_services();
    services.wallet.register_member("reader", 4).unwrap();
    let (_, ids) = add_work(&services, "W", &[10]);
    let reader = Viewer::member("reader");

    let err = services.gate.open_episode(&reader, ids[0]).unwrap_err();
    assert!(matches!(err, CoreError::InsufficientCoins { coin_cost: 10, balance: 4, .. }));
    assert!(err.is_user_facing());
    assert_eq!(services.db.stats().unwrap().ledger_entries, 0);

    services.wallet.credit_coins("reader", 6).unwrap();
    services.gate.open_episode(&reader, ids[0]).unwrap();
    assert_eq!(services.wallet.balance("reader").unwrap(), 0);
}

#[test]
fn test_navigation_charges_paid_neighbour_and_skips_hidden() {
    let (services, _temp) = create_services();
    services.wallet.register_member("reader", 20).unwrap();
    let (work_id, ids) = add_work(&services, "W", &[0, 5, 7]);
    services
        .db
        .with_conn(|conn| episodes::set_status(conn, ids[1], EpisodeStatus::Hidden))
        .unwrap();
    let reader = Viewer::member("reader");

    let view = services.navigator.adjacent_episode(&reader, ids[0], Direction::Next).unwrap();
    assert_eq!(view.episode_id, ids[2]);
    assert_eq!(services.wallet.balance("reader").unwrap(), 13);

    let view = services.navigator.adjacent_episode(&reader, ids[2], Direction::Prev).unwrap();
    assert_eq!(view.episode_id, ids[0]);

    assert!(matches!(
        services.navigator.adjacent_episode(&Viewer::Anonymous, ids[0], Direction::Next),
        Err(CoreError::AuthenticationRequired { .. })
    ));

    let reads = services.wallet.recent_reads("reader", 10).unwrap();
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].work_id, work_id);
}

#[test]
fn test_views_flow_into_rankings() {
    let (services, _temp) = create_services();
    let (work_a, a) = add_work(&services, "A", &[0, 0]);
    let (work_b, b) = add_work(&services, "B", &[0]);
    let anon = Viewer::Anonymous;

    // Yesterday: A gets 5 views
    for _ in 0..5 {
        services.gate.open_episode(&anon, a[0]).unwrap();
    }
    services.reconciler.flush(day(7)).unwrap();

    // Today: A gets 6 + 4 views over two chapters, B gets 14
    for _ in 0..6 {
        services.gate.open_episode(&anon, a[0]).unwrap();
    }
    for _ in 0..4 {
        services.gate.open_episode(&anon, a[1]).unwrap();
    }
    for _ in 0..14 {
        services.gate.open_episode(&anon, b[0]).unwrap();
    }
    let report = services.reconciler.flush(day(8)).unwrap();
    assert_eq!(report.views_applied, 24);
    assert!(services.buffer.snapshot().unwrap().is_empty());

    // Cumulative totals converge with the daily rows
    let (total, daily) = services
        .db
        .with_conn(|conn| {
            let e = episodes::get_episode(conn, a[0])?.unwrap();
            Ok((e.total_views, view_counts::episode_daily_sum(conn, a[0])?))
        })
        .unwrap();
    assert_eq!(total, 11);
    assert_eq!(daily, 11);
    assert_eq!(services.wallet.work_total_views(work_a).unwrap(), 15);

    // A: 10*3 + 5*2 = 40, B: 14*3 = 42
    let entries = services.rankings.compute_ranking(RankingPeriod::Daily, day(8)).unwrap();
    let ranked: Vec<(i64, u32, i64)> = entries.iter().map(|e| (e.work_id, e.rank, e.score)).collect();
    assert_eq!(ranked, vec![(work_b, 1, 42), (work_a, 2, 40)]);

    let latest = services.rankings.latest(RankingPeriod::Daily).unwrap();
    assert_eq!(latest.entries, entries);
    assert_eq!(services.rankings.rankings(RankingPeriod::Daily, day(8)).unwrap(), entries);
}

#[test]
fn test_revenue_per_work() {
    let (services, _temp) = create_services();
    let (work_a, a) = add_work(&services, "A", &[3, 4]);
    let (work_b, _) = add_work(&services, "B", &[9]);
    services.wallet.register_member("m1", 50).unwrap();
    services.wallet.register_member("m2", 50).unwrap();

    for member in ["m1", "m2"] {
        for id in &a {
            services.gate.open_episode(&Viewer::member(member), *id).unwrap();
        }
    }

    let today = chrono::Utc::now().date_naive();
    let revenue = services.wallet.revenue(&[work_a, work_b], today, today).unwrap();
    assert_eq!(revenue.len(), 1);
    assert_eq!(revenue[0].work_id, work_a);
    assert_eq!(revenue[0].total_coins, 14);

    let m1 = services
        .db
        .with_conn(|conn| members::get_member(conn, "m1"))
        .unwrap()
        .unwrap();
    assert_eq!(m1.coin_balance, 43);
}
