use serde_json::json;
use sqlx::SqlitePool;

use crate::campaigns;
use crate::config::{Config, WriteMode};
use crate::db;
use crate::errors::LedgerError;
use crate::ledger::Ledger;
use crate::models::{
    Campaign, CampaignStatus, CampaignUpdate, Donation, DonationMetadata, DonationRequest,
    DonationStatus, NewCampaign,
};
use crate::reconciler;
use crate::stats;

async fn setup(write_mode: WriteMode, feed_limit: u32) -> (Ledger, Campaign) {
    let pool = db::memory_pool().await;
    let campaign = new_campaign(&pool, "owner-1", 100_000).await;
    (Ledger::new(pool, write_mode, feed_limit), campaign)
}

async fn new_campaign(pool: &SqlitePool, owner: &str, target: i64) -> Campaign {
    campaigns::create_campaign(
        pool,
        owner,
        NewCampaign {
            title: "Flood relief".to_string(),
            description: "Food and shelter for displaced families".to_string(),
            category: "disaster".to_string(),
            target_amount: target,
            ..Default::default()
        },
    )
    .await
    .unwrap()
}

fn paid_with(method: &str) -> DonationMetadata {
    DonationMetadata {
        payment_method: Some(method.to_string()),
        ..Default::default()
    }
}

fn with_ref(transaction_ref: &str) -> DonationMetadata {
    DonationMetadata {
        transaction_ref: Some(transaction_ref.to_string()),
        ..Default::default()
    }
}

fn request(body: serde_json::Value) -> DonationRequest {
    serde_json::from_value(body).unwrap()
}

async fn raised(pool: &SqlitePool, campaign_id: &str) -> i64 {
    let campaign = campaigns::get_campaign(pool, campaign_id).await.unwrap();
    campaign.raised_amount
}

async fn ledger_rows(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM donations")
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn three_donations_scenario() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;

    for (amount, method) in [(10_000, "UPI"), (25_000, "UPI"), (5_000, "cash")] {
        ledger
            .record_donation(&campaign.id, amount, Some("donor-1"), paid_with(method))
            .await
            .unwrap();
    }

    assert_eq!(raised(ledger.pool(), &campaign.id).await, 40_000);

    let stats = stats::compute_stats(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stats.total_amount, 40_000);
    assert_eq!(stats.donation_count, 3);
    assert_eq!(stats.average_amount, 13_333);
    assert_eq!(stats.highest_donation, 25_000);
    assert_eq!(stats.payment_methods.len(), 2);
    assert_eq!(stats.payment_methods["UPI"], 2);
    assert_eq!(stats.payment_methods["cash"], 1);
}

#[tokio::test]
async fn running_total_matches_sum_of_donations() {
    for mode in [WriteMode::Sequential, WriteMode::Transactional] {
        let (ledger, campaign) = setup(mode, 10).await;
        let amounts = [500, 1_250, 25, 30_000, 4_200, 175, 7, 10];

        let mut last_total = 0;
        for amount in amounts {
            let receipt = ledger
                .record_donation(&campaign.id, amount, None, DonationMetadata::default())
                .await
                .unwrap();
            assert!(receipt.raised_amount > last_total);
            last_total = receipt.raised_amount;
        }

        let expected: i64 = amounts.iter().sum();
        let stats = stats::compute_stats(ledger.pool(), &campaign.id)
            .await
            .unwrap();

        let stored = raised(ledger.pool(), &campaign.id).await;
        assert_eq!(stored, expected, "{mode:?}");
        assert_eq!(last_total, expected, "{mode:?}");
        assert_eq!(stats.donation_count, amounts.len() as i64, "{mode:?}");
        assert_eq!(stats.total_amount, expected, "{mode:?}");
        assert_eq!(stats.payment_methods["online"], amounts.len() as i64);
    }
}

#[tokio::test]
async fn mixed_magnitudes_stay_exact() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    let pool = ledger.pool();

    ledger
        .record_request(&campaign.id, None, request(json!({ "amount": 1e12 })))
        .await
        .unwrap();
    for _ in 0..1000 {
        ledger
            .record_request(&campaign.id, None, request(json!({ "amount": 0.07 })))
            .await
            .unwrap();
    }

    let expected = 100_000_000_007_000;
    assert_eq!(raised(pool, &campaign.id).await, expected);

    let stats = stats::compute_stats(pool, &campaign.id).await.unwrap();
    assert_eq!(stats.total_amount, expected);

    let report = stats::reconcile(pool, &campaign.id).await.unwrap();
    assert!(report.is_consistent(), "{report:?}");

    let small = new_campaign(pool, "owner-2", 100).await;
    for amount in [json!(0.1), json!("0.2")] {
        ledger
            .record_request(&small.id, None, request(json!({ "amount": amount })))
            .await
            .unwrap();
    }
    assert_eq!(raised(pool, &small.id).await, 30);

    let drifted = reconciler::reconcile_once(pool).await.unwrap();
    assert!(drifted.is_empty(), "{drifted:?}");
}

#[tokio::test]
async fn receipt_carries_ledger_entry() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;

    let receipt = ledger
        .record_donation(
            &campaign.id,
            7_500,
            Some("donor-9"),
            DonationMetadata {
                payment_method: Some("UPI".to_string()),
                message: Some("Stay strong".to_string()),
                transaction_ref: Some("UPI-123".to_string()),
                status: DonationStatus::Completed,
            },
        )
        .await
        .unwrap();

    assert_eq!(receipt.raised_amount, 7_500);
    let stored = stats::get_donation(ledger.pool(), &receipt.donation.id)
        .await
        .unwrap();
    assert_eq!(stored, receipt.donation);
    assert_eq!(stored.donor_id.as_deref(), Some("donor-9"));
    assert_eq!(stored.message.as_deref(), Some("Stay strong"));
    assert_eq!(stored.transaction_ref.as_deref(), Some("UPI-123"));
}

#[tokio::test]
async fn unknown_campaign_is_not_found_and_writes_nothing() {
    let (ledger, _campaign) = setup(WriteMode::Sequential, 10).await;
    let transactional = Ledger::new(ledger.pool().clone(), WriteMode::Transactional, 10);

    for mode_ledger in [ledger.clone(), transactional] {
        let err = mode_ledger
            .record_donation("no-such-campaign", 1_000, None, DonationMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity, .. } if entity == "campaign"));
    }

    let pending = DonationMetadata {
        status: DonationStatus::Pending,
        ..Default::default()
    };
    let err = ledger
        .record_donation("no-such-campaign", 1_000, None, pending)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound { .. }));

    assert_eq!(ledger_rows(ledger.pool()).await, 0);
}

#[tokio::test]
async fn invalid_amounts_mutate_nothing() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;

    for amount in [0, -1_000] {
        let err = ledger
            .record_donation(&campaign.id, amount, None, DonationMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    let rejected = [
        json!("ten rupees"),
        json!(null),
        json!("-5"),
        json!(0),
        json!(0.075),
        json!("12.345"),
    ];
    for raw in rejected {
        let body = json!({ "amount": raw.clone(), "payment_method": "UPI" });
        let err = ledger
            .record_request(&campaign.id, Some("donor-1"), request(body))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)), "{raw}");
    }

    let stored = campaigns::get_campaign(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stored.raised_amount, 0);
    assert!(stored.recent_donations.is_empty());
    assert_eq!(stored.updated_at, campaign.updated_at);
    assert_eq!(ledger_rows(ledger.pool()).await, 0);
}

#[tokio::test]
async fn request_with_string_amount_is_recorded() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;

    let body = json!({
        "amount": "120.50",
        "payment_method": "UPI",
        "transaction_id": "UPI-777",
        "message": "For the kids"
    });

    let receipt = ledger
        .record_request(&campaign.id, Some("donor-2"), request(body))
        .await
        .unwrap();
    assert_eq!(receipt.raised_amount, 12_050);
    assert_eq!(receipt.donation.amount, 12_050);
    assert_eq!(receipt.donation.payment_method, "UPI");
    assert_eq!(receipt.donation.transaction_ref.as_deref(), Some("UPI-777"));
}

#[tokio::test]
async fn concurrent_donations_never_lose_increments() {
    const DONATIONS: usize = 64;
    let (ledger, campaign) = setup(WriteMode::Sequential, 5).await;

    let handles: Vec<_> = (0..DONATIONS)
        .map(|i| {
            let ledger = ledger.clone();
            let campaign_id = campaign.id.clone();
            tokio::spawn(async move {
                let donor = format!("donor-{i}");
                let metadata = DonationMetadata::default();
                ledger
                    .record_donation(&campaign_id, 100, Some(donor.as_str()), metadata)
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = campaigns::get_campaign(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stored.raised_amount, DONATIONS as i64 * 100);
    assert_eq!(stored.recent_donations.len(), 5);
    assert_eq!(ledger_rows(ledger.pool()).await, DONATIONS as i64);
}

/// File-backed pool with several connections; `close` removes the files.
struct TempDatabase {
    path: std::path::PathBuf,
    pool: SqlitePool,
}

impl TempDatabase {
    async fn open() -> Self {
        let path = std::env::temp_dir().join(format!("ledger-{}.db", uuid::Uuid::new_v4()));
        let url = format!("sqlite:{}", path.display());
        let pool = db::init_pool(&url, 4).await.unwrap();
        Self { path, pool }
    }

    async fn close(self) {
        self.pool.close().await;
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", self.path.display()));
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_donations_across_connections() {
    const DONATIONS: usize = 40;

    let temp = TempDatabase::open().await;
    let campaign = new_campaign(&temp.pool, "owner-1", 10_000).await;
    let ledger = Ledger::new(temp.pool.clone(), WriteMode::Sequential, 10);

    let handles: Vec<_> = (0..DONATIONS)
        .map(|_| {
            let ledger = ledger.clone();
            let campaign_id = campaign.id.clone();
            tokio::spawn(async move {
                ledger
                    .record_donation(&campaign_id, 100, None, DonationMetadata::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let stored = raised(&temp.pool, &campaign.id).await;
    let stats = stats::compute_stats(&temp.pool, &campaign.id)
        .await
        .unwrap();
    assert_eq!(stored, DONATIONS as i64 * 100);
    assert_eq!(stats.donation_count, DONATIONS as i64);

    temp.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_duplicate_refs_settle_as_one_donation() {
    const ATTEMPTS: usize = 8;

    let temp = TempDatabase::open().await;
    let campaign = new_campaign(&temp.pool, "owner-1", 10_000).await;
    let ledger = Ledger::new(temp.pool.clone(), WriteMode::Transactional, 10);

    let handles: Vec<_> = (0..ATTEMPTS)
        .map(|_| {
            let ledger = ledger.clone();
            let campaign_id = campaign.id.clone();
            tokio::spawn(async move {
                ledger
                    .record_donation(&campaign_id, 2_500, None, with_ref("UPI-RACE"))
                    .await
            })
        })
        .collect();

    let mut recorded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => recorded += 1,
            Err(LedgerError::DuplicateTransaction { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(recorded, 1);
    assert_eq!(raised(&temp.pool, &campaign.id).await, 2_500);
    assert_eq!(ledger_rows(&temp.pool).await, 1);
    let report = stats::reconcile(&temp.pool, &campaign.id).await.unwrap();
    assert!(report.is_consistent());

    temp.close().await;
}

#[tokio::test]
async fn transaction_ref_clash_on_insert_is_a_duplicate() {
    let (ledger, campaign) = setup(WriteMode::Transactional, 10).await;
    let first = ledger
        .record_donation(&campaign.id, 5_000, None, with_ref("UPI-9"))
        .await
        .unwrap();

    // Same reference under a fresh id, straight at the storage layer.
    let replay = Donation {
        id: uuid::Uuid::new_v4().to_string(),
        ..first.donation
    };
    let err = db::insert_donation(ledger.pool(), &replay)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::DuplicateTransaction { ref transaction_ref, .. } if transaction_ref == "UPI-9"
    ));
    assert_eq!(ledger_rows(ledger.pool()).await, 1);
}

#[tokio::test]
async fn recent_feed_is_bounded_and_newest_first() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 3).await;

    let mut ids = Vec::new();
    for amount in [100, 200, 300, 400, 500] {
        let receipt = ledger
            .record_donation(&campaign.id, amount, Some("donor-1"), paid_with("UPI"))
            .await
            .unwrap();
        ids.push(receipt.donation.id);
    }

    let stored = campaigns::get_campaign(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    let feed_amounts: Vec<i64> = stored.recent_donations.iter().map(|r| r.amount).collect();
    let feed_ids: Vec<&str> = stored
        .recent_donations
        .iter()
        .map(|r| r.donation_id.as_str())
        .collect();

    assert_eq!(feed_amounts, vec![500, 400, 300]);
    let newest: Vec<&str> = ids.iter().rev().take(3).map(String::as_str).collect();
    assert_eq!(feed_ids, newest);
    assert_eq!(stored.recent_donations[0].payment_method, "UPI");
    assert_eq!(stored.raised_amount, 1_500);
}

#[tokio::test]
async fn duplicate_transaction_ref_is_rejected() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    let other = new_campaign(ledger.pool(), "owner-2", 50_000).await;

    ledger
        .record_donation(&campaign.id, 5_000, None, with_ref("UPI-42"))
        .await
        .unwrap();
    let err = ledger
        .record_donation(&campaign.id, 5_000, None, with_ref("UPI-42"))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DuplicateTransaction { .. }));

    // The same reference is fine on a different campaign.
    ledger
        .record_donation(&other.id, 5_000, None, with_ref("UPI-42"))
        .await
        .unwrap();

    assert_eq!(raised(ledger.pool(), &campaign.id).await, 5_000);
    assert_eq!(ledger_rows(ledger.pool()).await, 2);
}

#[tokio::test]
async fn closed_campaign_rejects_donations() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    ledger
        .record_donation(&campaign.id, 1_000, None, DonationMetadata::default())
        .await
        .unwrap();
    campaigns::close_campaign(ledger.pool(), &campaign.id, "owner-1")
        .await
        .unwrap();

    for metadata in [
        DonationMetadata::default(),
        DonationMetadata {
            status: DonationStatus::Pending,
            ..Default::default()
        },
    ] {
        let err = ledger
            .record_donation(&campaign.id, 1_000, None, metadata)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CampaignClosed(_)));
    }

    let stored = campaigns::get_campaign(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stored.status, CampaignStatus::Closed);
    assert_eq!(stored.raised_amount, 1_000);
    assert_eq!(ledger_rows(ledger.pool()).await, 1);
}

#[tokio::test]
async fn unsettled_donations_are_kept_but_not_counted() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;

    ledger
        .record_donation(&campaign.id, 10_000, None, paid_with("UPI"))
        .await
        .unwrap();
    for status in [DonationStatus::Pending, DonationStatus::Failed] {
        let metadata = DonationMetadata {
            payment_method: Some("card".to_string()),
            status,
            ..Default::default()
        };
        let receipt = ledger
            .record_donation(&campaign.id, 4_000, None, metadata)
            .await
            .unwrap();
        assert_eq!(receipt.raised_amount, 10_000);
        assert_eq!(receipt.donation.status, status);
    }

    let stored = campaigns::get_campaign(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stored.raised_amount, 10_000);
    assert_eq!(stored.recent_donations.len(), 1);

    let stats = stats::compute_stats(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stats.donation_count, 1);
    assert!(!stats.payment_methods.contains_key("card"));

    let all = stats::list_campaign_donations(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn donation_listings_are_newest_first() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    let other = new_campaign(ledger.pool(), "owner-2", 50_000).await;
    let donor = Some("donor-a");

    let first = ledger
        .record_donation(&campaign.id, 1_000, donor, DonationMetadata::default())
        .await
        .unwrap();
    let second = ledger
        .record_donation(&other.id, 2_000, donor, DonationMetadata::default())
        .await
        .unwrap();
    ledger
        .record_donation(&campaign.id, 3_000, None, DonationMetadata::default())
        .await
        .unwrap();

    let mine: Vec<String> = stats::list_donor_donations(ledger.pool(), "donor-a")
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(mine, vec![second.donation.id, first.donation.id]);

    let for_campaign = stats::list_campaign_donations(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(for_campaign.len(), 2);
    assert_eq!(for_campaign[0].amount, 3_000);
    assert!(for_campaign[0].donor_id.is_none());
}

#[tokio::test]
async fn progress_reports_percentage_of_target() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    for amount in [25_000, 8_300] {
        ledger
            .record_donation(&campaign.id, amount, None, DonationMetadata::default())
            .await
            .unwrap();
    }

    let progress = stats::campaign_progress(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(progress.total_raised, 33_300);
    assert_eq!(progress.target_amount, 100_000);
    assert_eq!(progress.donation_count, 2);
    assert_eq!(progress.percentage_raised, 33.3);
}

#[tokio::test]
async fn ledger_entries_are_append_only() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    let receipt = ledger
        .record_donation(&campaign.id, 1_000, None, DonationMetadata::default())
        .await
        .unwrap();

    let update = sqlx::query("UPDATE donations SET amount = 100000 WHERE id = ?1")
        .bind(&receipt.donation.id)
        .execute(ledger.pool())
        .await;
    assert!(update.is_err());

    let delete = sqlx::query("DELETE FROM donations WHERE id = ?1")
        .bind(&receipt.donation.id)
        .execute(ledger.pool())
        .await;
    assert!(delete.is_err());

    let stored = stats::get_donation(ledger.pool(), &receipt.donation.id)
        .await
        .unwrap();
    assert_eq!(stored.amount, 1_000);
}

#[tokio::test]
async fn campaign_with_donations_cannot_be_deleted() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    ledger
        .record_donation(&campaign.id, 1_000, None, DonationMetadata::default())
        .await
        .unwrap();

    let err = campaigns::delete_campaign(ledger.pool(), &campaign.id, "owner-1")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::CampaignHasDonations(_)));

    let kept = campaigns::get_campaign(ledger.pool(), &campaign.id).await;
    assert!(kept.is_ok());
}

#[tokio::test]
async fn owner_edits_never_touch_running_total() {
    let (ledger, campaign) = setup(WriteMode::Sequential, 10).await;
    ledger
        .record_donation(&campaign.id, 6_000, None, DonationMetadata::default())
        .await
        .unwrap();

    let update = CampaignUpdate {
        target_amount: Some(200_000),
        ..Default::default()
    };
    let updated = campaigns::update_campaign(ledger.pool(), &campaign.id, "owner-1", update)
        .await
        .unwrap();

    assert_eq!(updated.raised_amount, 6_000);
    assert_eq!(updated.recent_donations.len(), 1);
}

#[tokio::test]
async fn ledger_follows_configured_mode_and_feed_limit() {
    let config = Config::from_lookup(|key| match key {
        "LEDGER_WRITE_MODE" => Some("transactional".to_string()),
        "RECENT_DONATIONS_LIMIT" => Some("2".to_string()),
        _ => None,
    })
    .unwrap();

    let pool = db::memory_pool().await;
    let campaign = new_campaign(&pool, "owner-1", 10_000).await;
    let ledger = Ledger::from_config(pool, &config);

    for amount in [100, 200, 300] {
        ledger
            .record_donation(&campaign.id, amount, None, DonationMetadata::default())
            .await
            .unwrap();
    }

    let stored = campaigns::get_campaign(ledger.pool(), &campaign.id)
        .await
        .unwrap();
    assert_eq!(stored.raised_amount, 600);
    assert_eq!(stored.recent_donations.len(), 2);
    assert_eq!(stored.recent_donations[0].amount, 300);
}
