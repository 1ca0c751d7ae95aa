//! Campaign lifecycle owned by the campaign's creator.
//!
//! Every mutating operation here requires the caller to be the owner. A
//! missing campaign is [`LedgerError::NotFound`]; an existing campaign owned
//! by someone else is [`LedgerError::Unauthorized`]. `raised_amount` and the
//! recent-activity feed are never written here; see [`crate::ledger`].

use serde_json::Value;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::db;
use crate::errors::{LedgerError, Result};
use crate::models::{Campaign, CampaignStatus, CampaignUpdate, NewCampaign};
use crate::money;

pub async fn create_campaign(
    pool: &SqlitePool,
    owner_id: &str,
    new: NewCampaign,
) -> Result<Campaign> {
    let title = required_text("title", &new.title)?;
    let description = required_text("description", &new.description)?;
    let category = required_text("category", &new.category)?;
    validate_target(new.target_amount)?;

    let payment_details = new
        .payment_details
        .unwrap_or_else(|| Value::Object(Default::default()));
    if !payment_details.is_object() {
        return Err(LedgerError::Validation(
            "payment_details must be an object".to_string(),
        ));
    }

    let now = db::unix_now();
    let campaign = Campaign {
        id: Uuid::new_v4().to_string(),
        title,
        description,
        category,
        target_amount: new.target_amount,
        raised_amount: 0,
        status: CampaignStatus::Active,
        owner_id: owner_id.to_string(),
        end_date: new.end_date,
        cover_image: new.cover_image,
        payment_details,
        recent_donations: Vec::new(),
        created_at: now,
        updated_at: now,
    };

    db::insert_campaign(pool, &campaign).await?;
    info!("Campaign {} created by {owner_id}", campaign.id);
    Ok(campaign)
}

pub async fn get_campaign(pool: &SqlitePool, id: &str) -> Result<Campaign> {
    db::fetch_campaign(pool, id)
        .await?
        .ok_or_else(|| LedgerError::campaign_not_found(id))
}

pub async fn list_active_campaigns(pool: &SqlitePool) -> Result<Vec<Campaign>> {
    db::fetch_active_campaigns(pool).await
}

pub async fn list_owner_campaigns(pool: &SqlitePool, owner_id: &str) -> Result<Vec<Campaign>> {
    db::fetch_owner_campaigns(pool, owner_id).await
}

pub async fn update_campaign(
    pool: &SqlitePool,
    id: &str,
    caller: &str,
    mut update: CampaignUpdate,
) -> Result<Campaign> {
    update.title = update
        .title
        .map(|t| required_text("title", &t))
        .transpose()?;
    update.description = update
        .description
        .map(|d| required_text("description", &d))
        .transpose()?;
    update.category = update
        .category
        .map(|c| required_text("category", &c))
        .transpose()?;
    if let Some(target) = update.target_amount {
        validate_target(target)?;
    }
    if matches!(&update.payment_details, Some(details) if !details.is_object()) {
        return Err(LedgerError::Validation(
            "payment_details must be an object".to_string(),
        ));
    }

    let rows = db::update_campaign_fields(pool, id, caller, &update, db::unix_now()).await?;
    if rows == 0 {
        return Err(ownership_failure(pool, id, caller).await);
    }

    info!("Campaign {id} updated by {caller}");
    get_campaign(pool, id).await
}

/// Stop a campaign from accepting donations.
pub async fn close_campaign(pool: &SqlitePool, id: &str, caller: &str) -> Result<Campaign> {
    let rows =
        db::set_campaign_status(pool, id, caller, CampaignStatus::Closed, db::unix_now()).await?;
    if rows == 0 {
        return Err(ownership_failure(pool, id, caller).await);
    }

    info!("Campaign {id} closed by {caller}");
    get_campaign(pool, id).await
}

/// Delete a campaign. Refused while any ledger entry references it.
pub async fn delete_campaign(pool: &SqlitePool, id: &str, caller: &str) -> Result<()> {
    if db::delete_unreferenced_campaign(pool, id, caller).await? == 1 {
        info!("Campaign {id} deleted by {caller}");
        return Ok(());
    }

    match db::fetch_campaign_head(pool, id).await? {
        None => Err(LedgerError::campaign_not_found(id)),
        Some(head) if head.owner_id != caller => Err(LedgerError::Unauthorized {
            campaign_id: id.to_string(),
            caller: caller.to_string(),
        }),
        Some(_) => Err(LedgerError::CampaignHasDonations(id.to_string())),
    }
}

async fn ownership_failure(pool: &SqlitePool, id: &str, caller: &str) -> LedgerError {
    match db::fetch_campaign_head(pool, id).await {
        Ok(Some(_)) => LedgerError::Unauthorized {
            campaign_id: id.to_string(),
            caller: caller.to_string(),
        },
        Ok(None) => LedgerError::campaign_not_found(id),
        Err(e) => e,
    }
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn validate_target(target: i64) -> Result<()> {
    if target <= 0 {
        return Err(LedgerError::Validation(format!(
            "target_amount must be positive, got {}",
            money::format_minor(target)
        )));
    }
    Ok(())
}
