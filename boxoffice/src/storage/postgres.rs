//! PostgreSQL repositories.
//!
//! Conditional updates are single statements: `UPDATE … WHERE status =
//! 'pending'` for orders, `UPDATE … WHERE checked_in = FALSE` for admission
//! and `INSERT … ON CONFLICT DO NOTHING` for ticket slots and codes. A
//! promo redemption and its capped usage increment share one transaction.

use super::{
    AssignmentRepository, OrderRepository, PromoRepository, StorageError, StorageResult,
    TicketRepository,
};
use crate::aggregates::Order;
use crate::types::{
    AddOn, Admission, AgentAssignment, AgentId, CommissionTerms, ContactInfo, CorrelationToken,
    DiscountType, LineItem, ListingRef, Money, OrderId, OrderStatus, OrderTotals, PaymentEvidence,
    PaymentRail, PromoCode, PromoRedemption, PromoSnapshot, RedemptionOutcome, ReferrerId, ScanCode,
    Ticket, TicketId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::{Json, Uuid};
use sqlx::{PgPool, Row};

/// Every repository trait over one connection pool.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the crate's migrations
    ///
    /// # Errors
    ///
    /// Returns error if a migration fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(format!("Failed to run migrations: {e}")))
    }

    async fn tokens_of(&self, id: OrderId) -> StorageResult<Vec<CorrelationToken>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT token FROM payment_tokens WHERE order_id = $1 ORDER BY position")
                .bind(id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db("Failed to load payment tokens"))?;
        Ok(rows.into_iter().map(|(t,)| CorrelationToken::new(t)).collect())
    }
}

fn db(context: &'static str) -> impl FnOnce(sqlx::Error) -> StorageError {
    move |e| StorageError::Database(format!("{context}: {e}"))
}

fn corrupt(e: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt(e.to_string())
}

fn to_db(amount: Money) -> StorageResult<i64> {
    i64::try_from(amount.cents()).map_err(|_| corrupt(format!("amount {amount} out of range")))
}

fn from_db(cents: i64) -> StorageResult<Money> {
    u64::try_from(cents)
        .map(Money::from_cents)
        .map_err(|_| corrupt(format!("negative amount {cents}")))
}

fn index_to_db(index: u32) -> StorageResult<i32> {
    i32::try_from(index).map_err(|_| corrupt(format!("index {index} out of range")))
}

fn index_from_db(index: i32) -> StorageResult<u32> {
    u32::try_from(index).map_err(|_| corrupt(format!("negative index {index}")))
}

fn listing_from_db(kind: &str, id: Uuid) -> StorageResult<ListingRef> {
    ListingRef::from_parts(kind, id).ok_or_else(|| corrupt(format!("unknown listing kind {kind}")))
}

fn order_from_row(row: &PgRow, tokens: Vec<CorrelationToken>) -> StorageResult<Order> {
    let status: String = row.try_get("status").map_err(corrupt)?;
    let rail: String = row.try_get("rail").map_err(corrupt)?;
    let contact: Json<ContactInfo> = row.try_get("contact").map_err(corrupt)?;
    let items: Json<Vec<LineItem>> = row.try_get("items").map_err(corrupt)?;
    let add_ons: Json<Vec<AddOn>> = row.try_get("add_ons").map_err(corrupt)?;
    let promo: Option<Json<PromoSnapshot>> = row.try_get("promo").map_err(corrupt)?;
    let provider_reference: Option<String> = row.try_get("provider_reference").map_err(corrupt)?;
    let paid_amount: Option<i64> = row.try_get("paid_amount_cents").map_err(corrupt)?;
    let confirmed_at: Option<DateTime<Utc>> = row.try_get("confirmed_at").map_err(corrupt)?;

    let evidence = match (provider_reference, paid_amount, confirmed_at) {
        (Some(provider_reference), Some(amount), Some(confirmed_at)) => Some(PaymentEvidence {
            provider_reference,
            amount: from_db(amount)?,
            confirmed_at,
        }),
        _ => None,
    };

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id").map_err(corrupt)?),
        contact: contact.0,
        rail: rail.parse::<PaymentRail>().map_err(corrupt)?,
        items: items.0,
        add_ons: add_ons.0,
        totals: OrderTotals {
            subtotal: from_db(row.try_get("subtotal_cents").map_err(corrupt)?)?,
            add_ons: from_db(row.try_get("add_ons_cents").map_err(corrupt)?)?,
            discount: from_db(row.try_get("discount_cents").map_err(corrupt)?)?,
            total: from_db(row.try_get("total_cents").map_err(corrupt)?)?,
        },
        promo: promo.map(|p| p.0),
        status: status.parse::<OrderStatus>().map_err(corrupt)?,
        tokens,
        evidence,
        failure_reason: row.try_get("failure_reason").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        finalized_at: row.try_get("finalized_at").map_err(corrupt)?,
    })
}

fn ticket_from_row(row: &PgRow) -> StorageResult<Ticket> {
    let kind: String = row.try_get("listing_kind").map_err(corrupt)?;
    let checked_in: bool = row.try_get("checked_in").map_err(corrupt)?;
    let checked_in_at: Option<DateTime<Utc>> = row.try_get("checked_in_at").map_err(corrupt)?;
    let checked_in_by: Option<Uuid> = row.try_get("checked_in_by").map_err(corrupt)?;

    let admission = match (checked_in, checked_in_at, checked_in_by) {
        (false, None, None) => Admission::NotAdmitted,
        (true, Some(at), Some(by)) => Admission::Admitted {
            at,
            by: AgentId::from_uuid(by),
        },
        _ => return Err(corrupt("inconsistent admission columns")),
    };

    Ok(Ticket {
        id: TicketId::from_uuid(row.try_get("id").map_err(corrupt)?),
        order_id: OrderId::from_uuid(row.try_get("order_id").map_err(corrupt)?),
        listing: listing_from_db(&kind, row.try_get("listing_id").map_err(corrupt)?)?,
        holder_name: row.try_get("holder_name").map_err(corrupt)?,
        holder_email: row.try_get("holder_email").map_err(corrupt)?,
        tier_label: row.try_get("tier_label").map_err(corrupt)?,
        unit_price: from_db(row.try_get("unit_price_cents").map_err(corrupt)?)?,
        code: ScanCode::new(row.try_get::<String, _>("code").map_err(corrupt)?),
        line_index: index_from_db(row.try_get("line_index").map_err(corrupt)?)?,
        unit_index: index_from_db(row.try_get("unit_index").map_err(corrupt)?)?,
        admission,
        issued_at: row.try_get("issued_at").map_err(corrupt)?,
    })
}

fn promo_from_row(row: &PgRow) -> StorageResult<PromoCode> {
    let discount: Json<DiscountType> = row.try_get("discount").map_err(corrupt)?;
    let commission: Option<Json<CommissionTerms>> = row.try_get("commission").map_err(corrupt)?;
    let max_uses: Option<i32> = row.try_get("max_uses").map_err(corrupt)?;
    let times_used: i32 = row.try_get("times_used").map_err(corrupt)?;
    let referrer: Option<Uuid> = row.try_get("referrer_id").map_err(corrupt)?;

    Ok(PromoCode {
        code: row.try_get("code").map_err(corrupt)?,
        discount: discount.0,
        active: row.try_get("active").map_err(corrupt)?,
        expires_at: row.try_get("expires_at").map_err(corrupt)?,
        max_uses: max_uses.map(index_from_db).transpose()?,
        times_used: index_from_db(times_used)?,
        referrer: referrer.map(ReferrerId::from_uuid),
        commission: commission.map(|c| c.0),
    })
}

const ORDER_COLUMNS: &str = "id, status, rail, contact, items, add_ons, subtotal_cents, \
     add_ons_cents, discount_cents, total_cents, promo, provider_reference, paid_amount_cents, \
     confirmed_at, failure_reason, created_at, finalized_at";

const TICKET_COLUMNS: &str = "id, order_id, listing_kind, listing_id, holder_name, holder_email, \
     tier_label, unit_price_cents, code, line_index, unit_index, checked_in, checked_in_at, \
     checked_in_by, issued_at";

#[async_trait]
impl OrderRepository for PostgresRepository {
    async fn insert(&self, order: &Order) -> StorageResult<()> {
        let mut tx = self.pool.begin().await.map_err(db("Failed to begin transaction"))?;

        let result = sqlx::query(
            "INSERT INTO orders (id, status, rail, contact, items, add_ons, subtotal_cents,
                                 add_ons_cents, discount_cents, total_cents, promo, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(order.rail.as_str())
        .bind(Json(&order.contact))
        .bind(Json(&order.items))
        .bind(Json(&order.add_ons))
        .bind(to_db(order.totals.subtotal)?)
        .bind(to_db(order.totals.add_ons)?)
        .bind(to_db(order.totals.discount)?)
        .bind(to_db(order.totals.total)?)
        .bind(order.promo.as_ref().map(Json))
        .bind(order.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db("Failed to insert order"))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::Conflict(format!("order {} already exists", order.id)));
        }

        for token in &order.tokens {
            sqlx::query("INSERT INTO payment_tokens (token, order_id) VALUES ($1, $2)")
                .bind(token.as_str())
                .bind(order.id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(db("Failed to insert payment token"))?;
        }

        tx.commit().await.map_err(db("Failed to commit order"))
    }

    async fn find(&self, id: OrderId) -> StorageResult<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db("Failed to query order"))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let tokens = self.tokens_of(id).await?;
        order_from_row(&row, tokens).map(Some)
    }

    async fn find_by_token(&self, token: &CorrelationToken) -> StorageResult<Option<Order>> {
        let owner: Option<(Uuid,)> =
            sqlx::query_as("SELECT order_id FROM payment_tokens WHERE token = $1")
                .bind(token.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db("Failed to query payment token"))?;

        match owner {
            Some((id,)) => OrderRepository::find(self, OrderId::from_uuid(id)).await,
            None => Ok(None),
        }
    }

    async fn attach_token(&self, id: OrderId, token: &CorrelationToken) -> StorageResult<bool> {
        let inserted = sqlx::query(
            "INSERT INTO payment_tokens (token, order_id)
             SELECT $1, id FROM orders WHERE id = $2 AND status = 'pending'
             ON CONFLICT (token) DO NOTHING",
        )
        .bind(token.as_str())
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db("Failed to attach payment token"))?;

        if inserted.rows_affected() == 1 {
            return Ok(true);
        }

        let owner: Option<(Uuid,)> =
            sqlx::query_as("SELECT order_id FROM payment_tokens WHERE token = $1")
                .bind(token.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db("Failed to query payment token"))?;

        match owner {
            Some((owner,)) if owner == *id.as_uuid() => Ok(true),
            Some((owner,)) => Err(StorageError::Conflict(format!(
                "token {token} belongs to order {owner}"
            ))),
            None => Ok(false),
        }
    }

    async fn finalize(&self, order: &Order) -> StorageResult<bool> {
        let evidence = order.evidence.as_ref();
        let result = sqlx::query(
            "UPDATE orders
             SET status = $2, provider_reference = $3, paid_amount_cents = $4,
                 confirmed_at = $5, failure_reason = $6, finalized_at = $7
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order.id.as_uuid())
        .bind(order.status.as_str())
        .bind(evidence.map(|e| e.provider_reference.as_str()))
        .bind(evidence.map(|e| to_db(e.amount)).transpose()?)
        .bind(evidence.map(|e| e.confirmed_at))
        .bind(order.failure_reason.as_deref())
        .bind(order.finalized_at)
        .execute(&self.pool)
        .await
        .map_err(db("Failed to finalize order"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn ping(&self) -> StorageResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(db("Database ping failed"))
    }
}

#[async_trait]
impl TicketRepository for PostgresRepository {
    async fn insert_if_absent(&self, ticket: &Ticket) -> StorageResult<bool> {
        let result = sqlx::query(
            "INSERT INTO tickets (id, order_id, listing_kind, listing_id, holder_name, holder_email,
                                  tier_label, unit_price_cents, code, line_index, unit_index,
                                  issued_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT DO NOTHING",
        )
        .bind(ticket.id.as_uuid())
        .bind(ticket.order_id.as_uuid())
        .bind(ticket.listing.kind())
        .bind(ticket.listing.uuid())
        .bind(&ticket.holder_name)
        .bind(ticket.holder_email.as_deref())
        .bind(&ticket.tier_label)
        .bind(to_db(ticket.unit_price)?)
        .bind(ticket.code.as_str())
        .bind(index_to_db(ticket.line_index)?)
        .bind(index_to_db(ticket.unit_index)?)
        .bind(ticket.issued_at)
        .execute(&self.pool)
        .await
        .map_err(db("Failed to insert ticket"))?;

        Ok(result.rows_affected() == 1)
    }

    async fn for_order(&self, order_id: OrderId) -> StorageResult<Vec<Ticket>> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets WHERE order_id = $1 ORDER BY line_index, unit_index"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db("Failed to list tickets"))?;

        rows.iter().map(ticket_from_row).collect()
    }

    async fn find_by_code(&self, code: &ScanCode) -> StorageResult<Option<Ticket>> {
        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE code = $1"))
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db("Failed to query ticket by code"))?;

        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn find(&self, id: TicketId) -> StorageResult<Option<Ticket>> {
        let row = sqlx::query(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db("Failed to query ticket"))?;

        row.as_ref().map(ticket_from_row).transpose()
    }

    async fn mark_admitted(&self, id: TicketId, by: AgentId, at: DateTime<Utc>) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE tickets
             SET checked_in = TRUE, checked_in_at = $2, checked_in_by = $3
             WHERE id = $1 AND checked_in = FALSE",
        )
        .bind(id.as_uuid())
        .bind(at)
        .bind(by.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(db("Failed to admit ticket"))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl PromoRepository for PostgresRepository {
    async fn find_by_code(&self, code: &str) -> StorageResult<Option<PromoCode>> {
        let row = sqlx::query(
            "SELECT code, discount, active, expires_at, max_uses, times_used, referrer_id, commission
             FROM promo_codes WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db("Failed to query promo code"))?;

        row.as_ref().map(promo_from_row).transpose()
    }

    async fn upsert(&self, promo: &PromoCode) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO promo_codes (code, discount, active, expires_at, max_uses, times_used,
                                      referrer_id, commission)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (code) DO UPDATE
             SET discount = EXCLUDED.discount, active = EXCLUDED.active,
                 expires_at = EXCLUDED.expires_at, max_uses = EXCLUDED.max_uses,
                 times_used = EXCLUDED.times_used, referrer_id = EXCLUDED.referrer_id,
                 commission = EXCLUDED.commission",
        )
        .bind(&promo.code)
        .bind(Json(promo.discount))
        .bind(promo.active)
        .bind(promo.expires_at)
        .bind(promo.max_uses.map(index_to_db).transpose()?)
        .bind(index_to_db(promo.times_used)?)
        .bind(promo.referrer.map(|r| *r.as_uuid()))
        .bind(promo.commission.map(Json))
        .execute(&self.pool)
        .await
        .map_err(db("Failed to upsert promo code"))?;

        Ok(())
    }

    async fn redeem(&self, redemption: &PromoRedemption) -> StorageResult<RedemptionOutcome> {
        let mut tx = self.pool.begin().await.map_err(db("Failed to begin transaction"))?;

        let recorded = sqlx::query(
            "INSERT INTO promo_redemptions (order_id, code, referrer_id, commission_cents, redeemed_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(redemption.order_id.as_uuid())
        .bind(&redemption.code)
        .bind(redemption.referrer.map(|r| *r.as_uuid()))
        .bind(redemption.commission.map(to_db).transpose()?)
        .bind(redemption.redeemed_at)
        .execute(&mut *tx)
        .await
        .map_err(db("Failed to record promo redemption"))?
        .rows_affected();

        if recorded == 0 {
            tx.commit().await.map_err(db("Failed to commit redemption"))?;
            return Ok(RedemptionOutcome::AlreadyRecorded);
        }

        let counted = sqlx::query(
            "UPDATE promo_codes SET times_used = times_used + 1
             WHERE code = $1 AND (max_uses IS NULL OR times_used < max_uses)",
        )
        .bind(&redemption.code)
        .execute(&mut *tx)
        .await
        .map_err(db("Failed to count promo usage"))?
        .rows_affected();

        tx.commit().await.map_err(db("Failed to commit redemption"))?;

        Ok(if counted == 1 {
            RedemptionOutcome::Counted
        } else {
            RedemptionOutcome::OverCap
        })
    }

    async fn redemption_for(&self, order_id: OrderId) -> StorageResult<Option<PromoRedemption>> {
        let row: Option<(Uuid, String, Option<Uuid>, Option<i64>, DateTime<Utc>)> = sqlx::query_as(
            "SELECT order_id, code, referrer_id, commission_cents, redeemed_at
             FROM promo_redemptions WHERE order_id = $1",
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db("Failed to load promo redemption"))?;

        row.map(|(order_id, code, referrer, commission, redeemed_at)| -> StorageResult<_> {
            Ok(PromoRedemption {
                order_id: OrderId::from_uuid(order_id),
                code,
                referrer: referrer.map(ReferrerId::from_uuid),
                commission: commission.map(from_db).transpose()?,
                redeemed_at,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl AssignmentRepository for PostgresRepository {
    async fn listings_for(&self, agent_id: AgentId) -> StorageResult<Vec<ListingRef>> {
        let rows: Vec<(String, Uuid)> = sqlx::query_as(
            "SELECT listing_kind, listing_id FROM agent_assignments WHERE agent_id = $1
             ORDER BY listing_kind, listing_id",
        )
        .bind(agent_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db("Failed to list agent assignments"))?;

        rows.into_iter()
            .map(|(kind, id)| listing_from_db(&kind, id))
            .collect()
    }

    async fn assign(&self, assignment: AgentAssignment) -> StorageResult<()> {
        sqlx::query(
            "INSERT INTO agent_assignments (agent_id, listing_kind, listing_id)
             VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(assignment.agent_id.as_uuid())
        .bind(assignment.listing.kind())
        .bind(assignment.listing.uuid())
        .execute(&self.pool)
        .await
        .map_err(db("Failed to assign agent"))?;
        Ok(())
    }
}
