//! Domain types for the box office.
//!
//! Value objects and entities shared by checkout, payment reconciliation,
//! ticket issuance and check-in. Amounts are integer minor units; every
//! status with a fixed set of values is a closed enum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order
    OrderId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for an event listing
    EventId
);
uuid_id!(
    /// Unique identifier for a tour listing
    TourId
);
uuid_id!(
    /// Unique identifier for a check-in agent (or administrator)
    AgentId
);
uuid_id!(
    /// Unique identifier for a promo referrer / influencer
    ReferrerId
);

/// What a line item or ticket was bought for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ListingRef {
    /// A ticketed event
    Event(EventId),
    /// A bookable tour
    Tour(TourId),
}

impl ListingRef {
    /// Storage discriminator (`event` or `tour`)
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Event(_) => "event",
            Self::Tour(_) => "tour",
        }
    }

    /// The listing's UUID
    #[must_use]
    pub const fn uuid(&self) -> &Uuid {
        match self {
            Self::Event(id) => id.as_uuid(),
            Self::Tour(id) => id.as_uuid(),
        }
    }

    /// Rebuild a listing reference from its stored parts.
    ///
    /// Returns `None` for an unknown kind.
    #[must_use]
    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind {
            "event" => Some(Self::Event(EventId::from_uuid(id))),
            "tour" => Some(Self::Tour(TourId::from_uuid(id))),
            _ => None,
        }
    }
}

impl fmt::Display for ListingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.uuid())
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Amount of money in minor currency units (cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Sums amounts, returning `None` on overflow
    pub fn checked_sum<I>(amounts: I) -> Option<Self>
    where
        I: IntoIterator<Item = Self>,
    {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }

    /// `basis_points / 10_000` of this amount, rounded half up
    #[must_use]
    pub fn percentage(self, basis_points: u32) -> Self {
        let scaled = u128::from(self.0) * u128::from(basis_points);
        let rounded = (scaled + 5_000) / 10_000;
        Self(u64::try_from(rounded).unwrap_or(u64::MAX))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Buyer contact details captured at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    /// Full name
    pub name: String,
    /// Email (required for hosted card checkout)
    #[serde(default)]
    pub email: Option<String>,
    /// Phone number (required for mobile money)
    #[serde(default)]
    pub phone: Option<String>,
}

/// One purchased listing tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Event or tour being bought
    pub listing: ListingRef,
    /// Display name
    pub name: String,
    /// Price of one unit
    pub unit_price: Money,
    /// Units bought (at least one)
    pub quantity: u32,
    /// Tier or variant (e.g. "VIP")
    #[serde(default)]
    pub variant_label: Option<String>,
}

impl LineItem {
    /// `unit_price × quantity`, `None` on overflow
    #[must_use]
    pub const fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// Paid extra attached to an order (e.g. transport, merchandise).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    /// Display name
    pub name: String,
    /// Price
    pub amount: Money,
}

/// Totals computed once at order creation.
///
/// `total = subtotal + add_ons - discount` and
/// `discount <= subtotal + add_ons`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    /// Sum of line totals
    pub subtotal: Money,
    /// Sum of add-on amounts
    pub add_ons: Money,
    /// Promo discount
    pub discount: Money,
    /// Amount the buyer pays
    pub total: Money,
}

/// Order status.
///
/// `Pending` moves to exactly one of the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Awaiting payment
    Pending,
    /// Payment confirmed
    Paid,
    /// Payment failed or was cancelled
    Failed,
}

impl OrderStatus {
    /// Storage / wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }

    /// Whether the status can no longer change
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// How the buyer pays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentRail {
    /// Mobile-money push prompt on the buyer's phone
    MobileMoney,
    /// Hosted card checkout page
    HostedCard,
}

impl PaymentRail {
    /// Storage / wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MobileMoney => "mobile_money",
            Self::HostedCard => "hosted_card",
        }
    }
}

impl fmt::Display for PaymentRail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentRail {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mobile_money" => Ok(Self::MobileMoney),
            "hosted_card" => Ok(Self::HostedCard),
            other => Err(format!("unknown payment rail: {other}")),
        }
    }
}

/// Identifier the payment provider returned for one initiation attempt.
///
/// Every token belongs to exactly one order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Wrap a provider token
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider confirmation recorded when an order is paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvidence {
    /// Provider receipt / transaction reference
    pub provider_reference: String,
    /// Amount the provider reports as paid
    pub amount: Money,
    /// When the confirmation was applied
    pub confirmed_at: DateTime<Utc>,
}

// ============================================================================
// Promo codes
// ============================================================================

/// How a promo code discounts an order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountType {
    /// Percentage of the base, in basis points (1..=10 000)
    Percentage {
        /// 100 basis points = 1 %
        basis_points: u32,
    },
    /// Fixed amount, capped at the base
    Fixed {
        /// Amount off
        amount: Money,
    },
}

impl DiscountType {
    /// Percentage discount from whole percent (e.g. `10` for 10 %)
    #[must_use]
    pub const fn percent(percent: u32) -> Self {
        Self::Percentage {
            basis_points: percent.saturating_mul(100),
        }
    }

    /// Whether the configured value is usable
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        match self {
            Self::Percentage { basis_points } => *basis_points >= 1 && *basis_points <= 10_000,
            Self::Fixed { amount } => !amount.is_zero(),
        }
    }
}

/// Commission owed to a promo's referrer on a paid order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommissionTerms {
    /// Percentage of the order total, in basis points
    Percentage {
        /// 100 basis points = 1 %
        basis_points: u32,
    },
    /// Fixed amount per paid order
    Fixed {
        /// Amount
        amount: Money,
    },
}

/// Promo code record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoCode {
    /// Normalised code (trimmed, upper case)
    pub code: String,
    /// Discount rule
    pub discount: DiscountType,
    /// Switched off by the organiser when false
    pub active: bool,
    /// Code stops working at this instant
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Maximum number of paid orders
    #[serde(default)]
    pub max_uses: Option<u32>,
    /// Paid orders that used the code
    #[serde(default)]
    pub times_used: u32,
    /// Referrer credited for orders using the code
    #[serde(default)]
    pub referrer: Option<ReferrerId>,
    /// Referrer commission
    #[serde(default)]
    pub commission: Option<CommissionTerms>,
}

impl PromoCode {
    /// Active code with no expiry, usage cap or referrer
    #[must_use]
    pub fn new(code: &str, discount: DiscountType) -> Self {
        Self {
            code: normalize_code(code),
            discount,
            active: true,
            expires_at: None,
            max_uses: None,
            times_used: 0,
            referrer: None,
            commission: None,
        }
    }
}

/// Normalise a user-entered code for lookup.
#[must_use]
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Promo details copied onto the order at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoSnapshot {
    /// Code as applied
    pub code: String,
    /// Rule at checkout time
    pub discount: DiscountType,
    /// Discount granted
    pub discount_amount: Money,
    /// Referrer, if any
    #[serde(default)]
    pub referrer: Option<ReferrerId>,
    /// Referrer commission terms, if any
    #[serde(default)]
    pub commission: Option<CommissionTerms>,
}

/// A paid order's use of a promo code. At most one exists per order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoRedemption {
    /// Paid order
    pub order_id: OrderId,
    /// Code as applied
    pub code: String,
    /// Referrer credited, if any
    #[serde(default)]
    pub referrer: Option<ReferrerId>,
    /// Commission owed to the referrer for this order
    #[serde(default)]
    pub commission: Option<Money>,
    /// When the redemption was recorded
    pub redeemed_at: DateTime<Utc>,
}

/// What recording a redemption did to the code's usage counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedemptionOutcome {
    /// First record for the order, counted against the code
    Counted,
    /// First record for the order; the code was already at its cap (or is
    /// gone), so the counter did not move
    OverCap,
    /// The order's redemption exists already
    AlreadyRecorded,
}

impl RedemptionOutcome {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counted => "counted",
            Self::OverCap => "over_cap",
            Self::AlreadyRecorded => "already_recorded",
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Scannable ticket code (`TKT-` followed by 16 symbols).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanCode(String);

impl ScanCode {
    /// Wrap an existing code
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Normalise a scanned or typed code (trim, upper case)
    #[must_use]
    pub fn from_scan(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    /// The code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Admission state of a ticket.
///
/// Moves from `NotAdmitted` to `Admitted` exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Admission {
    /// Not yet scanned in
    NotAdmitted,
    /// Scanned in
    Admitted {
        /// When
        at: DateTime<Utc>,
        /// By which agent
        by: AgentId,
    },
}

impl Admission {
    /// Whether the holder has been admitted
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }
}

/// Ticket minted for one purchased unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket id
    pub id: TicketId,
    /// Parent order
    pub order_id: OrderId,
    /// Event or tour the ticket admits to
    pub listing: ListingRef,
    /// Holder name (the buyer)
    pub holder_name: String,
    /// Holder email
    pub holder_email: Option<String>,
    /// Tier label
    pub tier_label: String,
    /// Price of the unit
    pub unit_price: Money,
    /// Unique scannable code
    pub code: ScanCode,
    /// Index of the line item on the order
    pub line_index: u32,
    /// Index of the unit within the line item
    pub unit_index: u32,
    /// Admission state
    pub admission: Admission,
    /// When the ticket was minted
    pub issued_at: DateTime<Utc>,
}

// ============================================================================
// Verification agents
// ============================================================================

/// Role of the caller at the check-in gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// May verify assigned listings only
    Agent,
    /// May verify any listing
    Admin,
}

/// Assignment of an agent to a listing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentAssignment {
    /// Agent
    pub agent_id: AgentId,
    /// Listing the agent may verify
    pub listing: ListingRef,
}

/// Identity and scope of the caller, passed explicitly into the gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentContext {
    /// Caller
    pub agent_id: AgentId,
    /// Role
    pub role: AgentRole,
    /// Listings the caller is assigned to
    pub listings: Vec<ListingRef>,
}

impl AgentContext {
    /// Scoped agent
    #[must_use]
    pub const fn agent(agent_id: AgentId, listings: Vec<ListingRef>) -> Self {
        Self {
            agent_id,
            role: AgentRole::Agent,
            listings,
        }
    }

    /// Administrator
    #[must_use]
    pub const fn admin(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            role: AgentRole::Admin,
            listings: Vec::new(),
        }
    }

    /// Whether the caller may verify tickets for `listing`
    #[must_use]
    pub fn may_verify(&self, listing: &ListingRef) -> bool {
        self.role == AgentRole::Admin || self.listings.contains(listing)
    }
}
