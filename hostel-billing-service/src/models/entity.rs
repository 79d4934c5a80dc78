//! Billable entities: staff (paid a salary) and students (charged a fee).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// Which side of the hostel an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Staff,
    Student,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Staff => "staff",
            EntityKind::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staff" => Some(EntityKind::Staff),
            "student" => Some(EntityKind::Student),
            _ => None,
        }
    }

    pub fn to_proto(&self) -> i32 {
        match self {
            EntityKind::Staff => 1,
            EntityKind::Student => 2,
        }
    }

    pub fn from_proto(value: i32) -> Option<Self> {
        match value {
            1 => Some(EntityKind::Staff),
            2 => Some(EntityKind::Student),
            _ => None,
        }
    }

    /// Prefix of generated billing record numbers: payrolls for staff,
    /// invoices for students.
    pub fn record_prefix(&self) -> &'static str {
        match self {
            EntityKind::Staff => "PAY",
            EntityKind::Student => "INV",
        }
    }

    /// What the monthly billing record is called for this kind.
    pub fn record_label(&self) -> &'static str {
        match self {
            EntityKind::Staff => "payroll",
            EntityKind::Student => "invoice",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for EntityKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EntityKind::parse(&value).ok_or_else(|| format!("unknown entity kind: {}", value))
    }
}

/// The capability set shared by staff and students that deduction and
/// periodic billing need.
pub trait BillableEntity: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn entity_id(&self) -> Uuid;
    fn name(&self) -> &str;
    fn contact_email(&self) -> Option<&str>;
    fn is_active(&self) -> bool;
    /// Monthly salary or fee.
    fn base_amount(&self) -> Decimal;

    fn is_billable(&self) -> bool {
        self.is_active() && self.base_amount() > Decimal::ZERO
    }
}

/// Staff member.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Staff {
    pub staff_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub salary: Decimal,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl BillableEntity for Staff {
    const KIND: EntityKind = EntityKind::Staff;

    fn entity_id(&self) -> Uuid {
        self.staff_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn base_amount(&self) -> Decimal {
        self.salary
    }
}

/// Student.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Student {
    pub student_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub monthly_fee: Decimal,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl BillableEntity for Student {
    const KIND: EntityKind = EntityKind::Student;

    fn entity_id(&self) -> Uuid {
        self.student_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    fn is_active(&self) -> bool {
        self.is_active
    }

    fn base_amount(&self) -> Decimal {
        self.monthly_fee
    }
}
