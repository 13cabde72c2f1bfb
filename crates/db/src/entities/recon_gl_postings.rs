//! `SeaORM` Entity for the recon_gl_postings outbox table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "recon_gl_postings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub settlement_id: Uuid,
    pub organization_id: Uuid,
    pub settlement_number: String,
    pub customer_id: Uuid,
    pub currency: String,
    pub posting_date: Date,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_debits: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_credits: Decimal,
    #[sea_orm(column_type = "JsonBinary")]
    pub lines: Json,
    pub exported_at: Option<DateTimeWithTimeZone>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
