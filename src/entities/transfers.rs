//! `SeaORM` Entity for transfers table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "transfers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub token_address: String,
    pub transfer_from: String,
    pub transfer_to: String,
    /// Raw token units as a decimal string
    pub amount: String,
    /// Block timestamp, unix seconds
    pub timestamp: i64,
    pub block_number: i64,
    pub tx_hash: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
