//! `SeaORM` Entity for tokens table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "tokens")]
pub struct Model {
    /// Contract address, lowercase 0x-prefixed hex
    #[sea_orm(primary_key, auto_increment = false)]
    pub address: String,
    pub name: String,
    pub symbol: String,
    /// Raw token units as a decimal string (uint256 range)
    pub total_supply: String,
    /// Unix seconds of the first observed transfer
    pub first_seen: i64,
    /// Unix seconds of the most recent observed transfer
    pub last_updated: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
