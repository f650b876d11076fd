//! `SeaORM` Entity for holder_balances table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "holder_balances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub holder_address: String,
    #[sea_orm(primary_key, auto_increment = false)]
    pub token_address: String,
    /// Raw token units as a decimal string
    pub balance: String,
    /// Unix seconds of the last successful balance lookup
    pub last_updated: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
