//! `SeaORM` Entity for trend_snapshots table

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "trend_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub token_address: String,
    pub velocity: f64,
    pub unique_holders: i64,
    pub large_transactions: i64,
    pub growth_rate: f64,
    pub whale_concentration: f64,
    pub trend_score: f64,
    /// Unix seconds of the cycle that produced this row; only increases
    pub last_calculated: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
