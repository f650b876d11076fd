pub use sea_orm_migration::prelude::*;

mod m20260801_000001_create_tokens;
mod m20260801_000002_create_transfers;
mod m20260801_000003_create_holder_balances;
mod m20260801_000004_create_trend_snapshots;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260801_000001_create_tokens::Migration),
            Box::new(m20260801_000002_create_transfers::Migration),
            Box::new(m20260801_000003_create_holder_balances::Migration),
            Box::new(m20260801_000004_create_trend_snapshots::Migration),
        ]
    }
}
