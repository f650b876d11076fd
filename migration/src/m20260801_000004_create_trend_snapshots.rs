use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per token, fully replaced on each recompute cycle.
        manager
            .create_table(
                Table::create()
                    .table(TrendSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrendSnapshots::TokenAddress)
                            .string_len(42)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::Velocity)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::UniqueHolders)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::LargeTransactions)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::GrowthRate)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::WhaleConcentration)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::TrendScore)
                            .double()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrendSnapshots::LastCalculated)
                            .big_integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trend_snapshots_token_address")
                            .from(TrendSnapshots::Table, TrendSnapshots::TokenAddress)
                            .to(Tokens::Table, Tokens::Address),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TrendSnapshots::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum TrendSnapshots {
    Table,
    TokenAddress,
    Velocity,
    UniqueHolders,
    LargeTransactions,
    GrowthRate,
    WhaleConcentration,
    TrendScore,
    LastCalculated,
}

#[derive(Iden)]
enum Tokens {
    Table,
    Address,
}
