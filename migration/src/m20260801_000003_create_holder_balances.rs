use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Current balance per (holder, token), upserted whenever a balance
        // lookup completes. The zero address is never tracked.
        manager
            .create_table(
                Table::create()
                    .table(HolderBalances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(HolderBalances::HolderAddress)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HolderBalances::TokenAddress)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HolderBalances::Balance)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(HolderBalances::LastUpdated)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .col(HolderBalances::HolderAddress)
                            .col(HolderBalances::TokenAddress),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_holder_balances_token_address")
                            .from(HolderBalances::Table, HolderBalances::TokenAddress)
                            .to(Tokens::Table, Tokens::Address),
                    )
                    .to_owned(),
            )
            .await?;

        // Holder counts and whale sums are selected per token
        manager
            .create_index(
                Index::create()
                    .name("idx_holder_balances_token")
                    .table(HolderBalances::Table)
                    .col(HolderBalances::TokenAddress)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(HolderBalances::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum HolderBalances {
    Table,
    HolderAddress,
    TokenAddress,
    Balance,
    LastUpdated,
}

#[derive(Iden)]
enum Tokens {
    Table,
    Address,
}
