use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Tokens are keyed by contract address; a row is created the first
        // time a transfer references an unknown address and never deleted.
        manager
            .create_table(
                Table::create()
                    .table(Tokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tokens::Address)
                            .string_len(42)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tokens::Name).string().not_null())
                    .col(ColumnDef::new(Tokens::Symbol).string().not_null())
                    .col(
                        // Raw token units as a decimal string (uint256 range)
                        ColumnDef::new(Tokens::TotalSupply)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Tokens::FirstSeen)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Tokens::LastUpdated)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tokens::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Tokens {
    Table,
    Address,
    Name,
    Symbol,
    TotalSupply,
    FirstSeen,
    LastUpdated,
}
