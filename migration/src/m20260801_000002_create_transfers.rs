use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Append-only transfer history. Rows are unique only by the surrogate
        // id; queries order by timestamp.
        manager
            .create_table(
                Table::create()
                    .table(Transfers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Transfers::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Transfers::TokenAddress)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::TransferFrom)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::TransferTo)
                            .string_len(42)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transfers::Amount).string().not_null())
                    .col(
                        ColumnDef::new(Transfers::Timestamp)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Transfers::BlockNumber)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Transfers::TxHash).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_transfers_token_address")
                            .from(Transfers::Table, Transfers::TokenAddress)
                            .to(Tokens::Table, Tokens::Address),
                    )
                    .to_owned(),
            )
            .await?;

        // The trend window query filters by token and timestamp
        manager
            .create_index(
                Index::create()
                    .name("idx_transfers_token_timestamp")
                    .table(Transfers::Table)
                    .col(Transfers::TokenAddress)
                    .col(Transfers::Timestamp)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Transfers::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Transfers {
    Table,
    Id,
    TokenAddress,
    TransferFrom,
    TransferTo,
    Amount,
    Timestamp,
    BlockNumber,
    TxHash,
}

#[derive(Iden)]
enum Tokens {
    Table,
    Address,
}
