pub use super::holder_balances::Entity as HolderBalances;
pub use super::tokens::Entity as Tokens;
pub use super::transfers::Entity as Transfers;
pub use super::trend_snapshots::Entity as TrendSnapshots;
