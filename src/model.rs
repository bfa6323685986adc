pub mod balance;
pub mod docs;
pub mod ids;
pub mod timeline;
pub mod uint_range;
pub mod update;

pub use balance::{
    add_balances, balances_equal, dropped_out_zero_entries, normalize_balances, scale_balances,
    subtract_balances, Balance, BalanceError, SupplyLedger,
};
pub use docs::{
    AccountDoc, ActivityDoc, ActivityOrigin, AddressListDoc, ApprovalTrackerDoc, BalanceDoc,
    BlockPosition, CollectionDoc, EmptyBlocksDoc, ErrorDoc, FetchDoc, FetchKind, GasPriceStats,
    MerkleChallengeDoc, OffChainSync, QueueDoc, RefreshDoc, StatusDoc, UpdateHistory,
};
pub use ids::{MINT_ADDRESS, TOTAL_ADDRESS};
pub use uint_range::UintRange;
pub use update::FieldUpdate;
