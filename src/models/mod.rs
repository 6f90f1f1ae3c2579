pub mod export_item;
pub mod inventory;
pub mod receipt;
pub mod result;
pub mod stage3;

pub use export_item::{CsvExportItem, SourcePlatform};
pub use inventory::{
    KilatShipment, LineItem, ProductAlias, ReceiptPosting, Reseller, SoldItem, StockItem,
};
pub use receipt::{Platform, ReceiptScan, ReceiptUpdate, ScanQuery, ScanScope, Stage, StoreCode};
pub use result::{
    BulkReport, CommitReport, ItemOutcome, MatchedPair, ReconciliationResult,
    ReconciliationSummary,
};
pub use stage3::{RowStatus, Stage3Row};
