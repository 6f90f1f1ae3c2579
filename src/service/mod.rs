pub mod duplicate;
pub mod master;
pub mod matcher;
pub mod stage;
pub mod stage3;
pub mod undo;

pub use duplicate::{flag_batch, flag_duplicates, FlaggedCode};
pub use master::MasterDataService;
pub use matcher::{reconcile, ReconcileOutcome, ReconcileService};
pub use stage::{KilatRequest, ScanRequest, StageService};
pub use stage3::{write_rows_csv, RowEdit, Stage3Service};
pub use undo::UndoStack;
