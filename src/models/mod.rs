pub mod catalog;
pub mod invoice;
pub mod posting;
pub mod status;
pub mod target;

pub use catalog::{SkuRecord, SupplierRecord, VendorMapRecord};
pub use invoice::{
    InvoiceTotals, LineRef, NfeEntry, NfeEntryDetail, NfeEntryLine, ParsedInvoice, ParsedLine,
};
pub use posting::{
    CancelOutcome, ConfirmOptions, ConfirmOutcome, LineAllocation, PlannedLine, PostingPlan,
    PreviewLine, PreviewReport, VendorMapInsert,
};
pub use status::{IllegalTransition, InvoiceStatus};
pub use target::{FulfillmentTarget, LineOverride, MatchOrigin, OverrideKind, Resolution};
