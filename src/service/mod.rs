pub mod allocator;
pub mod codes;
pub mod committer;
pub mod entry;
pub mod ingestor;
pub mod matcher;
pub mod reconcile;

pub use allocator::{allocate, AllocationLine, RemainderPolicy};
pub use codes::{build_ean13, ean13_check_digit, CodeGenerator, GeneratedCode};
pub use committer::{plan_posting, PlanFlags};
pub use entry::{NfeEntryService, UploadTarget};
pub use ingestor::parse_document;
pub use matcher::MatchCatalog;
pub use reconcile::{build_report_lines, next_preview_status};
