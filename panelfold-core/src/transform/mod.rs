//! The transformation engine: scan → classify → resolve → emit.

pub mod classify;
pub mod date_token;
pub mod emitter;
pub mod fold;
pub mod missing;
pub mod scanner;
pub mod wide;

pub use classify::classify;
pub use date_token::{
    resolve_token, CanonicalDate, DateTokenResolver, Granularity, InvalidDateToken, TokenFault,
};
pub use emitter::{Emission, LongFormatEmitter};
pub use fold::{fold_table, FoldedTable};
pub use missing::{CellValue, MissingValuePolicy};
pub use scanner::{scan, BlockScanner, LineKind};
pub use wide::WideTable;
