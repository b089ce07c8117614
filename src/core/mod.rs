//! Extent reconciliation and stack assembly

pub mod extent;
pub mod provenance;
pub mod stack;

// Re-export main types
pub use extent::{ExtentPolicy, ExtentReconciler, ReconcileParams, Reconciliation};
pub use provenance::{extent_report_document, product_document};
pub use stack::{
    AssembledBand, AssemblyParams, BandJob, BandSelection, BandSource, OverlapPriority, PaintedBand,
    StackAssembler, StackLayout, StackProduct,
};
