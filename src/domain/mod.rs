pub mod cohort;
pub mod decision;
pub mod ledger;
pub mod market;

pub use cohort::*;
pub use decision::*;
pub use ledger::*;
pub use market::*;
