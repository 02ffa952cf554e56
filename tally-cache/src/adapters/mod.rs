//! Ready-made mutation plans for the common cache shapes.

mod completion;
mod create;
mod delete;
mod update;

pub use completion::{CheckIn, CheckInPlan, TreeKey, TreeKind, Undo, UndoPlan};
pub use create::CreatePlan;
pub use delete::DeletePlan;
pub use update::{Patch, UpdatePlan};
