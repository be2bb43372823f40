#[allow(ambiguous_glob_reexports)]
pub use crate::{
    expr::{binary::*, dynamic::*, unary::*, Expression, IntoExpr, Scalar},
    graph::{idset::*, info::*},
    tape::{entry::*, *},
    transform::*,
    utils::errors::*,
    variable::*,
};
