//! The type descriptor system: serializable descriptions of C types rich
//! enough to encode primitives, pointers, fixed-size arrays, structs,
//! unions and function pointers, plus the ABI layout math (`size_of`,
//! `align_of`, field offsets) every other component needs.

mod convention;
mod descriptor;

pub use convention::Convention;
pub use descriptor::{
    Discriminant, Field, FieldLayout, Packing, PointerDirection, PrimitiveKind, TypeDescriptor,
};
