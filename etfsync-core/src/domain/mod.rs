//! Domain types: instrument identity and the daily bar schema.

pub mod bar;
pub mod instrument;

pub use bar::{
    check_header, check_strictly_increasing, Bar, SchemaError, BAR_FIELD_COUNT, BAR_HEADER,
    DATE_FORMAT,
};
pub use instrument::{CodeError, InstrumentCode, InstrumentList, CODE_WIDTH};
