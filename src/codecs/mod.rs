//! Format codecs: each pair maps between the normalized model and one
//! external serialization. All three agree on semantic content and are
//! inter-convertible; their quirks are documented per module.

pub mod xlsx;
pub mod xml;
pub mod xmldom;
pub mod ysc;
