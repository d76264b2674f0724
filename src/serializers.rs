//! Functions used by Serde to serialize types that we don't own (and thus
//! can't implement [`serde::Serialize`] for).

use serde::Serializer;

/// Useful for foreign types that implement [`std::error::Error`] and don't
/// need any special treatment.
fn serialize_generic_error<S: Serializer, E: std::error::Error>(
    error: &E,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let dbg = format!("{error:#?}");
    serializer.serialize_str(&dbg)
}

/// Serialize [`std::io::Error`].
pub fn serialize_io_error<S: Serializer>(
    error: &std::io::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}

/// Serialize [`serde_json::Error`].
pub fn serialize_json_error<S: Serializer>(
    error: &serde_json::Error,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serialize_generic_error(error, serializer)
}
