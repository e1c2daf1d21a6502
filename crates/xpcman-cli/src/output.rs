//! Reply rendering.

use std::io::Write;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use xpcman_ipc::Dictionary;

use crate::errors::AppError;

/// Writes `reply` as tab-indented JSON followed by a newline.
pub(crate) fn write_json<W: Write>(writer: &mut W, reply: &Dictionary) -> Result<(), AppError> {
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut *writer, PrettyFormatter::with_indent(b"\t"));
    reply
        .serialize(&mut serializer)
        .map_err(AppError::SerialiseReply)?;
    writer.write_all(b"\n").map_err(AppError::WriteOutput)?;
    writer.flush().map_err(AppError::WriteOutput)
}

/// Writes the raw display form of `reply`.
pub(crate) fn write_raw<W: Write>(writer: &mut W, reply: &Dictionary) -> Result<(), AppError> {
    writeln!(writer, "{reply}").map_err(AppError::WriteOutput)?;
    writer.flush().map_err(AppError::WriteOutput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_tab_indentation() {
        let reply = Dictionary::new()
            .with("pid", 123_i64)
            .with("state", "running");
        let mut buffer = Vec::new();
        write_json(&mut buffer, &reply).expect("renders");
        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "{\n\t\"pid\": 123,\n\t\"state\": \"running\"\n}\n"
        );
    }

    #[test]
    fn raw_output_is_not_json() {
        let reply = Dictionary::new().with("pid", 1_i64);
        let mut buffer = Vec::new();
        write_raw(&mut buffer, &reply).expect("renders");
        assert_eq!(String::from_utf8(buffer).expect("utf8"), "{pid: 1}\n");
    }
}
