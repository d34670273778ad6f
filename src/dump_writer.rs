use std::io;

use codeq::OffsetSize;

use crate::num::format_pad9_u64;
use crate::types::Segment;
use crate::LogRecord;

/// Writes a record on one line, preceded by the segment file name for the
/// first record in a file.
pub fn multiline_string<W: io::Write>(
    w: &mut W,
    file_name: &str,
    record_index: u64,
    res: Result<(Segment, LogRecord), io::Error>,
) -> Result<(), io::Error> {
    match res {
        Ok((seg, rec)) => {
            if seg.offset().0 == 0 {
                writeln!(w, "{}", file_name)?;
            }
            writeln!(
                w,
                "  R-{record_index:05}: [{}, {}) {}: {:?}",
                format_pad9_u64(*seg.offset()),
                format_pad9_u64(*seg.end()),
                seg.size(),
                rec
            )?;
        }
        Err(io_err) => {
            writeln!(w, "Error: {}", io_err)?;
        }
    }
    Ok(())
}
