use std::io;
use std::marker::PhantomData;

use codeq::error_context_ext::ErrorContextExt;
use codeq::Decode;

use crate::offset_reader::OffsetReader;

/// Iterates the framed records of a segment file from its start.
///
/// Yields `(start_offset, size, record)`. Iteration stops after the first
/// error, which is yielded once.
pub(crate) struct RecordIterator<R, D> {
    r: OffsetReader<R>,
    total_size: u64,
    path: String,
    error: bool,
    _p: PhantomData<D>,
}

impl<R, D> RecordIterator<R, D>
where
    R: io::Read,
    D: Decode,
{
    pub(crate) fn new(r: R, size: u64, path: impl ToString) -> Self {
        Self {
            r: OffsetReader::new(r),
            total_size: size,
            path: path.to_string(),
            error: false,
            _p: Default::default(),
        }
    }
}

impl<R, D> Iterator for RecordIterator<R, D>
where
    R: io::Read,
    D: Decode,
{
    type Item = Result<(u64, u64, D), io::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.error {
            return None;
        }

        let start = self.r.offset();
        if start >= self.total_size {
            return None;
        }

        let res = D::decode(&mut self.r)
            .map(|d| (start, self.r.offset() - start, d))
            .context(|| format!("decode record at offset {}", start))
            .context(|| format!("iterate {}", self.path));

        if res.is_err() {
            self.error = true;
        }

        Some(res)
    }
}
