use std::fs::File;
use std::io;

/// A reader that counts the bytes consumed from the inner reader.
pub(crate) struct OffsetReader<R> {
    inner: R,
    offset: u64,
}

impl<R: io::Read> OffsetReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }
}

impl<R: io::Read> io::Read for OffsetReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Reads a file from a given position with `pread`, without touching the
/// shared cursor of the file descriptor.
///
/// Several readers can share one `File` this way.
pub(crate) struct PositionedReader<'a> {
    f: &'a File,
    pos: u64,
}

impl<'a> PositionedReader<'a> {
    pub(crate) fn new(f: &'a File, pos: u64) -> Self {
        Self { f, pos }
    }
}

impl io::Read for PositionedReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = read_at(self.f, buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

#[cfg(unix)]
fn read_at(f: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    f.read_at(buf, pos)
}

#[cfg(windows)]
fn read_at(f: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    f.seek_read(buf, pos)
}
