use std::io::{self, prelude::*};

/// Read a little-endian usize out of the given stream.
///
pub fn read_usize<R: Read>(stream: &mut R) -> io::Result<usize> {
    let mut buffer = [0; std::mem::size_of::<usize>()];
    stream.read_exact(&mut buffer)?;
    Ok(usize::from_le_bytes(buffer))
}

/// Read the given number of bytes from a stream, into a vec.
///
pub fn read_bytes_vec<R: Read>(stream: &mut R, size: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; size];
    stream.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Write a length-prefixed frame to a stream.
///
pub fn write_frame<W: Write>(stream: &mut W, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(&bytes.len().to_le_bytes())?;
    stream.write_all(bytes)
}

/// Read a length-prefixed frame from a stream.
///
pub fn read_frame<R: Read>(stream: &mut R) -> io::Result<Vec<u8>> {
    let size = read_usize(stream)?;
    read_bytes_vec(stream, size)
}
