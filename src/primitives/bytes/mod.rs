#![forbid(unsafe_code)]
//! Encoding helpers shared by the record, index and snapshot codecs.

pub mod ord {
    //! Order-preserving fixed-width encoders for identifier keys.

    const U32_LEN: usize = core::mem::size_of::<u32>();

    /// Big-endian encoding so byte order matches numeric order.
    pub fn put_u32_be(dst: &mut [u8], v: u32) {
        assert!(dst.len() >= U32_LEN, "destination too small");
        dst[..U32_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u32 from big-endian byte order.
    pub fn get_u32_be(src: &[u8]) -> u32 {
        let mut bytes = [0u8; U32_LEN];
        bytes.copy_from_slice(&src[..U32_LEN]);
        u32::from_be_bytes(bytes)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn u32_order_matches_bytes() {
            let mut a = [0u8; 4];
            let mut b = [0u8; 4];
            put_u32_be(&mut a, 255);
            put_u32_be(&mut b, 256);
            assert!(a < b);
            assert_eq!(get_u32_be(&a), 255);
            assert_eq!(get_u32_be(&b), 256);
        }
    }
}

pub mod stream {
    //! Big-endian primitives over `Read`/`Write`, including the
    //! length-prefixed UTF-8 strings used by the snapshot, dictionary and
    //! log files.

    use std::io::{self, Read, Write};

    /// Longest string a `u16` length prefix can describe.
    pub const MAX_UTF_LEN: usize = u16::MAX as usize;

    /// Width of a string length prefix.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum StrWidth {
        /// Two-byte prefix, used by version 1 files.
        Short,
        /// Four-byte prefix.
        Long,
    }

    /// Writes a single byte.
    pub fn write_u8<W: Write>(out: &mut W, v: u8) -> io::Result<()> {
        out.write_all(&[v])
    }

    /// Writes a big-endian u16.
    pub fn write_u16<W: Write>(out: &mut W, v: u16) -> io::Result<()> {
        out.write_all(&v.to_be_bytes())
    }

    /// Writes a big-endian u32.
    pub fn write_u32<W: Write>(out: &mut W, v: u32) -> io::Result<()> {
        out.write_all(&v.to_be_bytes())
    }

    /// Writes a big-endian u64.
    pub fn write_u64<W: Write>(out: &mut W, v: u64) -> io::Result<()> {
        out.write_all(&v.to_be_bytes())
    }

    /// Writes `s` with a two-byte length prefix.
    pub fn write_utf<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
        let len = u16::try_from(s.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("string of {} bytes exceeds {MAX_UTF_LEN}", s.len()),
            )
        })?;
        write_u16(out, len)?;
        out.write_all(s.as_bytes())
    }

    /// Writes `s` with a four-byte length prefix.
    pub fn write_long_utf<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
        let len = u32::try_from(s.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("string of {} bytes exceeds {}", s.len(), u32::MAX),
            )
        })?;
        write_u32(out, len)?;
        out.write_all(s.as_bytes())
    }

    /// Writes `s` with a prefix of the given width.
    pub fn write_str<W: Write>(out: &mut W, s: &str, width: StrWidth) -> io::Result<()> {
        match width {
            StrWidth::Short => write_utf(out, s),
            StrWidth::Long => write_long_utf(out, s),
        }
    }

    /// Reads a single byte.
    pub fn read_u8<R: Read>(src: &mut R) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        src.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    /// Reads a single byte, returning `None` at a clean end of stream.
    pub fn read_u8_opt<R: Read>(src: &mut R) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        loop {
            match src.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Reads a big-endian u16.
    pub fn read_u16<R: Read>(src: &mut R) -> io::Result<u16> {
        let mut buf = [0u8; 2];
        src.read_exact(&mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Reads a big-endian u32.
    pub fn read_u32<R: Read>(src: &mut R) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        src.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// Reads a big-endian u64.
    pub fn read_u64<R: Read>(src: &mut R) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        src.read_exact(&mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    /// Reads a string written by [`write_utf`].
    pub fn read_utf<R: Read>(src: &mut R) -> io::Result<String> {
        let len = read_u16(src)? as usize;
        let mut buf = vec![0u8; len];
        src.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Reads a string written by [`write_long_utf`].
    ///
    /// The buffer grows with the bytes actually present, so a corrupt
    /// length cannot force a large allocation up front.
    pub fn read_long_utf<R: Read>(src: &mut R) -> io::Result<String> {
        let len = u64::from(read_u32(src)?);
        let mut buf = Vec::new();
        src.by_ref().take(len).read_to_end(&mut buf)?;
        if buf.len() as u64 != len {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated string"));
        }
        String::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
    }

    /// Reads a string written by [`write_str`] with the same width.
    pub fn read_str<R: Read>(src: &mut R, width: StrWidth) -> io::Result<String> {
        match width {
            StrWidth::Short => read_utf(src),
            StrWidth::Long => read_long_utf(src),
        }
    }

}
