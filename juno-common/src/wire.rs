//! Small helpers shared by the component codecs.

use bytes::Buf;

use crate::error::{FrameError, FrameResult};

/// Rounds `len` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) fn pad(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// Fails with `Truncated` unless `buf` holds at least `needed` more bytes.
#[inline]
pub(crate) fn ensure(buf: &impl Buf, needed: usize) -> FrameResult<()> {
    let available = buf.remaining();
    if available < needed {
        return Err(FrameError::Truncated { needed, available });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad() {
        assert_eq!(pad(0, 8), 0);
        assert_eq!(pad(1, 4), 4);
        assert_eq!(pad(6, 4), 8);
        assert_eq!(pad(16, 8), 16);
        assert_eq!(pad(17, 8), 24);
    }
}
