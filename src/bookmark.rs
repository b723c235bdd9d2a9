//! Opaque scroll anchors. A bookmark pins a global row index together with a
//! per-cursor nonce and a checksum, so a token from another cursor (or a
//! corrupted one) is rejected instead of landing on an arbitrary row.

use bytes::{
    Buf,
    BufMut,
    Bytes,
    BytesMut,
};

use crate::{
    errs::Error,
    index::GlobalIndex,
};

const MAGIC: u32 = 0x524d_4b31; // "RMK1"
const TOKEN_LEN: usize = 20;

pub(crate) fn issue(nonce: u32, global: GlobalIndex) -> Bytes {
    let mut buf = BytesMut::with_capacity(TOKEN_LEN);
    buf.put_u32(MAGIC);
    buf.put_u32(nonce);
    buf.put_i64(global);
    let crc = crc32fast::hash(&buf);
    buf.put_u32(crc);
    buf.freeze()
}

pub(crate) fn resolve(nonce: u32, token: &[u8]) -> Result<GlobalIndex, Error> {
    if token.len() != TOKEN_LEN {
        return Err(Error::InvalidBookmark);
    }
    let (body, tail) = token.split_at(TOKEN_LEN - 4);
    let mut crc = tail;
    if crc.get_u32() != crc32fast::hash(body) {
        return Err(Error::InvalidBookmark);
    }
    let mut body = body;
    if body.get_u32() != MAGIC || body.get_u32() != nonce {
        return Err(Error::InvalidBookmark);
    }
    Ok(body.get_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let token = issue(0xdead_beef, 42);
        assert_eq!(resolve(0xdead_beef, &token).unwrap(), 42);

        let token = issue(7, -3);
        assert_eq!(resolve(7, &token).unwrap(), -3);
    }

    #[test]
    fn test_foreign_or_mangled_tokens_rejected() {
        let token = issue(1, 42);
        // wrong cursor
        assert!(matches!(resolve(2, &token), Err(Error::InvalidBookmark)));
        // truncated
        assert!(matches!(resolve(1, &token[..10]), Err(Error::InvalidBookmark)));
        // bit flip
        let mut bad = token.to_vec();
        bad[9] ^= 0x40;
        assert!(matches!(resolve(1, &bad), Err(Error::InvalidBookmark)));
    }
}
