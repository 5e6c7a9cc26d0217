//! Drains a single non-blocking descriptor until it would block.

use crate::fd::Fd;
use std::io;

/// Reads from `fd` in `chunk_size`-byte requests, concatenating the
/// results, until the descriptor reports EOF or would block. Returns the
/// accumulated buffer, possibly empty. Never blocks; the caller must have
/// flipped the descriptor to non-blocking mode first.
pub(crate) fn drain(fd: &Fd, chunk_size: usize) -> io::Result<Vec<u8>> {
    let mut acc = Vec::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        match fd.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => acc.extend_from_slice(&chunk[..n]),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::NonblockGuard;

    fn pipe_pair() -> (Fd, Fd) {
        let mut ends = [0; 2];
        let ret = unsafe { libc::pipe(ends.as_mut_ptr()) };
        assert_eq!(ret, 0);
        (Fd::new(ends[0]), Fd::new(ends[1]))
    }

    #[test]
    fn collects_across_chunk_boundaries() {
        let (rx, tx) = pipe_pair();
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        tx.write_all(&payload).unwrap();
        let _guard = NonblockGuard::set(&rx).unwrap();
        let got = drain(&rx, 1024).unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn empty_pipe_yields_empty_buffer() {
        let (rx, _tx) = pipe_pair();
        let _guard = NonblockGuard::set(&rx).unwrap();
        assert!(drain(&rx, 4096).unwrap().is_empty());
    }

    #[test]
    fn closed_writer_reports_eof_not_error() {
        let (rx, tx) = pipe_pair();
        tx.write_all(b"tail").unwrap();
        drop(tx);
        let _guard = NonblockGuard::set(&rx).unwrap();
        assert_eq!(drain(&rx, 4096).unwrap(), b"tail");
        assert!(drain(&rx, 4096).unwrap().is_empty());
    }
}
