//! Bulk coefficient transfer from the host.
//!
//! After a schedule is configured the host streams exactly `channel_count × Σ length` `f32`
//! words. The transfer blocks until all of them arrived; a transport that ends or times out
//! first yields [`TransferError::Incomplete`] with the number of bytes actually received.

use std::io::{ErrorKind, Read};

use tracing::{debug, error};

use shimcompiler_backend::coefficients::{CoefficientStore, Endianness};
use shimcompiler_backend::error::TransferError;
use shimcompiler_backend::indexer::ScheduleIndexer;

/// Reads the payload for `schedule` from `reader`.
pub fn read_payload<R, S>(
    reader: &mut R,
    schedule: &S,
    endianness: Endianness,
) -> Result<CoefficientStore, TransferError>
where
    R: Read + ?Sized,
    S: ScheduleIndexer + ?Sized,
{
    if schedule.total_coefficients() == 0 {
        return Err(TransferError::NotConfigured);
    }
    let expected = schedule.total_coefficients() * 4;
    let mut buf = vec![0u8; expected];
    let mut received = 0;

    while received < expected {
        match reader.read(&mut buf[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Err(e) => {
                error!("payload transfer failed after {received} bytes: {e}");
                return Err(e.into());
            }
        }
    }
    if received < expected {
        error!(expected, received, "payload transfer incomplete");
        return Err(TransferError::Incomplete { expected, received });
    }
    debug!(bytes = received, "payload received");
    CoefficientStore::from_bytes(
        &buf,
        schedule.channel_count(),
        schedule.total_samples(),
        endianness,
    )
}
