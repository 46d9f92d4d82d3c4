// Copyright (c) Microsoft. All rights reserved.

//! Helpers for the caller-capacity / callee-length buffer convention.

use crate::Error;

/// Number of times [`read_to_vec`] reallocates when the output grows between the size query and the fill.
const MAX_ATTEMPTS: usize = 3;

/// Copies `value` to the start of `out` and returns its length.
///
/// If `value` is longer than `out`, nothing is written and [`Error::BufferTooSmall`] reports the required length.
pub fn write(out: &mut [u8], value: &[u8]) -> Result<usize, Error> {
    let Some(out) = out.get_mut(..value.len()) else {
        return Err(Error::BufferTooSmall {
            required: Some(value.len()),
            capacity: out.len(),
        });
    };

    out.copy_from_slice(value);
    Ok(value.len())
}

/// Queries the output size with `len`, then fills a buffer of that size with `fill`.
///
/// If `fill` still reports [`Error::BufferTooSmall`] with a known required size, the buffer is reallocated and `fill` retried.
/// The returned buffer is truncated to the length `fill` reported.
pub fn read_to_vec(
    mut len: impl FnMut() -> Result<usize, Error>,
    mut fill: impl FnMut(&mut [u8]) -> Result<usize, Error>,
) -> Result<Vec<u8>, Error> {
    let mut capacity = len()?;

    for _ in 0..MAX_ATTEMPTS {
        let mut buf = vec![0_u8; capacity];
        match fill(&mut buf) {
            Ok(written) => return finish(buf, written),

            Err(Error::BufferTooSmall {
                required: Some(required),
                ..
            }) if required > capacity => capacity = required,

            Err(err) => return Err(err),
        }
    }

    Err(Error::platform(format!(
        "output size kept growing after {MAX_ATTEMPTS} attempts"
    )))
}

/// Fills a buffer of unknown required size by starting at `initial` bytes and doubling on [`Error::BufferTooSmall`]
/// until `max` bytes.
///
/// Used with providers that cannot report output sizes.
pub fn probe_to_vec(
    initial: usize,
    max: usize,
    mut fill: impl FnMut(&mut [u8]) -> Result<usize, Error>,
) -> Result<Vec<u8>, Error> {
    let mut capacity = initial.max(1);

    loop {
        let mut buf = vec![0_u8; capacity];
        match fill(&mut buf) {
            Ok(written) => return finish(buf, written),

            Err(Error::BufferTooSmall { required, .. }) if capacity < max => {
                capacity = match required {
                    Some(required) if required > capacity => required,
                    _ => capacity.saturating_mul(2),
                }
                .min(max);
            }

            Err(err) => return Err(err),
        }
    }
}

fn finish(mut buf: Vec<u8>, written: usize) -> Result<Vec<u8>, Error> {
    if written > buf.len() {
        return Err(Error::platform(format!(
            "provider reported {} bytes written into a buffer of {} bytes",
            written,
            buf.len(),
        )));
    }

    buf.truncate(written);
    Ok(buf)
}
