//! Channel impulse response readout
//!
//! After a reception the accumulator holds [`CIR_LEN`] complex samples of the
//! channel impulse response. They are reduced to magnitudes and streamed to
//! the host as one `R10|m0|m1|...\r\n` line, written in chunks of
//! [`CHUNK_LEN`] samples so that no buffer has to hold the whole line.

use core::fmt::Write;

use heapless::String;

use crate::{
    host::{BufferFull, HostLink},
    radio::Radio,
};

/// Number of accumulator samples read
pub const CIR_LEN: usize = 1016;

/// Samples per chunk written to the host
pub const CHUNK_LEN: usize = 50;

/// Largest chunk: the tag, `|` and five digits per sample, the terminator
pub const CHUNK_CAPACITY: usize = 3 + CHUNK_LEN * 6 + 2;

/// Approximate magnitude of a complex sample
///
/// `max(|re|, |im|) + min(|re|, |im|) / 4`, which stays within 12% of the
/// Euclidean norm without a square root.
pub fn magnitude(real: i16, imaginary: i16) -> u32 {
    let real = real.unsigned_abs() as u32;
    let imaginary = imaginary.unsigned_abs() as u32;
    real.max(imaginary) + real.min(imaginary) / 4
}

/// Reads the magnitudes of the first `samples.len()` accumulator entries
pub fn read_cir<R: Radio>(radio: &mut R, samples: &mut [u32]) -> Result<(), R::Error> {
    for (index, sample) in samples.iter_mut().enumerate() {
        let (real, imaginary) = radio.cir_sample(index as u16)?;
        *sample = magnitude(real, imaginary);
    }
    Ok(())
}

/// Length of the `R10` line carrying `samples`, terminator included
pub fn line_len(samples: &[u32]) -> usize {
    let fields: usize = samples.iter().map(|value| 1 + digits(*value)).sum();
    3 + fields + 2
}

fn digits(mut value: u32) -> usize {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

/// Streams magnitudes to the host as an `R10` line
///
/// Nothing is written if the link reports too little free space for the
/// whole line. Should a chunk still be refused, the partial line is closed
/// with a terminator before failing.
pub fn write_cir<H: HostLink>(host: &mut H, samples: &[u32]) -> Result<(), BufferFull> {
    if host
        .available()
        .is_some_and(|free| free < line_len(samples))
    {
        return Err(BufferFull);
    }

    let mut chunk: String<CHUNK_CAPACITY> = String::new();
    chunk.push_str("R10").map_err(|_| BufferFull)?;

    let count = samples.chunks(CHUNK_LEN).count();
    for (i, values) in samples.chunks(CHUNK_LEN).enumerate() {
        for value in values {
            write!(chunk, "|{}", value).map_err(|_| BufferFull)?;
        }
        if i + 1 == count {
            chunk.push_str("\r\n").map_err(|_| BufferFull)?;
        }
        if let Err(full) = host.write(chunk.as_bytes()) {
            if i > 0 {
                let _ = host.write(b"\r\n");
            }
            return Err(full);
        }
        chunk.clear();
    }

    if samples.is_empty() {
        chunk.push_str("\r\n").map_err(|_| BufferFull)?;
        host.write(chunk.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ScriptedRadio, VecLink};

    #[test]
    fn magnitude_approximation() {
        assert_eq!(magnitude(0, 0), 0);
        assert_eq!(magnitude(-400, 100), 425);
        assert_eq!(magnitude(100, -400), 425);
        assert_eq!(magnitude(i16::MIN, i16::MIN), 32768 + 8192);
    }

    #[test]
    fn reads_every_sample() {
        let mut radio = ScriptedRadio::new();
        radio.cir = (0..CIR_LEN as i16).map(|i| (i, -i)).collect();

        let mut samples = [0; CIR_LEN];
        read_cir(&mut radio, &mut samples).unwrap();

        assert_eq!(samples[0], 0);
        assert_eq!(samples[4], 5);
        assert_eq!(samples[CIR_LEN - 1], 1015 + 1015 / 4);
    }

    #[test]
    fn written_in_chunks() {
        let mut link = VecLink::new();
        let samples = [7; 120];

        write_cir(&mut link, &samples).unwrap();

        assert_eq!(link.writes, 3);
        let lines = link.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("R10|7|7|"));
        assert_eq!(lines[0].matches('|').count(), 120);
    }

    #[test]
    fn largest_chunk_fits() {
        let mut link = VecLink::new();

        write_cir(&mut link, &[40960; CHUNK_LEN]).unwrap();

        assert_eq!(link.output.len(), CHUNK_CAPACITY);
    }

    #[test]
    fn line_length_counts_digits() {
        assert_eq!(line_len(&[]), 5);
        assert_eq!(line_len(&[0, 9, 10, 40960]), 3 + 2 + 2 + 3 + 6 + 2);

        let mut link = VecLink::new();
        let samples = [0, 9, 10, 40960, 123];
        write_cir(&mut link, &samples).unwrap();
        assert_eq!(link.output.len(), line_len(&samples));
    }

    #[test]
    fn full_link_gets_nothing() {
        let mut link = VecLink::with_capacity(100);

        assert_eq!(write_cir(&mut link, &[1; CIR_LEN]), Err(BufferFull));
        assert!(link.output.is_empty());

        let mut link = VecLink::with_capacity(line_len(&[1; CIR_LEN]));
        assert_eq!(write_cir(&mut link, &[1; CIR_LEN]), Ok(()));
    }

    /// Accepts a number of writes, then refuses everything but terminators
    struct StallingLink {
        writes_left: usize,
        output: std::vec::Vec<u8>,
    }

    impl HostLink for StallingLink {
        fn write(&mut self, bytes: &[u8]) -> Result<(), BufferFull> {
            if self.writes_left == 0 && bytes != b"\r\n" {
                return Err(BufferFull);
            }
            self.writes_left = self.writes_left.saturating_sub(1);
            self.output.extend_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn interrupted_line_is_terminated() {
        let mut link = StallingLink {
            writes_left: 2,
            output: std::vec::Vec::new(),
        };

        assert_eq!(write_cir(&mut link, &[1; CIR_LEN]), Err(BufferFull));
        assert!(link.output.starts_with(b"R10|1|1|"));
        assert!(link.output.ends_with(b"|1\r\n"));
        assert_eq!(link.output.iter().filter(|b| **b == b'|').count(), 2 * CHUNK_LEN);
    }
}
