use super::rolling::RollingHash;
use super::{FileSignature, ALPHABET, MAX_DIGEST_LEN, MIN_BLOCK_SIZE};

const HASH_PRIME: u32 = 0x0100_0193;
const HASH_INIT: u32 = 0x2802_1967;

/// Smallest `MIN_BLOCK_SIZE * 2^k` at which `len` bytes are expected to
/// produce no more than `MAX_DIGEST_LEN` chunk boundaries.
pub fn initial_block_size(len: usize) -> u64 {
    let mut block_size = MIN_BLOCK_SIZE;
    while block_size * (MAX_DIGEST_LEN as u64) < len as u64 {
        block_size *= 2;
    }
    block_size
}

/// Compute the fuzzy signature of `data`. Infallible for any finite input.
///
/// Each digest character covers one content-defined chunk. A contiguous
/// edit disturbs only the chunks it touches, while single-byte edits spread
/// across every chunk change every character and score 0 against the
/// unedited signature.
///
/// Starts at the estimated block size, then:
/// - doubles it whenever either digest would exceed `MAX_DIGEST_LEN`
/// - halves it while digest A is under half the cap, as long as no
///   overflow has been seen (so the search cannot oscillate)
pub fn compute_signature(data: &[u8]) -> FileSignature {
    if data.is_empty() {
        return FileSignature::empty();
    }

    let mut block_size = initial_block_size(data.len());
    let mut overflow_seen = false;
    let mut fallback: Option<FileSignature> = None;

    loop {
        let Some(sig) = digest_pass(data, block_size) else {
            if let Some(sig) = fallback {
                return sig;
            }
            overflow_seen = true;
            block_size *= 2;
            continue;
        };

        if !overflow_seen
            && block_size > MIN_BLOCK_SIZE
            && sig.digest_a.len() < MAX_DIGEST_LEN / 2
        {
            fallback = Some(sig);
            block_size /= 2;
            continue;
        }

        return sig;
    }
}

/// One pass over the data producing both digests, or `None` on overflow.
fn digest_pass(data: &[u8], block_size: u64) -> Option<FileSignature> {
    let mut roll = RollingHash::new();
    let mut a = DigestBuilder::new(block_size);
    let mut b = DigestBuilder::new(block_size * 2);

    for &c in data {
        roll.update(c);
        a.fold(c);
        b.fold(c);

        let sum = roll.sum() as u64;
        a.check_boundary(sum);
        b.check_boundary(sum);

        if a.overflowed || b.overflowed {
            return None;
        }
    }

    let digest_a = a.finish()?;
    let digest_b = b.finish()?;
    Some(FileSignature {
        block_size,
        digest_a,
        digest_b,
    })
}

struct DigestBuilder {
    trigger: u64,
    acc: u32,
    out: Vec<u8>,
    pending: bool,
    overflowed: bool,
}

impl DigestBuilder {
    fn new(trigger: u64) -> Self {
        Self {
            trigger,
            acc: HASH_INIT,
            out: Vec::with_capacity(MAX_DIGEST_LEN),
            pending: false,
            overflowed: false,
        }
    }

    fn fold(&mut self, c: u8) {
        self.acc = self.acc.wrapping_mul(HASH_PRIME) ^ c as u32;
        self.pending = true;
    }

    fn check_boundary(&mut self, rolling_sum: u64) {
        if rolling_sum % self.trigger == self.trigger - 1 {
            self.emit();
            self.acc = HASH_INIT;
            self.pending = false;
        }
    }

    fn emit(&mut self) {
        if self.out.len() >= MAX_DIGEST_LEN {
            self.overflowed = true;
            return;
        }
        self.out.push(ALPHABET[(self.acc % 64) as usize]);
    }

    /// Flush bytes folded since the last boundary as one final character.
    fn finish(mut self) -> Option<String> {
        if self.pending {
            self.emit();
        }
        if self.overflowed {
            return None;
        }
        // Every byte comes from ALPHABET.
        Some(self.out.into_iter().map(char::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_block_size() {
        assert_eq!(initial_block_size(0), 3);
        assert_eq!(initial_block_size(192), 3);
        assert_eq!(initial_block_size(193), 6);
        assert_eq!(initial_block_size(196_608), 3072);
    }

    #[test]
    fn test_empty_input() {
        let sig = compute_signature(&[]);
        assert_eq!(sig, FileSignature::empty());
    }

    #[test]
    fn test_single_byte_has_tail_character() {
        let sig = compute_signature(b"x");
        assert_eq!(sig.block_size, 3);
        assert_eq!(sig.digest_a.len(), 1);
        assert_eq!(sig.digest_b.len(), 1);
    }

    #[test]
    fn test_constant_input_is_bounded() {
        // A constant stream keeps the rolling sum fixed, so boundaries either
        // fire on every byte or never.
        let data = vec![0x41u8; 100_000];
        let sig = compute_signature(&data);
        assert!(sig.digest_a.len() <= MAX_DIGEST_LEN);
        assert!(sig.digest_b.len() <= MAX_DIGEST_LEN);
    }

    #[test]
    fn test_digest_b_uses_doubled_trigger() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i.wrapping_mul(2_654_435_761) >> 13) as u8).collect();
        let sig = compute_signature(&data);
        assert!(sig.digest_b.len() <= sig.digest_a.len() + 1);
    }
}
