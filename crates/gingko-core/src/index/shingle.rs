use crate::signature::rolling::ROLLING_WINDOW;
use crate::signature::score::collapse_runs;
use crate::signature::FileSignature;
use ahash::AHashSet;
use std::hash::Hasher as _;
use twox_hash::XxHash64;

/// Shingle width. Matches the scorer's common-substring requirement, so any
/// pair that can score above zero shares at least one token.
pub const SHINGLE_LEN: usize = ROLLING_WINDOW;

/// Indexable tokens for a signature, sorted and duplicate free.
///
/// Each token is bound to the effective block size of the digest it came
/// from (A at `block_size`, B at `2 * block_size`), so two signatures share a
/// token only when some pair of their digests is directly comparable.
pub fn signature_tokens(signature: &FileSignature) -> Vec<i64> {
    let mut tokens = AHashSet::new();
    digest_tokens(&signature.digest_a, signature.block_size, &mut tokens);
    digest_tokens(&signature.digest_b, signature.block_size * 2, &mut tokens);

    let mut tokens: Vec<i64> = tokens.into_iter().collect();
    tokens.sort_unstable();
    tokens
}

fn digest_tokens(digest: &str, block_size: u64, tokens: &mut AHashSet<i64>) {
    let collapsed = collapse_runs(digest);
    let bytes = collapsed.as_bytes();

    // Too short to shingle: index the whole digest so identical tiny inputs
    // still find each other.
    if bytes.len() < SHINGLE_LEN {
        tokens.insert(token_key(block_size, bytes));
        return;
    }
    for shingle in bytes.windows(SHINGLE_LEN) {
        tokens.insert(token_key(block_size, shingle));
    }
}

fn token_key(block_size: u64, shingle: &[u8]) -> i64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write_u64(block_size);
    hasher.write(shingle);
    hasher.finish() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(block_size: u64, a: &str, b: &str) -> FileSignature {
        FileSignature {
            block_size,
            digest_a: a.to_string(),
            digest_b: b.to_string(),
        }
    }

    fn shared(a: &FileSignature, b: &FileSignature) -> usize {
        let ta = signature_tokens(a);
        let tb = signature_tokens(b);
        ta.iter().filter(|t| tb.binary_search(t).is_ok()).count()
    }

    #[test]
    fn test_token_count() {
        // 10 chars -> 4 shingles, 8 chars -> 2 shingles
        let s = sig(96, "ABCDEFGHIJ", "abcdefgh");
        assert_eq!(signature_tokens(&s).len(), 6);
    }

    #[test]
    fn test_same_shingle_different_block_size_does_not_match() {
        let a = sig(96, "ABCDEFGHIJ", "");
        let b = sig(384, "ABCDEFGHIJ", "");
        assert_eq!(shared(&a, &b), 0);
    }

    #[test]
    fn test_adjacent_block_sizes_match_through_digest_b() {
        let small = sig(96, "zzzzqqqqwwww", "ABCDEFGHIJ");
        let large = sig(192, "ABCDEFGHIJ", "");
        assert_eq!(shared(&small, &large), 4);
    }

    #[test]
    fn test_empty_signatures_share_a_token() {
        let e = FileSignature::empty();
        assert!(shared(&e, &e) > 0);
    }
}
