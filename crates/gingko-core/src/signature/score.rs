use super::rolling::ROLLING_WINDOW;
use super::{FileSignature, MAX_DIGEST_LEN, MIN_BLOCK_SIZE};

/// Longest run of one character kept before comparison.
pub const MAX_RUN: usize = 3;

/// Block size from which short digests are no longer penalised.
const UNCAPPED_BLOCK_SIZE: u64 = (99 + ROLLING_WINDOW as u64) / ROLLING_WINDOW as u64 * MIN_BLOCK_SIZE;

/// Similarity of two signatures in `[0, 100]`.
///
/// Symmetric by construction: the pair is put in canonical order before any
/// comparison, so `score(a, b) == score(b, a)` regardless of how the edit
/// distance breaks ties internally.
pub fn score(a: &FileSignature, b: &FileSignature) -> u32 {
    let (small, large) = canonical_order(a, b);

    if small == large {
        return 100;
    }

    let compatible = small.block_size == large.block_size
        || small.block_size.checked_mul(2) == Some(large.block_size);
    if !compatible {
        return 0;
    }

    let small_a = collapse_runs(&small.digest_a);
    let small_b = collapse_runs(&small.digest_b);
    let large_a = collapse_runs(&large.digest_a);
    let large_b = collapse_runs(&large.digest_b);

    if small.block_size == large.block_size {
        if small_a == large_a && small_b == large_b {
            return 100;
        }
        let at_block = score_digests(&small_a, &large_a, small.block_size);
        let at_double = score_digests(&small_b, &large_b, small.block_size * 2);
        at_block.max(at_double)
    } else {
        // The smaller signature's B digest was triggered at the larger one's block size.
        score_digests(&small_b, &large_a, large.block_size)
    }
}

fn canonical_order<'a>(
    a: &'a FileSignature,
    b: &'a FileSignature,
) -> (&'a FileSignature, &'a FileSignature) {
    if order_key(a) <= order_key(b) {
        (a, b)
    } else {
        (b, a)
    }
}

fn order_key(s: &FileSignature) -> (u64, &str, &str) {
    (s.block_size, &s.digest_a, &s.digest_b)
}

/// Collapse runs of more than `MAX_RUN` identical characters down to `MAX_RUN`.
///
/// Long runs come from low-entropy regions and would otherwise dominate
/// both the edit distance and the shingle set.
pub fn collapse_runs(digest: &str) -> String {
    let mut out = String::with_capacity(digest.len());
    let mut last: Option<char> = None;
    let mut run = 0usize;

    for c in digest.chars() {
        if Some(c) == last {
            run += 1;
        } else {
            last = Some(c);
            run = 1;
        }
        if run <= MAX_RUN {
            out.push(c);
        }
    }
    out
}

/// Score two digests triggered at the same effective block size.
fn score_digests(s1: &str, s2: &str, block_size: u64) -> u32 {
    let (l1, l2) = (s1.len(), s2.len());
    if l1 > MAX_DIGEST_LEN || l2 > MAX_DIGEST_LEN {
        return 0;
    }
    if !has_common_substring(s1.as_bytes(), s2.as_bytes()) {
        return 0;
    }

    let distance = edit_distance(s1.as_bytes(), s2.as_bytes()) as u64;
    let scaled = distance * MAX_DIGEST_LEN as u64 / (l1 + l2) as u64;
    let scaled = scaled * 100 / MAX_DIGEST_LEN as u64;
    if scaled >= 100 {
        return 0;
    }
    let mut score = 100 - scaled;

    // Short digests at small block sizes match too easily by chance.
    if block_size < UNCAPPED_BLOCK_SIZE {
        let cap = block_size / MIN_BLOCK_SIZE * l1.min(l2) as u64;
        score = score.min(cap);
    }
    score as u32
}

/// True when both strings share a substring of `ROLLING_WINDOW` characters.
pub fn has_common_substring(s1: &[u8], s2: &[u8]) -> bool {
    if s1.len() < ROLLING_WINDOW || s2.len() < ROLLING_WINDOW {
        return false;
    }
    let windows: ahash::AHashSet<&[u8]> = s1.windows(ROLLING_WINDOW).collect();
    s2.windows(ROLLING_WINDOW).any(|w| windows.contains(w))
}

/// Edit distance with unit insert/delete and substitution cost 2.
///
/// With these weights the distance equals `l1 + l2 - 2 * lcs(s1, s2)`, which
/// is symmetric in its arguments.
pub fn edit_distance(s1: &[u8], s2: &[u8]) -> usize {
    let mut prev: Vec<usize> = (0..=s2.len()).collect();
    let mut curr = vec![0usize; s2.len() + 1];

    for (i, &c1) in s1.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &c2) in s2.iter().enumerate() {
            let substitute = prev[j] + if c1 == c2 { 0 } else { 2 };
            let delete = prev[j + 1] + 1;
            let insert = curr[j] + 1;
            curr[j + 1] = substitute.min(delete).min(insert);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[s2.len()]
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

    #[test]
    fn test_collapse_runs() {
        assert_eq!(collapse_runs("AAAAAB"), "AAAB");
        assert_eq!(collapse_runs("ABBBBBBCCCD"), "ABBBCCCD");
        assert_eq!(collapse_runs(""), "");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance(b"", b""), 0);
        assert_eq!(edit_distance(b"abc", b""), 3);
        assert_eq!(edit_distance(b"abc", b"abd"), 2);
        assert_eq!(edit_distance(b"abc", b"abxc"), 1);
        assert_eq!(edit_distance(b"kitten", b"sitting"), edit_distance(b"sitting", b"kitten"));
    }

    #[test]
    fn test_identical_is_100() {
        let s = sig(96, "ABCDEFGHIJKLMNOP", "ABCDEFGH");
        assert_eq!(score(&s, &s), 100);
        assert_eq!(score(&FileSignature::empty(), &FileSignature::empty()), 100);
    }

    #[test]
    fn test_empty_against_non_empty_is_zero() {
        let s = sig(3, "ABCDEFGHIJ", "ABCDE");
        assert_eq!(score(&FileSignature::empty(), &s), 0);
    }

    #[test]
    fn test_far_block_sizes_score_zero() {
        let a = sig(96, "ABCDEFGHIJKLMNOP", "ABCDEFGHIJKLMNOP");
        let b = sig(384, "ABCDEFGHIJKLMNOP", "ABCDEFGHIJKLMNOP");
        assert_eq!(score(&a, &b), 0);
    }

    #[test]
    fn test_adjacent_block_sizes_cross_compare() {
        let small = sig(3072, "zzzzzzzzqqqqqqqqwwwwwwww", "ABCDEFGHIJKLMNOPQRSTU");
        let large = sig(6144, "ABCDEFGHIJKLMNOPQRSTV", "ABCDEFGHIJ");
        let s = score(&small, &large);
        assert!(s > 80, "cross block-size score was {}", s);
        assert_eq!(s, score(&large, &small));
    }

    #[test]
    fn test_no_common_substring_is_zero() {
        let a = sig(3072, "ABCDEFGHIJKLMNOP", "ABCDEFGH");
        let b = sig(3072, "abcdefghijklmnop", "abcdefgh");
        assert_eq!(score(&a, &b), 0);
    }

    #[test]
    fn test_small_block_size_is_capped() {
        let a = sig(3, "ABCDEFGX", "");
        let b = sig(3, "ABCDEFGY", "");
        // distance 2 over 16 characters would score 88 uncapped.
        assert_eq!(score(&a, &b), 8);
    }
}
