//! Deterministic mapping from arbitrary package/version identifiers to
//! safe, collision-resistant filesystem directory names.
//!
//! An input passes through untouched when it is already safe to use as a
//! directory name (bounded length, restricted character set, no leading or
//! trailing space) -- this preserves case, which matters for backward
//! compatibility on case-sensitive filesystems. Anything else is replaced
//! by a generated form built from a SHA-256 digest of the lower-cased
//! input, so that two distinct unsafe inputs collide only if finding a
//! SHA-256 collision is feasible.

use data_encoding::BASE32;
use sha2::{Digest, Sha256};

const MAX_UNTOUCHED_LEN: usize = 255;
const MAX_GENERATED_LEN: usize = 254;

/// Map `input` to a directory-safe name.
pub fn normalize(input: &str) -> String {
    if is_safe_untouched(input) {
        input.to_string()
    } else {
        generate(input)
    }
}

fn is_safe_untouched(input: &str) -> bool {
    if input.len() > MAX_UNTOUCHED_LEN {
        return false;
    }
    if input.starts_with(' ') || input.ends_with(' ') {
        return false;
    }
    input.chars().all(is_allowed_char)
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '+' | '=' | '(' | ')' | '[' | ']' | '{' | '}' | '-' | '.' | ' ')
}

fn generate(input: &str) -> String {
    let lowered = input.to_lowercase();
    let digest = Sha256::digest(lowered.as_bytes());
    let encoded_digest = BASE32.encode(&digest);
    let length_marker = format!("{:x}", input.len());

    // "_" + prefix + "_" + length_marker + "_" + encoded_digest, bounded to
    // MAX_GENERATED_LEN total; the prefix absorbs the shrinkage.
    let fixed_overhead = 1 + 1 + length_marker.len() + 1 + encoded_digest.len();
    let max_prefix_len = MAX_GENERATED_LEN.saturating_sub(fixed_overhead);

    let mut prefix = String::new();
    for c in input.chars() {
        if prefix.len() >= max_prefix_len {
            break;
        }
        let mapped = if c == '.' { '-' } else { c };
        if mapped.is_ascii_alphanumeric() || mapped == '-' {
            prefix.push(mapped);
        }
    }

    format!("_{prefix}_{length_marker}_{encoded_digest}")
}

/// True if `s` is in the "normalized/generated" form (starts with the
/// signal `_` prefix this module uses).
pub fn looks_generated(s: &str) -> bool {
    s.starts_with('_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn plain_alnum_name_passes_through_unchanged() {
        assert_eq!(normalize("SsmTest"), "SsmTest");
        assert_eq!(normalize("my-package_1.0"), "my-package_1.0");
    }

    #[test]
    fn case_is_preserved_on_the_untouched_path() {
        assert_eq!(normalize("MixedCase"), "MixedCase");
    }

    #[test]
    fn leading_or_trailing_space_forces_generation() {
        assert!(looks_generated(&normalize(" leading")));
        assert!(looks_generated(&normalize("trailing ")));
    }

    #[test]
    fn disallowed_characters_force_generation() {
        assert!(looks_generated(&normalize("weird/path:name")));
    }

    #[test]
    fn exactly_255_alnum_chars_passes_through() {
        let s = "a".repeat(255);
        assert_eq!(normalize(&s), s);
    }

    #[test]
    fn exactly_256_chars_always_generates() {
        let s = "a".repeat(256);
        assert!(looks_generated(&normalize(&s)));
    }

    #[test]
    fn generated_form_never_exceeds_max_len() {
        let s = "!".repeat(1000);
        let out = normalize(&s);
        assert!(out.len() <= MAX_GENERATED_LEN);
    }

    #[test]
    fn deterministic() {
        let input = "some/weird:input";
        assert_eq!(normalize(input), normalize(input));
    }

    #[test]
    fn large_random_corpus_has_no_collisions() {
        // Deterministic PRNG so the test is reproducible without external
        // randomness; exercises the generated-path collision resistance
        // property across a large corpus of unsafe inputs.
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        let mut seen = HashSet::new();
        for i in 0..10_000u32 {
            let len = 1 + (next() % 40) as usize;
            let s: String = (0..len)
                .map(|_| (b'!' + (next() % 90) as u8) as char)
                .collect();
            let s = format!("{i}:{s}"); // guarantee distinctness across iterations
            let out = normalize(&s);
            assert!(seen.insert(out), "collision detected for input index {i}");
        }
    }

    #[test]
    fn two_inputs_differing_only_by_case_can_collide_only_via_generation() {
        // Both "Foo" and "foo" are safe-untouched and distinct, so they must
        // not collide under the untouched path.
        assert_ne!(normalize("Foo"), normalize("foo"));
    }
}
