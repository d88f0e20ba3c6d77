//! Single-use backup codes for the second factor

use rand::Rng;
use sha2::{Digest, Sha256};

/// No 0, O, 1 or I
const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub const BACKUP_CODE_COUNT: usize = 10;
pub const BACKUP_CODE_LENGTH: usize = 8;

/// Generate `count` fresh codes of `length` characters
pub fn generate_backup_codes(count: usize, length: usize) -> Vec<String> {
    let mut rng = rand::rngs::OsRng;
    (0..count)
        .map(|_| {
            (0..length)
                .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
                .collect()
        })
        .collect()
}

/// Grouped for display, e.g. `ABCD-EFGH`
pub fn format_backup_code(code: &str) -> String {
    if code.len() == BACKUP_CODE_LENGTH {
        format!("{}-{}", &code[..4], &code[4..])
    } else {
        code.to_string()
    }
}

/// Strip separators and upper-case
pub fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

/// Whether `code` could be a backup code at all (after normalisation)
pub fn looks_like_backup_code(code: &str) -> bool {
    let normalized = normalize_backup_code(code);
    normalized.len() == BACKUP_CODE_LENGTH && normalized.bytes().all(|b| CHARSET.contains(&b))
}

/// Storage form: SHA-256 hex of the normalised code
pub fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(normalize_backup_code(code).as_bytes()))
}
