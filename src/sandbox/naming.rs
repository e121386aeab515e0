//! Deterministic instance names.
//!
//! Names look like `podvm-<pod>-<id8>-<hash16>`: the first eight characters
//! of the sandbox ID for readability, then sixteen hex digits (64 bits) of the
//! SHA-256 of the full ID so sandbox IDs sharing a prefix do not map to the
//! same name. Only the pod segment is ever truncated; the fixed part is 32
//! bytes, which leaves 13 for the pod on the shortest backend limit (45).

use sha2::{Digest, Sha256};

const PREFIX: &str = "podvm";
const ID_PREFIX_LEN: usize = 8;
const DIGEST_HEX_LEN: usize = 16;

/// Build the backend instance name for a sandbox, at most `max_len` bytes.
pub fn instance_name(pod_name: &str, sandbox_id: &str, max_len: usize) -> String {
    let suffix = id_suffix(sandbox_id);
    let pod = sanitize(pod_name);

    // "podvm-" + pod + "-" + suffix
    let fixed = PREFIX.len() + 1 + 1 + suffix.len();
    let budget = max_len.saturating_sub(fixed);

    let pod = pod[..pod.len().min(budget)].trim_end_matches('-');
    let name = if pod.is_empty() {
        format!("{PREFIX}-{suffix}")
    } else {
        format!("{PREFIX}-{pod}-{suffix}")
    };

    if name.len() > max_len {
        // Limit smaller than the suffix itself; keep the hash, which is what
        // distinguishes sandboxes.
        return name[name.len() - max_len..].trim_start_matches('-').to_string();
    }
    name
}

fn id_suffix(sandbox_id: &str) -> String {
    let readable: String = sanitize(sandbox_id).chars().take(ID_PREFIX_LEN).collect();
    let digest = Sha256::digest(sandbox_id.as_bytes());
    let hash = hex::encode(&digest[..DIGEST_HEX_LEN / 2]);

    if readable.is_empty() {
        hash
    } else {
        format!("{readable}-{hash}")
    }
}

/// Lower-case, with anything outside `[a-z0-9-]` replaced by `-`.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
