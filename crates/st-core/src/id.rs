//! Short random identifiers for sites, scripts and sources.

const ID_LEN: usize = 7;
const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a 7-character base36 identifier.
pub fn generate_id() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; ID_LEN];
    getrandom::getrandom(&mut bytes)?;
    Ok(bytes
        .iter()
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect())
}
